use std::sync::Arc;

use parking_lot::RwLock;
use pathql_core::{Describe, RecordSchema};
use serde_json::Value;

use super::dsn::Config;
use super::registry::{global_types, TypeRegistry};
use super::rows::Rows;
use super::statement::Statement;
use super::DriverOptions;
use crate::error::{DriverError, DriverResult};

/// Connection to a directory of table files
#[derive(Debug)]
pub struct Connection {
    config: Config,
    options: DriverOptions,
    types: Arc<RwLock<TypeRegistry>>,
}

impl Connection {
    pub(crate) fn new(config: Config, options: DriverOptions) -> Self {
        Self {
            config,
            options,
            types: Arc::new(RwLock::new(TypeRegistry::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Prepares a SELECT or REGISTER TYPE statement. Globally registered
    /// types become visible to this connection.
    pub fn prepare(&self, sql: &str) -> DriverResult<Statement> {
        self.types.write().merge(&global_types());
        Statement::prepare(
            sql,
            self.config.clone(),
            self.options.clone(),
            Arc::clone(&self.types),
        )
    }

    pub fn exec(&self, sql: &str, args: &[Value]) -> DriverResult<()> {
        self.prepare(sql)?.exec(args)
    }

    pub fn query(&self, sql: &str, args: &[Value]) -> DriverResult<Rows> {
        self.prepare(sql)?.query(args)
    }

    pub fn register_type(&self, name: &str, schema: RecordSchema) {
        self.types.write().register(name, schema);
    }

    /// Registers the record type described by `T` under `name`.
    pub fn register<T: Describe>(&self, name: &str) -> DriverResult<()> {
        let schema = T::describe();
        let record = schema.as_record().ok_or_else(|| {
            DriverError::Argument(format!("type {} must describe a record, found {}", name, schema))
        })?;
        self.register_type(name, record.clone());
        Ok(())
    }

    pub fn lookup_type(&self, name: &str) -> Option<RecordSchema> {
        self.types.read().lookup(name).cloned()
    }
}
