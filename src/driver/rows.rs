//! Cursor over the rows of one SELECT execution.

use pathql_core::predicate::{Arguments, Predicate};
use pathql_core::{RecordSchema, ScalarKind, Schema};
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::mapper::RowMapper;
use super::resource::{RecordReader, Resource};
use crate::error::{DriverError, DriverResult};

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnType {
    pub name: String,
    pub database_type: &'static str,
    pub nullable: bool,
}

/// Database type name reported for a column schema.
pub fn database_type_name(schema: &Schema) -> &'static str {
    match schema.unwrap_optional() {
        Schema::Scalar(kind) => match kind {
            ScalarKind::Int => "INT",
            ScalarKind::Float => "DECIMAL",
            ScalarKind::Bool => "BOOLEAN",
            ScalarKind::String => "STRING",
            ScalarKind::Time => "TIME",
        },
        Schema::Array(element) => match element.unwrap_optional() {
            Schema::Scalar(ScalarKind::Int) => "INTS",
            Schema::Scalar(ScalarKind::Float) => "DECIMALS",
            Schema::Scalar(ScalarKind::String) => "STRINGS",
            _ => "JSON",
        },
        _ => "JSON",
    }
}

pub struct Rows {
    record: RecordSchema,
    mapper: RowMapper,
    predicate: Option<Predicate>,
    arguments: Arguments,
    /// `None` when the WHERE clause is constantly false.
    resource: Option<Resource>,
    reader: Option<RecordReader>,
    max_line_bytes: usize,
    limit: Option<usize>,
    produced: usize,
    done: bool,
}

impl Rows {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        record: RecordSchema,
        mapper: RowMapper,
        predicate: Option<Predicate>,
        arguments: Arguments,
        resource: Option<Resource>,
        max_line_bytes: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            record,
            mapper,
            predicate,
            arguments,
            resource,
            reader: None,
            max_line_bytes,
            limit,
            produced: 0,
            done: false,
        }
    }

    pub fn columns(&self) -> Vec<String> {
        self.mapper
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect()
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.mapper
            .columns()
            .iter()
            .map(|column| ColumnType {
                name: column.name().to_string(),
                database_type: database_type_name(column.schema()),
                nullable: column.schema().is_optional(),
            })
            .collect()
    }

    /// Record type the table lines are decoded into.
    pub fn record_schema(&self) -> &RecordSchema {
        &self.record
    }

    /// Next matching row, one value per column.
    pub fn next_row(&mut self) -> Option<DriverResult<Vec<Value>>> {
        if self.done || self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }

        if self.reader.is_none() {
            let Some(resource) = &self.resource else {
                self.done = true;
                return None;
            };
            match resource.open(self.max_line_bytes) {
                Ok(reader) => self.reader = Some(reader),
                Err(e) => return Some(self.fail(e)),
            }
        }

        loop {
            let (next, line) = match self.reader.as_mut() {
                Some(reader) => (reader.next_record(), reader.line()),
                None => return None,
            };
            let value = match next {
                Some(Ok(value)) => value,
                Some(Err(e)) => return Some(self.fail(e)),
                None => {
                    self.close();
                    return None;
                }
            };

            let record = self.record.conform(value);
            if let Err(e) = self.check(&record, line) {
                return Some(self.fail(e));
            }
            if let Some(predicate) = &self.predicate {
                match predicate.evaluate(&record, &self.arguments) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => return Some(self.fail(e.into())),
                }
            }

            self.produced += 1;
            trace!(line, produced = self.produced, "row");
            return Some(self.mapper.map(&record));
        }
    }

    /// Releases the underlying file.
    pub fn close(&mut self) {
        self.reader = None;
        self.done = true;
    }

    fn fail(&mut self, e: DriverError) -> DriverResult<Vec<Value>> {
        self.close();
        Err(e)
    }

    fn check(&self, record: &Value, line: usize) -> DriverResult<()> {
        for field in self.record.accessors() {
            let kind = match field.schema().scalar_kind() {
                Some(kind) => kind,
                None => continue,
            };
            if let Some(value) = field.get(record)? {
                if !kind.accepts(value) {
                    return Err(DriverError::Decode {
                        resource: self.record.name().to_string(),
                        line,
                        message: format!(
                            "field {} expected {}, found {}",
                            field.name(),
                            kind.name(),
                            value
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("record", &self.record.name())
            .field("resource", &self.resource)
            .field("limit", &self.limit)
            .field("produced", &self.produced)
            .field("done", &self.done)
            .finish()
    }
}

impl Iterator for Rows {
    type Item = DriverResult<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}
