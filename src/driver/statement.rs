//! Prepared statements: `SELECT` over table files and `REGISTER TYPE`.

use std::sync::Arc;

use parking_lot::RwLock;
use pathql_core::predicate::{Binding, FieldLookup, PredicateCompiler};
use pathql_core::sql::{
    parse_statement, FromSource, RegisterTypeStatement, SelectColumn, SelectStatement,
    SqlStatement,
};
use serde_json::Value;
use tracing::debug;

use super::dsn::Config;
use super::mapper::{autodetect, RowMapper};
use super::registry::{parse_type_definition, register_global_type, schema_from_sample, TypeRegistry};
use super::resource::Resource;
use super::rows::Rows;
use super::DriverOptions;
use crate::error::{DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Select(SelectStatement),
    RegisterType(RegisterTypeStatement),
}

#[derive(Debug)]
pub struct Statement {
    sql: String,
    kind: Kind,
    num_input: usize,
    config: Config,
    options: DriverOptions,
    types: Arc<RwLock<TypeRegistry>>,
}

impl Statement {
    pub(crate) fn prepare(
        sql: &str,
        config: Config,
        options: DriverOptions,
        types: Arc<RwLock<TypeRegistry>>,
    ) -> DriverResult<Statement> {
        let keyword = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if keyword != "SELECT" && keyword != "REGISTER" {
            return Err(DriverError::UnsupportedStatement(format!(
                "unsupported SQL kind: {}",
                sql
            )));
        }

        let kind = match parse_statement(sql)? {
            SqlStatement::Select(select) => Kind::Select(flatten(select)),
            SqlStatement::RegisterType(register) => Kind::RegisterType(register),
        };
        let num_input = count_placeholders(sql);
        debug!(sql, num_input, "prepared statement");

        Ok(Statement {
            sql: sql.to_string(),
            kind,
            num_input,
            config,
            options,
            types,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of `?` placeholders outside quoted text.
    pub fn num_input(&self) -> usize {
        self.num_input
    }

    pub fn is_select(&self) -> bool {
        matches!(self.kind, Kind::Select(_))
    }

    /// The SELECT after sub-select flattening.
    pub fn select(&self) -> Option<&SelectStatement> {
        match &self.kind {
            Kind::Select(select) => Some(select),
            Kind::RegisterType(_) => None,
        }
    }

    /// Executes `REGISTER [GLOBAL] TYPE`. With `AS ?` the first argument is a
    /// sample object the record type is inferred from.
    pub fn exec(&self, args: &[Value]) -> DriverResult<()> {
        let register = match &self.kind {
            Kind::RegisterType(register) => register,
            Kind::Select(_) => {
                return Err(DriverError::UnsupportedStatement(
                    "SELECT must be run with query".to_string(),
                ))
            }
        };

        let definition = register.definition.trim();
        let schema = if definition == "?" {
            let sample = args.first().ok_or_else(|| {
                DriverError::Argument(format!("missing type argument for {}", register.name))
            })?;
            schema_from_sample(&register.name, sample)?
        } else {
            parse_type_definition(&register.name, definition)?
        };

        debug!(
            name = %register.name,
            global = register.global,
            fields = schema.len(),
            "registered type"
        );
        if register.global {
            register_global_type(&register.name, schema.clone());
        }
        self.types.write().register(&register.name, schema);
        Ok(())
    }

    /// Executes the SELECT against the table file named in FROM.
    pub fn query(&self, args: &[Value]) -> DriverResult<Rows> {
        let select = match &self.kind {
            Kind::Select(select) => select,
            Kind::RegisterType(_) => {
                return Err(DriverError::UnsupportedStatement(
                    "REGISTER TYPE must be run with exec".to_string(),
                ))
            }
        };
        let name = select.from.table_name().ok_or_else(|| {
            DriverError::UnsupportedStatement(format!("unsupported FROM in: {}", self.sql))
        })?;

        let registered = self.types.read().lookup(name).cloned();
        let record = match registered {
            Some(record) => record,
            None => autodetect(name, &select.columns)?,
        };

        let mapper = RowMapper::compile(&record, &select.columns, args)?;
        let remaining = &args[mapper.consumed()..];

        let mut binding = Binding::new();
        let predicate = match &select.where_clause {
            Some(expr) => Some(
                PredicateCompiler::new(FieldLookup::fuzzy(&record), name, &mut binding).compile(expr)?,
            ),
            None => None,
        };
        let arguments = binding.expand(remaining)?;

        let limit = select.limit;

        let resource = match predicate.as_ref().and_then(|p| p.constant()) {
            Some(false) => None,
            _ => Some(Resource::locate(
                &self.config.base_path,
                name,
                &self.options.extensions,
            )?),
        };
        debug!(
            table = name,
            record = record.name(),
            columns = mapper.columns().len(),
            short_circuit = resource.is_none(),
            "executing select"
        );

        Ok(Rows::new(
            record,
            mapper,
            predicate,
            arguments,
            resource,
            self.options.max_line_bytes,
            limit,
        ))
    }
}

/// Folds `SELECT … FROM (SELECT … FROM t)` into a single SELECT over `t`.
fn flatten(outer: SelectStatement) -> SelectStatement {
    let inner = match outer.from {
        FromSource::Subquery(inner) => flatten(*inner),
        from => return SelectStatement { from, ..outer },
    };

    let columns = if outer.columns == [SelectColumn::Star] {
        inner.columns.clone()
    } else {
        outer
            .columns
            .into_iter()
            .map(|column| {
                let name = column_name(&column);
                inner
                    .columns
                    .iter()
                    .find(|candidate| !name.is_empty() && column_name(candidate) == name)
                    .cloned()
                    .unwrap_or(column)
            })
            .collect()
    };

    SelectStatement {
        columns,
        from: inner.from,
        from_offset: inner.from_offset,
        where_clause: outer.where_clause.or(inner.where_clause),
        limit: outer.limit.or(inner.limit),
    }
}

fn column_name(column: &SelectColumn) -> String {
    let name = match column {
        SelectColumn::Star => "",
        SelectColumn::Column { name, alias } => match alias {
            Some(alias) => alias.as_str(),
            None => name.rsplit('.').next().unwrap_or(name),
        },
        SelectColumn::Function { name, alias, .. } => alias.as_deref().unwrap_or(name),
        SelectColumn::Expression { alias, .. } => alias.as_deref().unwrap_or(""),
    };
    name.to_ascii_lowercase()
}

/// Counts `?` placeholders outside quotes and back-ticks.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in sql.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => count += 1,
                _ => {}
            },
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathql_core::parse_select;

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("SELECT * FROM Foo WHERE id IN(?, ?, ?)"), 3);
        assert_eq!(count_placeholders("SELECT * FROM Foo WHERE name = '?' AND id = ?"), 1);
        assert_eq!(count_placeholders("SELECT * FROM `/A[x = ?]` WHERE b = 'it\\'s?'"), 0);
        assert_eq!(count_placeholders("REGISTER TYPE Foo AS ?"), 1);
    }

    #[test]
    fn test_flatten_maps_outer_columns() {
        let select = flatten(parse_select(
            "SELECT ID, NAME, TS FROM (SELECT 1 AS ID, CAST(? AS CHAR) AS NAME, NOW() TS FROM single LIMIT 1)",
        ).unwrap());
        assert_eq!(select.from, FromSource::Table("single".to_string()));
        assert_eq!(select.limit, Some(1));
        assert!(matches!(select.columns[0], SelectColumn::Expression { .. }));
        assert!(matches!(&select.columns[1], SelectColumn::Function { name, .. } if name == "CAST"));
        assert!(matches!(&select.columns[2], SelectColumn::Function { name, .. } if name == "NOW"));
    }

    #[test]
    fn test_flatten_star_and_where() {
        let select = flatten(
            parse_select("SELECT * FROM (SELECT Id, Name FROM Foo WHERE Id > 1) WHERE Id < 5")
                .unwrap(),
        );
        assert_eq!(select.columns.len(), 2);
        assert_eq!(select.from, FromSource::Table("Foo".to_string()));
        assert!(select.where_clause.is_some());
    }
}
