//! Maps decoded table records onto the SELECT column list.

use chrono::{DateTime, Utc};
use pathql_core::sql::{SelectColumn, SqlExpr};
use pathql_core::{FieldAccessor, QueryError, RecordSchema, ScalarKind, Schema};
use serde_json::Value;

use crate::error::{DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    Field(FieldAccessor),
    /// Literal, `CAST(? AS …)` or `NOW()` value, identical on every row.
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    name: String,
    schema: Schema,
    source: ColumnSource,
}

impl OutputColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn source(&self) -> &ColumnSource {
        &self.source
    }

    pub fn value(&self, record: &Value) -> DriverResult<Value> {
        match &self.source {
            ColumnSource::Field(field) => Ok(field.get(record)?.cloned().unwrap_or(Value::Null)),
            ColumnSource::Constant(value) => Ok(value.clone()),
        }
    }
}

/// Compiled column list of one statement execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMapper {
    columns: Vec<OutputColumn>,
    consumed: usize,
}

impl RowMapper {
    /// Resolves `columns` against `record`. `CAST(? AS …)` columns take their
    /// values from the front of `args`.
    pub fn compile(
        record: &RecordSchema,
        columns: &[SelectColumn],
        args: &[Value],
    ) -> DriverResult<RowMapper> {
        let mut mapper = RowMapper {
            columns: Vec::with_capacity(columns.len()),
            consumed: 0,
        };

        for column in columns {
            match column {
                SelectColumn::Star => {
                    for field in record.accessors() {
                        mapper.columns.push(OutputColumn {
                            name: field.name().to_string(),
                            schema: field.schema().clone(),
                            source: ColumnSource::Field(field),
                        });
                    }
                }
                SelectColumn::Column { name, alias } => {
                    let unqualified = name.rsplit('.').next().unwrap_or(name);
                    let field = record
                        .field_by_name(unqualified)
                        .or_else(|| record.field_by_fuzzy_name(unqualified))
                        .ok_or_else(|| {
                            QueryError::SchemaResolution(format!(
                                "unable to match column: {} in type: {}",
                                name,
                                record.name()
                            ))
                        })?;
                    mapper.columns.push(OutputColumn {
                        name: alias.clone().unwrap_or_else(|| field.name().to_string()),
                        schema: field.schema().clone(),
                        source: ColumnSource::Field(field),
                    });
                }
                SelectColumn::Expression { expr, alias } => {
                    let name = required_alias(alias, expr)?;
                    let value = literal(expr).ok_or_else(|| {
                        DriverError::UnsupportedStatement(format!(
                            "unsupported column expression: {:?}",
                            expr
                        ))
                    })?;
                    let kind = literal_kind(&value).ok_or_else(|| {
                        DriverError::UnsupportedStatement(format!("column {} cannot be NULL", name))
                    })?;
                    mapper.columns.push(OutputColumn {
                        name,
                        schema: Schema::Scalar(kind),
                        source: ColumnSource::Constant(value),
                    });
                }
                SelectColumn::Function { name, args: call, alias } => {
                    let label = alias.clone().unwrap_or_else(|| name.clone());
                    let (kind, value) = match name.to_ascii_lowercase().as_str() {
                        "cast" => {
                            let (kind, source) = cast_parts(&label, call)?;
                            let value = match source {
                                SqlExpr::Placeholder(_) => {
                                    let arg = args.get(mapper.consumed).ok_or_else(|| {
                                        DriverError::Argument(format!(
                                            "missing cast argument {}",
                                            label
                                        ))
                                    })?;
                                    mapper.consumed += 1;
                                    arg.clone()
                                }
                                other => literal(other).ok_or_else(|| {
                                    DriverError::Argument(format!(
                                        "{} unsupported cast argument: {:?}",
                                        label, other
                                    ))
                                })?,
                            };
                            (kind, convert(kind, value, &label)?)
                        }
                        "now" | "current_timestamp" => {
                            (ScalarKind::Time, Value::String(Utc::now().to_rfc3339()))
                        }
                        other => {
                            return Err(DriverError::UnsupportedStatement(format!(
                                "unsupported function: {}",
                                other
                            )))
                        }
                    };
                    mapper.columns.push(OutputColumn {
                        name: label,
                        schema: Schema::Scalar(kind),
                        source: ColumnSource::Constant(value),
                    });
                }
            }
        }
        Ok(mapper)
    }

    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    /// Number of leading arguments taken by CAST placeholders.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn map(&self, record: &Value) -> DriverResult<Vec<Value>> {
        self.columns.iter().map(|column| column.value(record)).collect()
    }
}

/// Builds a record type from a column list made of literals, CAST and NOW
/// columns, used when the table name is not a registered type.
pub fn autodetect(name: &str, columns: &[SelectColumn]) -> DriverResult<RecordSchema> {
    let mut schema = RecordSchema::new(name);
    for column in columns {
        let (field, kind) = match column {
            SelectColumn::Star => {
                return Err(DriverError::TypeNotFound(format!(
                    "{} (cannot autodetect type for *)",
                    name
                )))
            }
            SelectColumn::Expression { expr, alias } => {
                let field = required_alias(alias, expr)?;
                let kind = literal(expr).as_ref().and_then(literal_kind).ok_or_else(|| {
                    DriverError::UnsupportedStatement(format!(
                        "unsupported column expression: {:?}",
                        expr
                    ))
                })?;
                (field, kind)
            }
            SelectColumn::Function { name: func, args, alias } => {
                let field = alias.clone().unwrap_or_else(|| func.clone());
                let kind = match func.to_ascii_lowercase().as_str() {
                    "cast" => cast_parts(&field, args)?.0,
                    "now" | "current_timestamp" => ScalarKind::Time,
                    other => {
                        return Err(DriverError::UnsupportedStatement(format!(
                            "unsupported function: {}",
                            other
                        )))
                    }
                };
                (field, kind)
            }
            SelectColumn::Column { name: column, .. } => {
                return Err(DriverError::TypeNotFound(format!(
                    "{} (cannot autodetect type of column {})",
                    name, column
                )))
            }
        };
        schema.push_field(field, Schema::Scalar(kind));
    }
    Ok(schema)
}

fn required_alias(alias: &Option<String>, expr: &SqlExpr) -> DriverResult<String> {
    alias.clone().ok_or_else(|| {
        DriverError::UnsupportedStatement(format!("column {:?} requires an alias", expr))
    })
}

fn literal(expr: &SqlExpr) -> Option<Value> {
    match expr {
        SqlExpr::Integer(n) => Some(Value::from(*n)),
        SqlExpr::Float(n) => Some(Value::from(*n)),
        SqlExpr::String(s) => Some(Value::String(s.clone())),
        SqlExpr::Boolean(b) => Some(Value::Bool(*b)),
        SqlExpr::Null => Some(Value::Null),
        _ => None,
    }
}

fn literal_kind(value: &Value) -> Option<ScalarKind> {
    match value {
        Value::Number(n) if n.is_f64() => Some(ScalarKind::Float),
        Value::Number(_) => Some(ScalarKind::Int),
        Value::String(_) => Some(ScalarKind::String),
        Value::Bool(_) => Some(ScalarKind::Bool),
        _ => None,
    }
}

/// Target kind and source expression of `CAST(x AS type)`.
fn cast_parts<'a>(label: &str, args: &'a [SqlExpr]) -> DriverResult<(ScalarKind, &'a SqlExpr)> {
    let (source, target) = match args {
        [source, SqlExpr::Column(target)] => (source, target),
        _ => {
            return Err(DriverError::UnsupportedStatement(format!(
                "{} unsupported cast arguments: {:?}",
                label, args
            )))
        }
    };
    let kind = match target.to_ascii_lowercase().as_str() {
        "char" | "varchar" | "text" | "string" => ScalarKind::String,
        "int" | "integer" | "bigint" | "signed" => ScalarKind::Int,
        "bool" | "boolean" => ScalarKind::Bool,
        "float" | "double" | "decimal" | "real" => ScalarKind::Float,
        "time" | "datetime" | "timestamp" => ScalarKind::Time,
        other => {
            return Err(DriverError::UnsupportedStatement(format!(
                "unsupported cast type: {}",
                other
            )))
        }
    };
    Ok((kind, source))
}

fn convert(kind: ScalarKind, value: Value, label: &str) -> DriverResult<Value> {
    let invalid = |value: &Value| {
        DriverError::Argument(format!("{} invalid {}: {}", label, kind.name(), value))
    };
    let converted = match (kind, &value) {
        (_, Value::Null) => Value::Null,
        (ScalarKind::String, Value::String(_)) => value.clone(),
        (ScalarKind::String, Value::Number(_) | Value::Bool(_)) => Value::String(value.to_string()),
        (ScalarKind::Int, Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::from(i),
            (None, Some(f)) if f.fract() == 0.0 => Value::from(f as i64),
            _ => return Err(invalid(&value)),
        },
        (ScalarKind::Int, Value::String(s)) => {
            Value::from(s.trim().parse::<i64>().map_err(|_| invalid(&value))?)
        }
        (ScalarKind::Float, Value::Number(n)) => {
            Value::from(n.as_f64().ok_or_else(|| invalid(&value))?)
        }
        (ScalarKind::Float, Value::String(s)) => {
            Value::from(s.trim().parse::<f64>().map_err(|_| invalid(&value))?)
        }
        (ScalarKind::Bool, Value::Bool(_)) => value.clone(),
        (ScalarKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" => Value::Bool(true),
            "0" | "f" | "false" => Value::Bool(false),
            _ => return Err(invalid(&value)),
        },
        (ScalarKind::Time, Value::String(s)) => {
            let ts = DateTime::parse_from_rfc3339(s.trim()).map_err(|_| invalid(&value))?;
            Value::String(ts.with_timezone(&Utc).to_rfc3339())
        }
        _ => return Err(invalid(&value)),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathql_core::parse_select;
    use serde_json::json;

    fn columns(sql: &str) -> Vec<SelectColumn> {
        parse_select(sql).unwrap().columns
    }

    fn foo() -> RecordSchema {
        RecordSchema::new("Foo")
            .field::<i64>("Id")
            .field::<String>("Name")
            .field::<Option<f64>>("Score")
    }

    #[test]
    fn test_star_maps_every_field() {
        let mapper = RowMapper::compile(&foo(), &columns("SELECT * FROM Foo"), &[]).unwrap();
        let names: Vec<&str> = mapper.columns().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Id", "Name", "Score"]);
        assert_eq!(
            mapper.map(&json!({"Id": 1, "Name": "a", "Score": null})).unwrap(),
            vec![json!(1), json!("a"), Value::Null]
        );
    }

    #[test]
    fn test_fuzzy_column_names() {
        let mapper =
            RowMapper::compile(&foo(), &columns("SELECT id, NAME AS label FROM Foo"), &[]).unwrap();
        let names: Vec<&str> = mapper.columns().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Id", "label"]);

        let err = RowMapper::compile(&foo(), &columns("SELECT Missing FROM Foo"), &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Schema resolution error: unable to match column: Missing in type: Foo"
        );
    }

    #[test]
    fn test_cast_consumes_arguments_in_order() {
        let sql = "SELECT 1 AS ID, CAST(? AS CHAR) AS NAME, CAST(? AS int) AS VALUE, NOW() AS TS FROM single";
        let record = autodetect("single", &columns(sql)).unwrap();
        let kinds: Vec<String> = record
            .fields()
            .iter()
            .map(|f| format!("{} {}", f.name, f.schema))
            .collect();
        assert_eq!(kinds, vec!["ID int", "NAME string", "VALUE int", "TS time"]);

        let args = [json!("name1"), json!("10"), json!("extra")];
        let mapper = RowMapper::compile(&record, &columns(sql), &args).unwrap();
        assert_eq!(mapper.consumed(), 2);
        let row = mapper.map(&json!({})).unwrap();
        assert_eq!(&row[..3], &[json!(1), json!("name1"), json!(10)]);
        assert!(row[3].is_string());
    }

    #[test]
    fn test_cast_errors() {
        let record = RecordSchema::new("single");
        let err = RowMapper::compile(&record, &columns("SELECT CAST(? AS int) AS N FROM single"), &[])
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: missing cast argument N");

        let err = RowMapper::compile(
            &record,
            &columns("SELECT CAST(? AS int) AS N FROM single"),
            &[json!("abc")],
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::Argument(_)));

        let err = autodetect("single", &columns("SELECT CAST(? AS blob) AS N FROM single"))
            .unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedStatement(_)));
    }

    #[test]
    fn test_autodetect_rejects_star_and_fields() {
        assert!(matches!(
            autodetect("Foo", &columns("SELECT * FROM Foo")),
            Err(DriverError::TypeNotFound(_))
        ));
        assert!(matches!(
            autodetect("Foo", &columns("SELECT Id FROM Foo")),
            Err(DriverError::TypeNotFound(_))
        ));
    }

    #[test]
    fn test_convert_kinds() {
        assert_eq!(convert(ScalarKind::Bool, json!("T"), "b").unwrap(), json!(true));
        assert_eq!(convert(ScalarKind::Float, json!(2), "f").unwrap(), json!(2.0));
        assert_eq!(convert(ScalarKind::String, json!(7), "s").unwrap(), json!("7"));
        assert_eq!(
            convert(ScalarKind::Time, json!("2024-01-02T03:04:05Z"), "t").unwrap(),
            json!("2024-01-02T03:04:05+00:00")
        );
        assert!(convert(ScalarKind::Int, json!(1.5), "i").is_err());
    }
}
