//! Projection of leaf records into destination records.

pub mod field;

use serde_json::Value;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::schema::{RecordSchema, Schema};
use crate::sql::{SelectColumn, SqlExpr};

pub use field::{ColumnMapping, Strategy};

/// Name given to synthesized destination records.
pub const SYNTHESIZED_RECORD: &str = "Row";

/// Compiled column list.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    columns: Vec<ColumnMapping>,
    dest: Schema,
    template: Value,
    aggregate: bool,
    verbatim: bool,
}

impl Projection {
    /// Compiles `columns` against the leaf `source` schema. Without `dest` the
    /// destination record is synthesized from the column list.
    pub fn compile(
        source: &Schema,
        columns: &[SelectColumn],
        dest: Option<&RecordSchema>,
    ) -> QueryResult<Projection> {
        let wildcard = columns.iter().any(|c| matches!(c, SelectColumn::Star));
        if wildcard {
            if columns.len() > 1 {
                return Err(QueryError::CompileError(
                    "'*' cannot be combined with other columns".to_string(),
                ));
            }
            return Self::wildcard(source, dest);
        }

        let record = source.as_record().ok_or_else(|| {
            QueryError::CompileError(format!(
                "column list requires a record source, found {}",
                source
            ))
        })?;

        let mut mappings = Vec::with_capacity(columns.len());
        let mut synthesized = RecordSchema::new(SYNTHESIZED_RECORD);
        let mut aggregate = false;

        for column in columns {
            let (source_name, alias, is_aggregate) = column_source(column)?;
            let source_field = record.field_by_name(source_name).ok_or_else(|| {
                QueryError::SchemaResolution(format!(
                    "failed to lookup source field: '{}' at {}",
                    source_name,
                    record.name()
                ))
            })?;
            let dest_name = alias.unwrap_or(source_field.name()).to_string();

            let dest_field = match dest {
                Some(dest) => dest.field_by_name(&dest_name).ok_or_else(|| {
                    QueryError::SchemaResolution(format!(
                        "failed to lookup dest field: '{}' at {}",
                        dest_name,
                        dest.name()
                    ))
                })?,
                None => {
                    if synthesized.field_by_name(&dest_name).is_some() {
                        return Err(QueryError::CompileError(format!(
                            "duplicate column '{}'",
                            dest_name
                        )));
                    }
                    let schema = if is_aggregate {
                        Schema::array(source_field.schema().clone())
                    } else {
                        source_field.schema().clone()
                    };
                    synthesized.push_field(dest_name.clone(), schema);
                    synthesized.accessor(synthesized.len() - 1)
                }
            };

            aggregate |= is_aggregate;
            mappings.push(ColumnMapping::new(source_field, dest_field, is_aggregate)?);
        }

        let dest = match dest {
            Some(dest) => dest.clone(),
            None => synthesized,
        };
        debug!(
            columns = mappings.len(),
            aggregate,
            dest = dest.name(),
            "compiled projection"
        );
        Ok(Projection {
            columns: mappings,
            template: dest.zero_value(),
            dest: Schema::Record(dest),
            aggregate,
            verbatim: false,
        })
    }

    fn wildcard(source: &Schema, dest: Option<&RecordSchema>) -> QueryResult<Projection> {
        let dest = match dest {
            Some(dest) => dest,
            None => {
                return Ok(Projection {
                    columns: Vec::new(),
                    template: source.zero_value(),
                    dest: source.clone(),
                    aggregate: false,
                    verbatim: true,
                })
            }
        };

        let record = source.as_record().ok_or_else(|| {
            QueryError::CompileError(format!(
                "cannot map {} into record {}",
                source,
                dest.name()
            ))
        })?;
        let mut mappings = Vec::with_capacity(dest.len());
        for dest_field in dest.accessors() {
            let source_field = record.field_by_name(dest_field.name()).ok_or_else(|| {
                QueryError::SchemaResolution(format!(
                    "failed to lookup source field: '{}' at {}",
                    dest_field.name(),
                    record.name()
                ))
            })?;
            mappings.push(ColumnMapping::new(source_field, dest_field, false)?);
        }
        Ok(Projection {
            columns: mappings,
            template: dest.zero_value(),
            dest: Schema::Record(dest.clone()),
            aggregate: false,
            verbatim: false,
        })
    }

    /// Copies `source` into the destination record `dest`.
    pub fn apply(&self, source: &Value, dest: &mut Value) -> QueryResult<()> {
        if self.verbatim {
            *dest = source.clone();
            return Ok(());
        }
        for column in &self.columns {
            column.apply(source, dest)?;
        }
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    /// Destination schema: a record, or the leaf schema for a verbatim `*`.
    pub fn schema(&self) -> &Schema {
        &self.dest
    }

    /// Zero-valued destination record new rows start from.
    pub fn template(&self) -> &Value {
        &self.template
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    pub fn is_verbatim(&self) -> bool {
        self.verbatim
    }
}

/// Source field name, alias and aggregate flag of a column.
fn column_source(column: &SelectColumn) -> QueryResult<(&str, Option<&str>, bool)> {
    match column {
        SelectColumn::Column { name, alias } => Ok((unqualified(name), alias.as_deref(), false)),
        SelectColumn::Function { name, args, alias } => {
            if !name.eq_ignore_ascii_case("ARRAY_AGG") {
                return Err(QueryError::CompileError(format!(
                    "unsupported function: {}",
                    name
                )));
            }
            if args.len() != 1 {
                return Err(QueryError::CompileError(format!(
                    "invalid ARRAY_AGG args count, {}, expected 1",
                    args.len()
                )));
            }
            match &args[0] {
                SqlExpr::Column(name) => Ok((unqualified(name), alias.as_deref(), true)),
                SqlExpr::QualifiedColumn { column, .. } => Ok((column.as_str(), alias.as_deref(), true)),
                other => Err(QueryError::CompileError(format!(
                    "unsupported ARRAY_AGG argument {:?}",
                    other
                ))),
            }
        }
        SelectColumn::Expression { expr, .. } => Err(QueryError::CompileError(format!(
            "unsupported column expression {:?}",
            expr
        ))),
        SelectColumn::Star => Err(QueryError::CompileError(
            "'*' cannot be combined with other columns".to_string(),
        )),
    }
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_select;
    use serde_json::json;

    fn record() -> Schema {
        RecordSchema::new("Record")
            .field::<i64>("ID")
            .field::<String>("Name")
            .field::<Option<f64>>("Amount")
            .into()
    }

    fn columns(sql: &str) -> Vec<SelectColumn> {
        parse_select(sql).unwrap().columns
    }

    #[test]
    fn test_synthesized_schema_preserves_order_and_kinds() {
        let projection = Projection::compile(
            &record(),
            &columns("SELECT Name AS Label, ID, Amount FROM t"),
            None,
        )
        .unwrap();
        let dest = projection.schema().as_record().unwrap();
        let fields: Vec<String> = dest
            .fields()
            .iter()
            .map(|f| format!("{} {}", f.name, f.schema))
            .collect();
        assert_eq!(fields, vec!["Label string", "ID int", "Amount *float"]);
        assert_eq!(projection.template(), &json!({"Label": "", "ID": 0, "Amount": null}));
    }

    #[test]
    fn test_apply_in_declared_order() {
        let projection =
            Projection::compile(&record(), &columns("SELECT ID, Name FROM t"), None).unwrap();
        let mut row = projection.template().clone();
        projection
            .apply(&json!({"ID": 4, "Name": "x", "Amount": 1.0}), &mut row)
            .unwrap();
        assert_eq!(row, json!({"ID": 4, "Name": "x"}));
        assert_eq!(
            row.as_object().unwrap().keys().collect::<Vec<_>>(),
            vec!["ID", "Name"]
        );
    }

    #[test]
    fn test_array_agg_synthesizes_collection() {
        let projection =
            Projection::compile(&record(), &columns("SELECT ARRAY_AGG(ID) AS IDs FROM t"), None)
                .unwrap();
        assert!(projection.is_aggregate());
        assert_eq!(
            projection.schema().as_record().unwrap().fields()[0].schema,
            Schema::array(Schema::INT)
        );
    }

    #[test]
    fn test_array_agg_arity() {
        let err =
            Projection::compile(&record(), &columns("SELECT ARRAY_AGG(ID, Name) FROM t"), None)
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Compile error: invalid ARRAY_AGG args count, 2, expected 1"
        );
        let err = Projection::compile(&record(), &columns("SELECT MAX(ID) FROM t"), None)
            .unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
    }

    #[test]
    fn test_wildcard_verbatim() {
        let projection = Projection::compile(&record(), &columns("SELECT * FROM t"), None).unwrap();
        assert!(projection.is_verbatim());
        assert_eq!(projection.schema(), &record());
        let mut row = Value::Null;
        let source = json!({"ID": 1, "Name": "a", "Amount": null});
        projection.apply(&source, &mut row).unwrap();
        assert_eq!(row, source);
    }

    #[test]
    fn test_wildcard_into_explicit_dest() {
        let dest = RecordSchema::new("Short")
            .field::<String>("Name")
            .field::<f64>("Amount");
        let projection =
            Projection::compile(&record(), &columns("SELECT * FROM t"), Some(&dest)).unwrap();
        let mut row = projection.template().clone();
        projection
            .apply(&json!({"ID": 1, "Name": "a", "Amount": null}), &mut row)
            .unwrap();
        assert_eq!(row, json!({"Name": "a", "Amount": 0.0}));

        let missing = RecordSchema::new("Bad").field::<bool>("Flag");
        let err = Projection::compile(&record(), &columns("SELECT * FROM t"), Some(&missing))
            .unwrap_err();
        assert!(matches!(err, QueryError::SchemaResolution(_)));
    }

    #[test]
    fn test_explicit_dest_array_agg_requires_collection() {
        let dest = RecordSchema::new("Dest").field::<i64>("IDs");
        let err = Projection::compile(
            &record(),
            &columns("SELECT ARRAY_AGG(ID) AS IDs FROM t"),
            Some(&dest),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
    }

    #[test]
    fn test_unknown_source_field() {
        let err = Projection::compile(&record(), &columns("SELECT Missing FROM t"), None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Schema resolution error: failed to lookup source field: 'Missing' at Record"
        );
    }

    #[test]
    fn test_qualified_column() {
        let projection =
            Projection::compile(&record(), &columns("SELECT t.ID FROM t"), None).unwrap();
        assert_eq!(
            projection.schema().as_record().unwrap().fields()[0].name,
            "ID"
        );
    }
}
