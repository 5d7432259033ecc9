//! Per-column copy strategies.

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::schema::{value_type_name, FieldAccessor, ScalarKind, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Same scalar kind on both sides.
    DirectPrimitive,
    /// Same composite schema on both sides.
    DirectValue,
    /// Optional wrap/unwrap, optionally widening `int` to `float`.
    Translate { widen: bool },
    /// Appends the source value to the shared destination sequence.
    AggregateCollect { widen: bool },
}

impl Strategy {
    /// Picks the strategy copying a `source` value into a `dest` field.
    pub fn resolve(source: &Schema, dest: &Schema, aggregate: bool) -> QueryResult<Strategy> {
        if aggregate {
            let element = match dest.unwrap_optional() {
                Schema::Array(element) => element,
                other => {
                    return Err(QueryError::CompileError(format!(
                        "ARRAY_AGG destination must be a collection, found {}",
                        other
                    )))
                }
            };
            return match translation(source, element) {
                Some(widen) => Ok(Strategy::AggregateCollect { widen }),
                None => Err(unsupported(source, dest)),
            };
        }

        if source == dest {
            return Ok(match source {
                Schema::Scalar(_) => Strategy::DirectPrimitive,
                _ => Strategy::DirectValue,
            });
        }
        match translation(source, dest) {
            Some(widen) => Ok(Strategy::Translate { widen }),
            None => Err(unsupported(source, dest)),
        }
    }
}

/// `Some(widen)` when `source` can be stored into `dest` ignoring optionality.
fn translation(source: &Schema, dest: &Schema) -> Option<bool> {
    let (source, dest) = (source.unwrap_optional(), dest.unwrap_optional());
    if source == dest {
        return Some(false);
    }
    match (source, dest) {
        (Schema::Scalar(ScalarKind::Int), Schema::Scalar(ScalarKind::Float)) => Some(true),
        _ => None,
    }
}

fn unsupported(source: &Schema, dest: &Schema) -> QueryError {
    QueryError::CompileError(format!(
        "unsupported field translation {} -> {}",
        source, dest
    ))
}

/// Compiled copy of one source field into one destination field.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    source: FieldAccessor,
    dest: FieldAccessor,
    strategy: Strategy,
}

impl ColumnMapping {
    pub fn new(source: FieldAccessor, dest: FieldAccessor, aggregate: bool) -> QueryResult<Self> {
        let strategy = Strategy::resolve(source.schema(), dest.schema(), aggregate)?;
        Ok(Self {
            source,
            dest,
            strategy,
        })
    }

    pub fn source(&self) -> &FieldAccessor {
        &self.source
    }

    pub fn dest(&self) -> &FieldAccessor {
        &self.dest
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.strategy, Strategy::AggregateCollect { .. })
    }

    pub fn apply(&self, source: &Value, dest: &mut Value) -> QueryResult<()> {
        let value = self.source.get(source)?;
        match self.strategy {
            Strategy::DirectPrimitive => {
                if let Some(value) = value {
                    let value = self.checked(self.source.schema(), value)?;
                    self.dest.set(dest, value)?;
                }
            }
            Strategy::DirectValue => {
                if let Some(value) = value {
                    self.dest.set(dest, value.clone())?;
                }
            }
            Strategy::Translate { widen } => {
                if let Some(value) = value {
                    let value = self.convert(value, widen)?;
                    self.dest.set(dest, value)?;
                }
            }
            Strategy::AggregateCollect { widen } => {
                let item = match value {
                    Some(value) => self.convert(value, widen)?,
                    None => match self.dest.schema().unwrap_optional() {
                        Schema::Array(element) => element.zero_value(),
                        _ => Value::Null,
                    },
                };
                let slot = self.dest.get_mut(dest)?;
                if slot.is_null() {
                    *slot = Value::Array(Vec::new());
                }
                match slot {
                    Value::Array(items) => items.push(item),
                    other => {
                        return Err(QueryError::execution(
                            self.dest.name(),
                            format!("expected array, found {}", value_type_name(other)),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn checked(&self, schema: &Schema, value: &Value) -> QueryResult<Value> {
        match schema.scalar_kind() {
            Some(kind) if !kind.accepts(value) => Err(QueryError::execution(
                self.source.name(),
                format!(
                    "expected {}, found {}",
                    kind.name(),
                    value_type_name(value)
                ),
            )),
            _ => Ok(value.clone()),
        }
    }

    fn convert(&self, value: &Value, widen: bool) -> QueryResult<Value> {
        if !widen {
            return self.checked(self.source.schema(), value);
        }
        match value.as_f64() {
            Some(n) => Ok(Value::from(n)),
            None => Err(QueryError::execution(
                self.source.name(),
                format!("expected int, found {}", value_type_name(value)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accessor(name: &str, schema: Schema) -> FieldAccessor {
        FieldAccessor::detached(name, schema)
    }

    #[test]
    fn test_resolve_strategies() {
        assert_eq!(
            Strategy::resolve(&Schema::INT, &Schema::INT, false).unwrap(),
            Strategy::DirectPrimitive
        );
        let tags = Schema::array(Schema::STRING);
        assert_eq!(
            Strategy::resolve(&tags, &tags, false).unwrap(),
            Strategy::DirectValue
        );
        assert_eq!(
            Strategy::resolve(&Schema::optional(Schema::INT), &Schema::INT, false).unwrap(),
            Strategy::Translate { widen: false }
        );
        assert_eq!(
            Strategy::resolve(&Schema::INT, &Schema::optional(Schema::FLOAT), false).unwrap(),
            Strategy::Translate { widen: true }
        );
        assert_eq!(
            Strategy::resolve(&Schema::INT, &Schema::array(Schema::INT), true).unwrap(),
            Strategy::AggregateCollect { widen: false }
        );
    }

    #[test]
    fn test_resolve_rejects() {
        assert!(Strategy::resolve(&Schema::FLOAT, &Schema::INT, false).is_err());
        assert!(Strategy::resolve(&Schema::STRING, &Schema::BOOL, false).is_err());
        assert!(Strategy::resolve(&Schema::INT, &Schema::INT, true).is_err());
        assert!(Strategy::resolve(&Schema::STRING, &Schema::array(Schema::INT), true).is_err());
    }

    #[test]
    fn test_translate_optional() {
        let mapping = ColumnMapping::new(
            accessor("Amount", Schema::optional(Schema::FLOAT)),
            accessor("Amount", Schema::FLOAT),
            false,
        )
        .unwrap();
        let mut dest = json!({"Amount": 0.0});
        mapping.apply(&json!({"Amount": null}), &mut dest).unwrap();
        assert_eq!(dest, json!({"Amount": 0.0}));
        mapping.apply(&json!({"Amount": 2.5}), &mut dest).unwrap();
        assert_eq!(dest, json!({"Amount": 2.5}));
    }

    #[test]
    fn test_widen_int_to_float() {
        let mapping = ColumnMapping::new(
            accessor("ID", Schema::INT),
            accessor("Score", Schema::optional(Schema::FLOAT)),
            false,
        )
        .unwrap();
        let mut dest = json!({"Score": null});
        mapping.apply(&json!({"ID": 3}), &mut dest).unwrap();
        assert_eq!(dest, json!({"Score": 3.0}));
    }

    #[test]
    fn test_aggregate_collect() {
        let mapping = ColumnMapping::new(
            accessor("ID", Schema::INT),
            accessor("IDs", Schema::array(Schema::INT)),
            true,
        )
        .unwrap();
        assert!(mapping.is_aggregate());
        let mut dest = json!({"IDs": []});
        mapping.apply(&json!({"ID": 1}), &mut dest).unwrap();
        mapping.apply(&json!({"ID": 2}), &mut dest).unwrap();
        assert_eq!(dest, json!({"IDs": [1, 2]}));
    }

    #[test]
    fn test_shape_mismatch_names_field() {
        let mapping =
            ColumnMapping::new(accessor("ID", Schema::INT), accessor("ID", Schema::INT), false)
                .unwrap();
        let mut dest = json!({"ID": 0});
        let err = mapping.apply(&json!({"ID": "x"}), &mut dest).unwrap_err();
        assert_eq!(err, QueryError::execution("ID", "expected int, found string"));
    }
}
