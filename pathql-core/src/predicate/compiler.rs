//! Rewrites a boolean SQL expression into a [`Condition`] bound to one schema.

use chrono::DateTime;
use serde_json::Value;

use super::binding::Binding;
use super::{compare_values, matches_ordering, Condition, Operand, Predicate};
use crate::error::{QueryError, QueryResult};
use crate::schema::{FieldAccessor, RecordSchema, ScalarKind};
use crate::sql::{BinaryOp, SqlExpr};

/// Resolves identifiers to fields of one record schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldLookup<'a> {
    schema: &'a RecordSchema,
    fuzzy: bool,
}

impl<'a> FieldLookup<'a> {
    /// Case-sensitive lookup.
    pub fn exact(schema: &'a RecordSchema) -> Self {
        Self {
            schema,
            fuzzy: false,
        }
    }

    /// Case-insensitive lookup ignoring underscores.
    pub fn fuzzy(schema: &'a RecordSchema) -> Self {
        Self {
            schema,
            fuzzy: true,
        }
    }

    pub fn schema(&self) -> &'a RecordSchema {
        self.schema
    }

    pub fn resolve(&self, name: &str) -> QueryResult<FieldAccessor> {
        let found = if self.fuzzy {
            self.schema.field_by_fuzzy_name(name)
        } else {
            self.schema.field_by_name(name)
        };
        found.ok_or_else(|| {
            QueryError::SchemaResolution(format!(
                "failed to lookup field: '{}' on {}",
                name,
                self.schema.name()
            ))
        })
    }
}

pub struct PredicateCompiler<'a> {
    lookup: FieldLookup<'a>,
    holder: &'a str,
    binding: &'a mut Binding,
}

impl<'a> PredicateCompiler<'a> {
    /// `holder` is the name qualified identifiers (`holder.Field`) may use.
    pub fn new(lookup: FieldLookup<'a>, holder: &'a str, binding: &'a mut Binding) -> Self {
        Self {
            lookup,
            holder,
            binding,
        }
    }

    pub fn compile(&mut self, expr: &SqlExpr) -> QueryResult<Predicate> {
        Ok(Predicate::new(self.condition(expr)?))
    }

    fn condition(&mut self, expr: &SqlExpr) -> QueryResult<Condition> {
        match expr {
            SqlExpr::BinaryOp { left, op, right } => match op {
                BinaryOp::And => Ok(Condition::And(
                    Box::new(self.condition(left)?),
                    Box::new(self.condition(right)?),
                )),
                BinaryOp::Or => Ok(Condition::Or(
                    Box::new(self.condition(left)?),
                    Box::new(self.condition(right)?),
                )),
                op => self.comparison(left, *op, right),
            },
            SqlExpr::Not(inner) => Ok(Condition::Not(Box::new(self.condition(inner)?))),
            SqlExpr::IsNull(inner) => self.null_test(inner, false),
            SqlExpr::IsNotNull(inner) => self.null_test(inner, true),
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => self.membership(expr, list, *negated),
            SqlExpr::Boolean(value) => Ok(Condition::Literal(*value)),
            SqlExpr::Column(_) | SqlExpr::QualifiedColumn { .. } => {
                let field = self.require_field(expr)?;
                if field.schema().scalar_kind() != Some(ScalarKind::Bool) {
                    return Err(QueryError::CompileError(format!(
                        "expected boolean expression, found field '{}' of type {}",
                        field.name(),
                        field.schema()
                    )));
                }
                Ok(guard(
                    field.clone(),
                    Condition::Compare {
                        field,
                        op: BinaryOp::Eq,
                        right: Operand::Constant(Value::Bool(true)),
                        kind: ScalarKind::Bool,
                    },
                ))
            }
            other => Err(QueryError::CompileError(format!(
                "expected boolean expression, found {:?}",
                other
            ))),
        }
    }

    fn field(&self, expr: &SqlExpr) -> QueryResult<Option<FieldAccessor>> {
        match expr {
            SqlExpr::Column(name) => self.lookup.resolve(name).map(Some),
            SqlExpr::QualifiedColumn { table, column } => {
                if table != self.holder {
                    return Err(QueryError::SchemaResolution(format!(
                        "unknown qualifier '{}' in '{}.{}', expected '{}'",
                        table, table, column, self.holder
                    )));
                }
                self.lookup.resolve(column).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn require_field(&self, expr: &SqlExpr) -> QueryResult<FieldAccessor> {
        self.field(expr)?.ok_or_else(|| {
            QueryError::CompileError(format!("expected field reference, found {:?}", expr))
        })
    }

    fn null_test(&self, expr: &SqlExpr, negated: bool) -> QueryResult<Condition> {
        if *expr == SqlExpr::Null {
            return Ok(Condition::Literal(!negated));
        }
        let field = self.require_field(expr)?;
        Ok(Condition::IsNull { field, negated })
    }

    fn comparison(&mut self, left: &SqlExpr, op: BinaryOp, right: &SqlExpr) -> QueryResult<Condition> {
        match (self.field(left)?, self.field(right)?) {
            (Some(left), Some(right)) => field_to_field(left, op, right),
            (Some(field), None) => self.field_to_operand(field, op, right),
            (None, Some(field)) => self.field_to_operand(field, op.flip(), left),
            (None, None) => fold_constants(left, op, right),
        }
    }

    fn field_to_operand(
        &mut self,
        field: FieldAccessor,
        op: BinaryOp,
        operand: &SqlExpr,
    ) -> QueryResult<Condition> {
        let kind = scalar_kind(&field)?;
        let right = match operand {
            SqlExpr::Null => {
                return Ok(match op {
                    BinaryOp::Eq => Condition::IsNull {
                        field,
                        negated: false,
                    },
                    BinaryOp::NotEq => Condition::IsNull {
                        field,
                        negated: true,
                    },
                    _ => Condition::Literal(false),
                })
            }
            SqlExpr::Placeholder(_) => Operand::Slot(self.binding.add_placeholder(field.name(), kind)),
            literal => match literal_value(literal) {
                Some(value) => Operand::Constant(check_literal(&field, kind, value)?),
                None => {
                    return Err(QueryError::CompileError(format!(
                        "unsupported operand {:?} for field '{}'",
                        literal,
                        field.name()
                    )))
                }
            },
        };
        Ok(guard(
            field.clone(),
            Condition::Compare {
                field,
                op,
                right,
                kind,
            },
        ))
    }

    fn membership(&mut self, expr: &SqlExpr, list: &[SqlExpr], negated: bool) -> QueryResult<Condition> {
        let field = self.require_field(expr)?;
        let kind = match field.schema().scalar_kind() {
            Some(kind @ (ScalarKind::Int | ScalarKind::String)) => kind,
            _ => {
                return Err(QueryError::CompileError(format!(
                    "unsupported type: {} for IN operator on '{}'",
                    field.schema(),
                    field.name()
                )))
            }
        };

        let mut items = Vec::with_capacity(list.len());
        for item in list {
            match item {
                SqlExpr::Placeholder(_) => items.push(None),
                SqlExpr::Null => {
                    return Err(QueryError::CompileError(format!(
                        "NULL is not allowed in IN list of '{}'",
                        field.name()
                    )))
                }
                other => match literal_value(other) {
                    Some(value) => items.push(Some(value)),
                    None => {
                        return Err(QueryError::CompileError(format!(
                            "unsupported IN list item {:?}",
                            other
                        )))
                    }
                },
            }
        }

        let group = self.binding.add_membership(field.name(), kind, items)?;
        Ok(guard(
            field.clone(),
            Condition::In {
                field,
                group,
                negated,
            },
        ))
    }
}

fn guard(field: FieldAccessor, condition: Condition) -> Condition {
    if field.schema().is_optional() {
        Condition::Guarded {
            field,
            condition: Box::new(condition),
        }
    } else {
        condition
    }
}

fn scalar_kind(field: &FieldAccessor) -> QueryResult<ScalarKind> {
    field.schema().scalar_kind().ok_or_else(|| {
        QueryError::CompileError(format!(
            "unsupported comparison on field '{}' of type {}",
            field.name(),
            field.schema()
        ))
    })
}

fn literal_value(expr: &SqlExpr) -> Option<Value> {
    match expr {
        SqlExpr::Integer(n) => Some(Value::from(*n)),
        SqlExpr::Float(n) => Some(Value::from(*n)),
        SqlExpr::String(s) => Some(Value::String(s.clone())),
        SqlExpr::Boolean(b) => Some(Value::Bool(*b)),
        SqlExpr::Null => Some(Value::Null),
        _ => None,
    }
}

fn check_literal(field: &FieldAccessor, kind: ScalarKind, value: Value) -> QueryResult<Value> {
    let compatible = match kind {
        ScalarKind::Int | ScalarKind::Float => value.is_number(),
        ScalarKind::String => value.is_string(),
        ScalarKind::Bool => value.is_boolean(),
        ScalarKind::Time => value
            .as_str()
            .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
    };
    if compatible {
        Ok(value)
    } else {
        Err(QueryError::CompileError(format!(
            "cannot compare field '{}' of type {} with {}",
            field.name(),
            field.schema(),
            value
        )))
    }
}

fn field_to_field(left: FieldAccessor, op: BinaryOp, right: FieldAccessor) -> QueryResult<Condition> {
    let (left_kind, right_kind) = (scalar_kind(&left)?, scalar_kind(&right)?);
    let kind = match (left_kind, right_kind) {
        (a, b) if a == b => a,
        (a, b) if a.is_numeric() && b.is_numeric() => ScalarKind::Float,
        _ => {
            return Err(QueryError::CompileError(format!(
                "cannot compare field '{}' of type {} with field '{}' of type {}",
                left.name(),
                left.schema(),
                right.name(),
                right.schema()
            )))
        }
    };
    let compare = Condition::Compare {
        field: left.clone(),
        op,
        right: Operand::Field(right.clone()),
        kind,
    };
    Ok(guard(left, guard(right, compare)))
}

fn fold_constants(left: &SqlExpr, op: BinaryOp, right: &SqlExpr) -> QueryResult<Condition> {
    let (a, b) = match (literal_value(left), literal_value(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(QueryError::CompileError(format!(
                "comparison needs a field operand: {:?} and {:?}",
                left, right
            )))
        }
    };
    if a.is_null() || b.is_null() {
        return Ok(Condition::Literal(false));
    }
    let kind = match &a {
        Value::Number(_) => ScalarKind::Float,
        Value::Bool(_) => ScalarKind::Bool,
        _ => ScalarKind::String,
    };
    match compare_values(kind, &a, &b) {
        Some(ordering) => Ok(Condition::Literal(matches_ordering(op, ordering))),
        None => Err(QueryError::CompileError(format!(
            "cannot compare {} with {}",
            a, b
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Arguments;
    use crate::schema::Schema;
    use crate::sql::parse_criteria;
    use serde_json::json;

    fn schema() -> RecordSchema {
        RecordSchema::new("Record")
            .field::<i64>("ID")
            .field::<String>("Name")
            .field::<bool>("Active")
            .field::<Option<f64>>("Amount")
            .field::<Option<String>>("Desc")
            .field::<Vec<i64>>("Tags")
            .with_field("Score", Schema::FLOAT)
    }

    fn compile(criteria: &str, binding: &mut Binding) -> QueryResult<Predicate> {
        let schema = schema();
        let expr = parse_criteria(criteria, 0)?;
        PredicateCompiler::new(FieldLookup::exact(&schema), "Records", binding).compile(&expr)
    }

    fn matches(criteria: &str, record: Value) -> bool {
        let mut binding = Binding::new();
        let predicate = compile(criteria, &mut binding).unwrap();
        let args = binding.expand(&[]).unwrap();
        predicate.evaluate(&record, &args).unwrap()
    }

    #[test]
    fn test_literal_comparisons() {
        let record = json!({"ID": 2, "Name": "abc", "Active": true, "Score": 1.5});
        assert!(matches("ID = 2", record.clone()));
        assert!(matches("ID >= 2 AND ID < 3", record.clone()));
        assert!(matches("2 = ID", record.clone()));
        assert!(matches("1 < ID", record.clone()));
        assert!(!matches("ID <> 2", record.clone()));
        assert!(matches("Name = 'abc' OR ID = 9", record.clone()));
        assert!(matches("Active", record.clone()));
        assert!(matches("NOT Active = false", record.clone()));
        assert!(matches("ID < 2.5", record.clone()));
        assert!(matches("Score > 1", record.clone()));
        assert!(matches("Score < ID", record.clone()));
        assert!(matches("Name = 'x' OR TRUE", record));
    }

    #[test]
    fn test_qualified_identifier() {
        let record = json!({"ID": 2});
        assert!(matches("Records.ID = 2", record));

        let mut binding = Binding::new();
        let err = compile("Other.ID = 2", &mut binding).unwrap_err();
        assert!(matches!(err, QueryError::SchemaResolution(_)));
    }

    #[test]
    fn test_optional_guard() {
        assert!(!matches("Amount > 5", json!({"Amount": null})));
        assert!(!matches("Amount > 5", json!({})));
        assert!(matches("Amount > 5", json!({"Amount": 5.5})));
        assert!(matches("Amount IS NULL", json!({"Amount": null})));
        assert!(matches("Amount IS NOT NULL", json!({"Amount": 1.0})));
        assert!(matches("Amount = NULL", json!({})));
        assert!(matches("NOT Amount > 5", json!({})));
    }

    #[test]
    fn test_in_list() {
        let mut binding = Binding::new();
        let predicate = compile("ID IN (1, ?, 3)", &mut binding).unwrap();
        assert_eq!(binding.placeholder_count(), 1);
        let args = binding.expand(&[json!(7)]).unwrap();
        assert!(predicate.evaluate(&json!({"ID": 7}), &args).unwrap());
        assert!(predicate.evaluate(&json!({"ID": 3}), &args).unwrap());
        assert!(!predicate.evaluate(&json!({"ID": 2}), &args).unwrap());

        assert!(matches("Name NOT IN ('a', 'b')", json!({"Name": "c"})));
        assert!(!matches("Desc IN ('a')", json!({"Desc": null})));
        assert!(!matches(
            "ID IN (9223372036854775807)",
            json!({"ID": 9_223_372_036_854_775_808u64})
        ));
    }

    #[test]
    fn test_in_requires_int_or_string() {
        let mut binding = Binding::new();
        let err = compile("Active IN (true)", &mut binding).unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
        let err = compile("Score IN (1.5)", &mut binding).unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
    }

    #[test]
    fn test_placeholders_grouped_by_field() {
        let mut binding = Binding::new();
        let predicate = compile("Name = ? AND ID > ?", &mut binding).unwrap();
        assert_eq!(binding.placeholder_count(), 2);
        assert_eq!(binding.groups()[0].name, "Name");
        assert_eq!(binding.groups()[1].kind, ScalarKind::Int);

        let args = binding.expand(&[json!("x"), json!("4")]).unwrap();
        assert!(predicate
            .evaluate(&json!({"Name": "x", "ID": 5}), &args)
            .unwrap());
        assert!(!predicate
            .evaluate(&json!({"Name": "x", "ID": 4}), &args)
            .unwrap());
    }

    #[test]
    fn test_incompatible_literal() {
        let mut binding = Binding::new();
        let err = compile("Name = true", &mut binding).unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
        let err = compile("Active = 'yes'", &mut binding).unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
        let err = compile("Tags = 1", &mut binding).unwrap_err();
        assert!(matches!(err, QueryError::CompileError(_)));
    }

    #[test]
    fn test_unknown_field() {
        let mut binding = Binding::new();
        let err = compile("Missing = 1", &mut binding).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Schema resolution error: failed to lookup field: 'Missing' on Record"
        );
    }

    #[test]
    fn test_constant_predicates() {
        let mut binding = Binding::new();
        assert_eq!(compile("1 = 0", &mut binding).unwrap().constant(), Some(false));
        assert_eq!(compile("1 = 1", &mut binding).unwrap().constant(), Some(true));
        assert_eq!(compile("ID = 1", &mut binding).unwrap().constant(), None);
    }

    #[test]
    fn test_fuzzy_lookup() {
        let schema = RecordSchema::new("Foo").field::<i64>("Id");
        let mut binding = Binding::new();
        let expr = parse_criteria("id = 1", 0).unwrap();
        let predicate = PredicateCompiler::new(FieldLookup::fuzzy(&schema), "t", &mut binding)
            .compile(&expr)
            .unwrap();
        assert!(predicate
            .evaluate(&json!({"Id": 1}), &Arguments::empty())
            .unwrap());
    }
}
