//! Compiled boolean tests over one record schema.
//!
//! A [`Predicate`] wraps a [`Condition`] tree produced by the
//! [`compiler`](compiler::PredicateCompiler). Evaluation reads the current
//! record and the invocation's [`Arguments`]; it never mutates the record.

pub mod binding;
pub mod compiler;

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::schema::{value_type_name, FieldAccessor, ScalarKind};
use crate::sql::BinaryOp;

pub use binding::{Arguments, Binding, Group, Membership, Slot, SlotValue};
pub use compiler::{FieldLookup, PredicateCompiler};

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(FieldAccessor),
    Constant(Value),
    /// Placeholder slot resolved from [`Arguments`].
    Slot(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(bool),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    /// `field IS [NOT] NULL`
    IsNull { field: FieldAccessor, negated: bool },
    /// Optional field must be present before `condition` is consulted.
    Guarded {
        field: FieldAccessor,
        condition: Box<Condition>,
    },
    Compare {
        field: FieldAccessor,
        op: BinaryOp,
        right: Operand,
        kind: ScalarKind,
    },
    /// `field [NOT] IN (...)`, backed by the membership set of a binding group.
    In {
        field: FieldAccessor,
        group: usize,
        negated: bool,
    },
}

impl Condition {
    pub fn evaluate(&self, record: &Value, args: &Arguments) -> QueryResult<bool> {
        match self {
            Condition::Literal(value) => Ok(*value),
            Condition::And(left, right) => {
                Ok(left.evaluate(record, args)? && right.evaluate(record, args)?)
            }
            Condition::Or(left, right) => {
                Ok(left.evaluate(record, args)? || right.evaluate(record, args)?)
            }
            Condition::Not(inner) => Ok(!inner.evaluate(record, args)?),
            Condition::IsNull { field, negated } => Ok(field.get(record)?.is_none() != *negated),
            Condition::Guarded { field, condition } => match field.get(record)? {
                Some(_) => condition.evaluate(record, args),
                None => Ok(false),
            },
            Condition::Compare {
                field,
                op,
                right,
                kind,
            } => {
                let left = match field.get(record)? {
                    Some(value) => value,
                    None => return Ok(false),
                };
                let right = match right {
                    Operand::Field(other) => other.get(record)?,
                    Operand::Constant(value) => Some(value),
                    Operand::Slot(slot) => Some(args.value(*slot)),
                };
                let right = match right {
                    Some(value) if !value.is_null() => value,
                    _ => return Ok(false),
                };
                let ordering = compare_values(*kind, left, right).ok_or_else(|| {
                    QueryError::execution(
                        field.name(),
                        format!(
                            "cannot compare {} with {} as {}",
                            value_type_name(left),
                            value_type_name(right),
                            kind.name()
                        ),
                    )
                })?;
                Ok(matches_ordering(*op, ordering))
            }
            Condition::In {
                field,
                group,
                negated,
            } => {
                let value = match field.get(record)? {
                    Some(value) => value,
                    None => return Ok(false),
                };
                let set = args.membership(*group).ok_or_else(|| {
                    QueryError::execution(field.name(), "IN list arguments were not expanded")
                })?;
                Ok(set.contains(value) != *negated)
            }
        }
    }

    /// Value of a condition that does not depend on any record.
    pub fn constant(&self) -> Option<bool> {
        match self {
            Condition::Literal(value) => Some(*value),
            Condition::Not(inner) => inner.constant().map(|v| !v),
            Condition::And(left, right) => match (left.constant(), right.constant()) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Condition::Or(left, right) => match (left.constant(), right.constant()) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

fn matches_ordering(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        BinaryOp::And | BinaryOp::Or => false,
    }
}

/// Orders two non-null values as instances of `kind`; `None` when either
/// value is not of that kind.
pub fn compare_values(kind: ScalarKind, a: &Value, b: &Value) -> Option<Ordering> {
    match kind {
        ScalarKind::Int | ScalarKind::Float => match (a, b) {
            (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
            _ => None,
        },
        ScalarKind::String => Some(a.as_str()?.cmp(b.as_str()?)),
        ScalarKind::Bool => Some(a.as_bool()?.cmp(&b.as_bool()?)),
        ScalarKind::Time => {
            let (a, b) = (a.as_str()?, b.as_str()?);
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
    }
}

/// A compiled boolean test.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    condition: Condition,
}

impl Predicate {
    pub fn new(condition: Condition) -> Self {
        Self { condition }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn evaluate(&self, record: &Value, args: &Arguments) -> QueryResult<bool> {
        self.condition.evaluate(record, args)
    }

    /// Conjunction of two optional predicates.
    pub fn and(left: Option<Predicate>, right: Option<Predicate>) -> Option<Predicate> {
        match (left, right) {
            (Some(left), Some(right)) => Some(Predicate::new(Condition::And(
                Box::new(left.condition),
                Box::new(right.condition),
            ))),
            (left, None) => left,
            (None, right) => right,
        }
    }

    pub fn constant(&self) -> Option<bool> {
        self.condition.constant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_values_numeric() {
        assert_eq!(
            compare_values(ScalarKind::Int, &json!(1), &json!(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_values(ScalarKind::Float, &json!(2), &json!(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_values(ScalarKind::Float, &json!(1.0), &json!(1)),
            Some(Ordering::Equal)
        );
        assert_eq!(compare_values(ScalarKind::Int, &json!("1"), &json!(1)), None);
    }

    #[test]
    fn test_compare_values_time() {
        assert_eq!(
            compare_values(
                ScalarKind::Time,
                &json!("2024-01-01T10:00:00+02:00"),
                &json!("2024-01-01T09:00:00Z")
            ),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_constant_folding() {
        let always = Condition::Literal(true);
        let never = Condition::Literal(false);
        let field = Condition::IsNull {
            field: FieldAccessor::detached("Amount", crate::schema::Schema::FLOAT),
            negated: false,
        };
        assert_eq!(
            Condition::And(Box::new(field.clone()), Box::new(never.clone())).constant(),
            Some(false)
        );
        assert_eq!(
            Condition::Or(Box::new(field.clone()), Box::new(always.clone())).constant(),
            Some(true)
        );
        assert_eq!(
            Condition::And(Box::new(field), Box::new(always)).constant(),
            None
        );
        assert_eq!(Condition::Not(Box::new(never)).constant(), Some(true));
    }

    #[test]
    fn test_data_mismatch_is_execution_error() {
        let condition = Condition::Compare {
            field: FieldAccessor::detached("ID", crate::schema::Schema::INT),
            op: BinaryOp::Eq,
            right: Operand::Constant(json!(1)),
            kind: ScalarKind::Int,
        };
        let err = condition
            .evaluate(&json!({"ID": "one"}), &Arguments::empty())
            .unwrap_err();
        assert!(matches!(err, QueryError::ExecutionError { ref field, .. } if field == "ID"));
    }

    #[test]
    fn test_predicate_and() {
        let a = Some(Predicate::new(Condition::Literal(true)));
        let b = Some(Predicate::new(Condition::Literal(false)));
        let both = Predicate::and(a.clone(), b).unwrap();
        assert_eq!(both.constant(), Some(false));
        assert_eq!(Predicate::and(a, None).unwrap().constant(), Some(true));
        assert!(Predicate::and(None, None).is_none());
    }
}
