//! Placeholder bookkeeping for compiled predicates.
//!
//! A [`Binding`] is filled while predicates are compiled: every `?` (and every
//! literal inside an `IN (...)` list) gets a [`Slot`], and slots are grouped by
//! the field they are compared to. [`Binding::expand`] turns the caller's
//! argument list into [`Arguments`] for one invocation.

use std::collections::HashSet;

use chrono::DateTime;
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::schema::{value_type_name, ScalarKind};

/// Content of a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    /// Index into the caller's argument list.
    Placeholder(usize),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub position: usize,
    pub value: SlotValue,
}

/// Contiguous run of slots compared against one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub kind: ScalarKind,
    pub from: usize,
    pub to: usize,
    /// Group backs an `IN (...)` membership test.
    pub membership: bool,
}

impl Group {
    pub fn count(&self) -> usize {
        self.to - self.from
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    slots: Vec<Slot>,
    groups: Vec<Group>,
    placeholders: usize,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Number of arguments an invocation must supply.
    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    /// Allocates a one-wide group for a single `?`; returns its slot position.
    pub fn add_placeholder(&mut self, name: &str, kind: ScalarKind) -> usize {
        let position = self.slots.len();
        let value = self.next_placeholder();
        self.slots.push(Slot { position, value });
        self.groups.push(Group {
            name: name.to_string(),
            kind,
            from: position,
            to: position + 1,
            membership: false,
        });
        position
    }

    /// Allocates one group covering an `IN` list; `None` items are placeholders.
    /// Returns the group index.
    pub fn add_membership(
        &mut self,
        name: &str,
        kind: ScalarKind,
        items: Vec<Option<Value>>,
    ) -> QueryResult<usize> {
        let from = self.slots.len();
        for item in items {
            let value = match item {
                Some(literal) => SlotValue::Literal(coerce(name, kind, &literal)?),
                None => self.next_placeholder(),
            };
            let position = self.slots.len();
            self.slots.push(Slot { position, value });
        }
        self.groups.push(Group {
            name: name.to_string(),
            kind,
            from,
            to: self.slots.len(),
            membership: true,
        });
        Ok(self.groups.len() - 1)
    }

    fn next_placeholder(&mut self) -> SlotValue {
        let index = self.placeholders;
        self.placeholders += 1;
        SlotValue::Placeholder(index)
    }

    /// Resolves every slot against `args` and materializes the membership sets
    /// of `IN` groups. The result belongs to a single invocation.
    pub fn expand(&self, args: &[Value]) -> QueryResult<Arguments> {
        if args.len() != self.placeholders {
            return Err(QueryError::CompileError(format!(
                "expected {} argument(s), got {}",
                self.placeholders,
                args.len()
            )));
        }

        let mut values = vec![Value::Null; self.slots.len()];
        let mut sets = Vec::with_capacity(self.groups.len());

        for group in &self.groups {
            for slot in &self.slots[group.from..group.to] {
                values[slot.position] = match &slot.value {
                    SlotValue::Literal(value) => value.clone(),
                    SlotValue::Placeholder(index) => coerce(&group.name, group.kind, &args[*index])?,
                };
            }
            if group.membership {
                sets.push(Some(Membership::build(
                    group.kind,
                    &values[group.from..group.to],
                )));
            } else {
                sets.push(None);
            }
        }

        Ok(Arguments { values, sets })
    }
}

/// Type-directed conversion of an argument to the kind of the field it is
/// compared against. `null` passes through.
pub(crate) fn coerce(name: &str, kind: ScalarKind, value: &Value) -> QueryResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let invalid = || {
        QueryError::CompileError(format!(
            "invalid {} value {}: expected {}, found {}",
            name,
            value,
            kind.name(),
            value_type_name(value)
        ))
    };
    match kind {
        ScalarKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid()),
        },
        ScalarKind::Int => match value {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(Value::from(i)),
                (None, _) if n.is_u64() => Ok(value.clone()),
                (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(invalid()),
            },
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        ScalarKind::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            _ => Err(invalid()),
        },
        ScalarKind::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(invalid()),
        },
        ScalarKind::Time => match value {
            Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => Ok(value.clone()),
            _ => Err(invalid()),
        },
    }
}

/// Materialized `IN` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    /// Widened so unsigned values above `i64::MAX` keep their identity.
    Ints(HashSet<i128>),
    Strings(HashSet<String>),
}

impl Membership {
    fn build(kind: ScalarKind, values: &[Value]) -> Self {
        match kind {
            ScalarKind::Int => Membership::Ints(values.iter().filter_map(int_key).collect()),
            _ => Membership::Strings(
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match self {
            Membership::Ints(set) => int_key(value).is_some_and(|i| set.contains(&i)),
            Membership::Strings(set) => value.as_str().map(|s| set.contains(s)).unwrap_or(false),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Membership::Ints(set) => set.len(),
            Membership::Strings(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn int_key(value: &Value) -> Option<i128> {
    let n = value.as_number()?;
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < 1e19)
        .map(|f| f as i128)
}

/// Argument values of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
    sets: Vec<Option<Membership>>,
}

impl Arguments {
    /// Arguments for a binding without placeholders or IN lists. A literal-only
    /// IN list still owns a group and needs [`Binding::expand`].
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(&self, slot: usize) -> &Value {
        self.values.get(slot).unwrap_or(&Value::Null)
    }

    pub fn membership(&self, group: usize) -> Option<&Membership> {
        self.sets.get(group).and_then(Option::as_ref)
    }
}
