//! Selector chain bound to a concrete schema.

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::predicate::{Arguments, Binding, FieldLookup, Predicate, PredicateCompiler};
use crate::schema::{FieldAccessor, RecordSchema, Schema};
use crate::selector::Step;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Values reaching a leaf are produced.
    Leaf,
    /// Descends into one field of a record.
    Object {
        field: FieldAccessor,
        child: Box<Node>,
    },
    /// Visits every element of a collection.
    Array { child: Box<Node> },
}

/// Schema-bound traversal unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: NodeKind,
    schema: Schema,
    /// Name of the field that leads to this node.
    label: String,
    predicate: Option<Predicate>,
}

impl Node {
    /// Binds `step` (and its successors) to `schema`. Step criteria are compiled
    /// in chain order so placeholders are numbered in the order they appear.
    pub fn build(schema: &Schema, step: &Step, binding: &mut Binding) -> QueryResult<Node> {
        let label = match schema {
            Schema::Record(record) => record.name().to_string(),
            other => other.to_string(),
        };
        Self::build_labeled(schema, step, label, binding)
    }

    fn build_labeled(
        schema: &Schema,
        step: &Step,
        label: String,
        binding: &mut Binding,
    ) -> QueryResult<Node> {
        match schema {
            Schema::Optional(inner) => Self::build_labeled(inner, step, label, binding),
            Schema::Array(element) => {
                let child = Self::build_labeled(element, step, label.clone(), binding)?;
                Ok(Node {
                    kind: NodeKind::Array {
                        child: Box::new(child),
                    },
                    schema: schema.clone(),
                    label,
                    predicate: None,
                })
            }
            Schema::Record(record) => {
                let predicate = compile_criteria(record, step, binding)?;
                let kind = if step.is_leaf() {
                    NodeKind::Leaf
                } else {
                    let field = record.field_by_name(&step.name).ok_or_else(|| {
                        QueryError::SchemaResolution(format!(
                            "failed to lookup field: '{}' on {}",
                            step.name,
                            record.name()
                        ))
                    })?;
                    let leaf = Step::default();
                    let next = step.child().unwrap_or(&leaf);
                    let child =
                        Self::build_labeled(field.schema(), next, field.name().to_string(), binding)?;
                    NodeKind::Object {
                        field,
                        child: Box::new(child),
                    }
                };
                Ok(Node {
                    kind,
                    schema: schema.clone(),
                    label,
                    predicate,
                })
            }
            Schema::Scalar(_) => {
                if !step.is_leaf() {
                    return Err(QueryError::SchemaResolution(format!(
                        "unsupported shape for further descent: '{}' of type {} has no field '{}'",
                        label, schema, step.name
                    )));
                }
                if step.criteria.is_some() {
                    return Err(QueryError::CompileError(format!(
                        "criteria on '{}' requires a record, found {}",
                        label, schema
                    )));
                }
                Ok(Node {
                    kind: NodeKind::Leaf,
                    schema: schema.clone(),
                    label,
                    predicate: None,
                })
            }
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    pub fn child(&self) -> Option<&Node> {
        match &self.kind {
            NodeKind::Leaf => None,
            NodeKind::Object { child, .. } | NodeKind::Array { child } => Some(child),
        }
    }

    pub fn leaf(&self) -> &Node {
        match self.child() {
            Some(child) => child.leaf(),
            None => self,
        }
    }

    fn leaf_mut(&mut self) -> &mut Node {
        match self.kind {
            NodeKind::Leaf => self,
            NodeKind::Object { ref mut child, .. } | NodeKind::Array { ref mut child } => {
                child.leaf_mut()
            }
        }
    }

    pub fn leaf_schema(&self) -> &Schema {
        self.leaf().schema()
    }

    /// AND-s `predicate` into the leaf's own criteria.
    pub fn attach_to_leaf(&mut self, predicate: Predicate) {
        let leaf = self.leaf_mut();
        leaf.predicate = Predicate::and(leaf.predicate.take(), Some(predicate));
    }

    /// Evaluates the node's predicate; nodes without one accept every value.
    pub fn when(&self, value: &Value, args: &Arguments) -> QueryResult<bool> {
        match &self.predicate {
            Some(predicate) => predicate.evaluate(value, args),
            None => Ok(true),
        }
    }
}

fn compile_criteria(
    record: &RecordSchema,
    step: &Step,
    binding: &mut Binding,
) -> QueryResult<Option<Predicate>> {
    match &step.criteria {
        Some(criteria) => {
            let mut compiler =
                PredicateCompiler::new(FieldLookup::exact(record), &step.holder, binding);
            compiler.compile(&criteria.expr).map(Some)
        }
        None => Ok(None),
    }
}
