//! Depth-first interpreter of a bound [`Node`] tree.

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::mapper::Projection;
use crate::node::{Node, NodeKind};
use crate::predicate::Arguments;
use crate::schema::value_type_name;

/// Leaf callback.
pub trait Visitor {
    fn visit(&mut self, value: &Value) -> QueryResult<()>;
}

impl<F> Visitor for F
where
    F: FnMut(&Value) -> QueryResult<()>,
{
    fn visit(&mut self, value: &Value) -> QueryResult<()> {
        self(value)
    }
}

/// Callback invoked for every record (object) node that passes its predicate.
pub trait NodeVisitor {
    fn visit_node(&mut self, node: &Node, value: &Value) -> QueryResult<()>;
}

impl<F> NodeVisitor for F
where
    F: FnMut(&Node, &Value) -> QueryResult<()>,
{
    fn visit_node(&mut self, node: &Node, value: &Value) -> QueryResult<()> {
        self(node, value)
    }
}

/// Output buffer of one select invocation.
///
/// Non-aggregate projections get a fresh destination record per leaf;
/// aggregate projections share a single record.
#[derive(Debug)]
pub struct Appender {
    rows: Vec<Value>,
    template: Value,
    aggregate: bool,
    limit: Option<usize>,
}

impl Appender {
    pub fn new(template: Value, aggregate: bool, capacity: usize, limit: Option<usize>) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            template,
            aggregate,
            limit,
        }
    }

    /// Destination record for the next produced leaf.
    pub fn next_slot(&mut self) -> &mut Value {
        if !self.aggregate || self.rows.is_empty() {
            self.rows.push(self.template.clone());
        }
        let index = self.rows.len() - 1;
        &mut self.rows[index]
    }

    pub fn is_full(&self) -> bool {
        !self.aggregate && self.limit.is_some_and(|limit| self.rows.len() >= limit)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Produced rows. An aggregate projection always yields exactly one row
    /// (with empty collections when nothing matched), whatever the limit.
    pub fn finish(mut self) -> Vec<Value> {
        if self.aggregate {
            if self.rows.is_empty() {
                self.rows.push(self.template);
            }
            return self.rows;
        }
        if let Some(limit) = self.limit {
            self.rows.truncate(limit);
        }
        self.rows
    }
}

struct Visitors<'v> {
    leaf: Option<&'v mut dyn Visitor>,
    node: Option<&'v mut dyn NodeVisitor>,
}

/// Walks concrete values through a node tree.
pub struct Walker<'a> {
    root: &'a Node,
}

impl<'a> Walker<'a> {
    pub fn new(root: &'a Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &'a Node {
        self.root
    }

    /// Number of leaves the value would produce.
    pub fn count(&self, value: &Value, args: &Arguments) -> QueryResult<usize> {
        count_node(self.root, value, args)
    }

    /// Projects every surviving leaf into `appender`, stopping once it is full.
    pub fn map(
        &self,
        value: &Value,
        args: &Arguments,
        projection: &Projection,
        appender: &mut Appender,
    ) -> QueryResult<()> {
        map_node(self.root, value, args, projection, appender)
    }

    /// Calls `node_visitor` for each record node on the path and `visitor`
    /// for each leaf. A callback error aborts the traversal.
    pub fn traverse<'b>(
        &self,
        value: &Value,
        args: &Arguments,
        visitor: Option<&'b mut dyn Visitor>,
        node_visitor: Option<&'b mut dyn NodeVisitor>,
    ) -> QueryResult<()> {
        let mut visitors = Visitors {
            leaf: visitor,
            node: node_visitor,
        };
        traverse_node(self.root, value, args, &mut visitors)
    }
}

fn elements<'v>(node: &Node, value: &'v Value) -> QueryResult<&'v [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(QueryError::execution(
            node.label(),
            format!("expected array, found {}", value_type_name(other)),
        )),
    }
}

fn count_node(node: &Node, value: &Value, args: &Arguments) -> QueryResult<usize> {
    if value.is_null() || !node.when(value, args)? {
        return Ok(0);
    }
    match node.kind() {
        NodeKind::Leaf => Ok(1),
        NodeKind::Object { field, child } => match field.get(value)? {
            Some(item) => count_node(child, item, args),
            None => Ok(0),
        },
        NodeKind::Array { child } => {
            let mut total = 0;
            for item in elements(node, value)? {
                total += count_node(child, item, args)?;
            }
            Ok(total)
        }
    }
}

fn map_node(
    node: &Node,
    value: &Value,
    args: &Arguments,
    projection: &Projection,
    appender: &mut Appender,
) -> QueryResult<()> {
    if appender.is_full() || value.is_null() || !node.when(value, args)? {
        return Ok(());
    }
    match node.kind() {
        NodeKind::Leaf => {
            let slot = appender.next_slot();
            projection.apply(value, slot)
        }
        NodeKind::Object { field, child } => match field.get(value)? {
            Some(item) => map_node(child, item, args, projection, appender),
            None => Ok(()),
        },
        NodeKind::Array { child } => {
            for item in elements(node, value)? {
                if appender.is_full() {
                    break;
                }
                map_node(child, item, args, projection, appender)?;
            }
            Ok(())
        }
    }
}

fn traverse_node(
    node: &Node,
    value: &Value,
    args: &Arguments,
    visitors: &mut Visitors<'_>,
) -> QueryResult<()> {
    if value.is_null() || !node.when(value, args)? {
        return Ok(());
    }
    match node.kind() {
        NodeKind::Leaf => {
            if let Some(visitor) = visitors.node.as_mut() {
                if value.is_object() {
                    visitor.visit_node(node, value)?;
                }
            }
            match visitors.leaf.as_mut() {
                Some(visitor) => visitor.visit(value),
                None => Ok(()),
            }
        }
        NodeKind::Object { field, child } => {
            if let Some(visitor) = visitors.node.as_mut() {
                visitor.visit_node(node, value)?;
            }
            match field.get(value)? {
                Some(item) => traverse_node(child, item, args, visitors),
                None => Ok(()),
            }
        }
        NodeKind::Array { child } => {
            for item in elements(node, value)? {
                traverse_node(child, item, args, visitors)?;
            }
            Ok(())
        }
    }
}
