//! Compiled, reusable query plans.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{QueryError, QueryResult};
use crate::mapper::Projection;
use crate::node::Node;
use crate::predicate::{Binding, FieldLookup, PredicateCompiler};
use crate::schema::{Describe, RecordSchema, Schema};
use crate::selector::parse_selector_at;
use crate::sql::{parse_select, FromSource, SelectStatement};
use crate::walker::{Appender, NodeVisitor, Visitor, Walker};

/// Holder name the WHERE clause uses for a root scan.
pub const ROOT_HOLDER: &str = "t";

/// Immutable compiled query.
///
/// ```
/// use pathql_core::{Query, RecordSchema, Schema};
/// use serde_json::json;
///
/// let record = RecordSchema::new("Record")
///     .field::<i64>("ID")
///     .field::<bool>("Active");
/// let root: Schema = RecordSchema::new("Root")
///     .with_field("Records", Schema::array(record.into()))
///     .into();
///
/// let query = Query::compile("SELECT ID FROM `/Records[Active = true]`", &root, None).unwrap();
/// let rows = query
///     .select_all(&json!({"Records": [{"ID": 1, "Active": true}, {"ID": 2, "Active": false}]}))
///     .unwrap();
/// assert_eq!(rows, vec![json!({"ID": 1})]);
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    sql: String,
    node: Node,
    projection: Projection,
    binding: Binding,
    limit: Option<usize>,
}

impl Query {
    /// Compiles `sql` against `root`. Without `dest` the destination record is
    /// synthesized from the column list.
    pub fn compile(sql: &str, root: &Schema, dest: Option<&RecordSchema>) -> QueryResult<Query> {
        let select = parse_select(sql)?;
        let mut binding = Binding::new();
        let node = bind(sql, &select, root, &mut binding)?;

        let leaf = node.leaf_schema();
        let projection = Projection::compile(leaf, &select.columns, dest)?;

        let limit = select.limit;

        debug!(
            sql,
            leaf = %leaf,
            placeholders = binding.placeholder_count(),
            aggregate = projection.is_aggregate(),
            "compiled query"
        );

        Ok(Query {
            sql: sql.to_string(),
            node,
            projection,
            binding,
            limit,
        })
    }

    /// Compiles against the schema of a host type.
    pub fn compile_for<R: Describe>(sql: &str) -> QueryResult<Query> {
        Self::compile(sql, &R::describe(), None)
    }

    /// Compiles against host root and destination types.
    pub fn compile_into<R: Describe, D: Describe>(sql: &str) -> QueryResult<Query> {
        let dest = D::describe();
        let dest = dest.leaf_record().ok_or_else(|| {
            QueryError::CompileError(format!("destination must be a record, found {}", dest))
        })?;
        Self::compile(sql, &R::describe(), Some(dest))
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Destination schema of produced rows.
    pub fn schema(&self) -> &Schema {
        self.projection.schema()
    }

    /// Schema of the values the selector reaches.
    pub fn leaf_schema(&self) -> &Schema {
        self.node.leaf_schema()
    }

    pub fn is_aggregate(&self) -> bool {
        self.projection.is_aggregate()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn placeholder_count(&self) -> usize {
        self.binding.placeholder_count()
    }

    pub fn select_all(&self, root: &Value) -> QueryResult<Vec<Value>> {
        self.select_all_with(root, &[])
    }

    pub fn select_all_with(&self, root: &Value, args: &[Value]) -> QueryResult<Vec<Value>> {
        self.select(root, args, self.limit)
    }

    pub fn select_first(&self, root: &Value) -> QueryResult<Option<Value>> {
        self.select_first_with(root, &[])
    }

    pub fn select_first_with(&self, root: &Value, args: &[Value]) -> QueryResult<Option<Value>> {
        let limit = Some(self.limit.map_or(1, |limit| limit.min(1)));
        Ok(self.select(root, args, limit)?.into_iter().next())
    }

    /// Rows deserialized into `T`.
    pub fn select_all_as<T: DeserializeOwned>(&self, root: &Value, args: &[Value]) -> QueryResult<Vec<T>> {
        self.select_all_with(root, args)?
            .into_iter()
            .map(|row| self.decode(row))
            .collect()
    }

    pub fn select_first_as<T: DeserializeOwned>(
        &self,
        root: &Value,
        args: &[Value],
    ) -> QueryResult<Option<T>> {
        self.select_first_with(root, args)?
            .map(|row| self.decode(row))
            .transpose()
    }

    /// Number of leaves `root` would produce, ignoring LIMIT.
    pub fn count(&self, root: &Value) -> QueryResult<usize> {
        self.count_with(root, &[])
    }

    pub fn count_with(&self, root: &Value, args: &[Value]) -> QueryResult<usize> {
        let args = self.binding.expand(args)?;
        Walker::new(&self.node).count(root, &args)
    }

    /// Walks `root` invoking the callbacks; nothing is projected.
    pub fn traverse<'b>(
        &self,
        root: &Value,
        args: &[Value],
        visitor: Option<&'b mut dyn Visitor>,
        node_visitor: Option<&'b mut dyn NodeVisitor>,
    ) -> QueryResult<()> {
        let args = self.binding.expand(args)?;
        Walker::new(&self.node).traverse(root, &args, visitor, node_visitor)
    }

    fn select(&self, root: &Value, args: &[Value], limit: Option<usize>) -> QueryResult<Vec<Value>> {
        let args = self.binding.expand(args)?;
        let walker = Walker::new(&self.node);
        let aggregate = self.projection.is_aggregate();

        let capacity = if aggregate {
            1
        } else {
            let count = walker.count(root, &args)?;
            limit.map_or(count, |limit| count.min(limit))
        };

        let mut appender = Appender::new(
            self.projection.template().clone(),
            aggregate,
            capacity,
            limit,
        );
        walker.map(root, &args, &self.projection, &mut appender)?;
        let rows = appender.finish();
        trace!(rows = rows.len(), capacity, "selected");
        Ok(rows)
    }

    fn decode<T: DeserializeOwned>(&self, row: Value) -> QueryResult<T> {
        serde_json::from_value(row).map_err(|e| {
            QueryError::execution(self.schema().to_string(), format!("failed to decode row: {}", e))
        })
    }
}

/// Parses the FROM selector and binds it, with the WHERE clause, to `root`.
fn bind(
    sql: &str,
    select: &SelectStatement,
    root: &Schema,
    binding: &mut Binding,
) -> QueryResult<Node> {
    let from = match &select.from {
        FromSource::Table(path) => path,
        FromSource::Subquery(_) => {
            return Err(QueryError::ParseError(
                "sub-select is not supported as a selector".to_string(),
            ))
        }
    };
    // Selector positions are reported relative to `sql`
    let mut base = select.from_offset;
    if sql.chars().nth(base) == Some('`') {
        base += 1;
    }
    let step = parse_selector_at(from, base)?;
    let mut node = Node::build(root, &step, binding)?;

    if let Some(where_clause) = &select.where_clause {
        let leaf = node.leaf_schema();
        let record = leaf.as_record().ok_or_else(|| {
            QueryError::CompileError(format!("WHERE requires a record leaf, found {}", leaf))
        })?;
        let holder = step.last_name().unwrap_or(ROOT_HOLDER);
        let predicate =
            PredicateCompiler::new(FieldLookup::exact(record), holder, binding).compile(where_clause)?;
        node.attach_to_leaf(predicate);
    }

    Ok(node)
}

/// Whether the selector in `sql` reaches record values.
pub fn is_record_query(sql: &str, root: &Schema) -> QueryResult<bool> {
    let select = parse_select(sql)?;
    let mut binding = Binding::new();
    let node = bind(sql, &select, root, &mut binding)?;
    Ok(node.leaf_schema().as_record().is_some())
}
