//! PathQL Core - SQL-style queries over nested in-memory records.
//!
//! A query names a path through a nested record structure in its FROM clause
//! (a "selector" such as `/Vendors[Active = true]/Products`), filters the
//! records it reaches with SQL predicates and projects them into destination
//! records. Records are `serde_json::Value` objects described by a [`Schema`].
//!
//! # Main Components
//!
//! - **SQL**: Lexer and parser for the SELECT subset and `REGISTER TYPE`
//! - **Selector**: Parses the FROM path into a chain of steps
//! - **Predicate**: Compiles criteria into evaluable conditions with bound placeholders
//! - **Node / Walker**: Binds the selector to a schema and walks concrete values
//! - **Mapper**: Projects leaf records into destination records
//! - **Query**: Ties the above into an immutable, reusable plan
//!
//! # Example
//!
//! ```rust
//! use pathql_core::{Query, RecordSchema, Schema};
//! use serde_json::json;
//!
//! let product = RecordSchema::new("Product")
//!     .field::<i64>("ID")
//!     .field::<String>("Name");
//! let vendor = RecordSchema::new("Vendor")
//!     .field::<i64>("ID")
//!     .with_field("Products", Schema::array(product.into()));
//! let root: Schema = RecordSchema::new("Root")
//!     .with_field("Vendors", Schema::array(vendor.into()))
//!     .into();
//!
//! let query = Query::compile(
//!     "SELECT ARRAY_AGG(ID) AS IDs FROM `/Vendors[ID = ?]/Products`",
//!     &root,
//!     None,
//! )
//! .unwrap();
//!
//! let data = json!({"Vendors": [
//!     {"ID": 1, "Products": [{"ID": 10, "Name": "a"}, {"ID": 11, "Name": "b"}]},
//!     {"ID": 2, "Products": [{"ID": 20, "Name": "c"}]}
//! ]});
//! let rows = query.select_all_with(&data, &[json!(1)]).unwrap();
//! assert_eq!(rows, vec![json!({"IDs": [10, 11]})]);
//! ```

pub mod error;
pub mod mapper;
pub mod node;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod selector;
pub mod sql;
pub mod walker;

// Re-export main types for convenience
pub use error::{QueryError, QueryResult};
pub use mapper::{ColumnMapping, Projection, Strategy};
pub use node::{Node, NodeKind};
pub use predicate::{
    Arguments, Binding, Condition, FieldLookup, Predicate, PredicateCompiler,
};
pub use query::{is_record_query, Query};
pub use schema::{fuzzy_name, Describe, Field, FieldAccessor, RecordSchema, ScalarKind, Schema};
pub use selector::{parse_selector, parse_selector_at, Criteria, Step};
pub use sql::{parse_criteria, parse_select, parse_statement, SqlStatement};
pub use walker::{Appender, NodeVisitor, Visitor, Walker};
