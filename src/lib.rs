pub mod driver;
pub mod error;

pub use driver::{Config, Connection, Driver, DriverOptions, Rows, Statement};
pub use error::{DriverError, DriverResult};
pub use pathql_core::{Query, QueryError, QueryResult, RecordSchema, Schema};
