//! File-backed relational driver
//!
//! Exposes directories of line-delimited JSON/YAML files as tables. Each
//! table file holds one record per line; its record type is either registered
//! (`REGISTER TYPE Foo AS struct{Id int; Name string}`) or autodetected from a
//! column list made of constants.
//!
//! # Example
//!
//! ```no_run
//! use pathql::driver::Driver;
//! use serde_json::json;
//!
//! let conn = Driver::open("file:///opt/local/testdata/").unwrap();
//! conn.exec("REGISTER TYPE Foo AS struct{Id int; Name string}", &[]).unwrap();
//! for row in conn.query("SELECT id, name FROM Foo WHERE id IN(?, ?)", &[json!(1), json!(3)]).unwrap() {
//!     println!("{:?}", row.unwrap());
//! }
//! ```

pub mod connection;
pub mod dsn;
pub mod mapper;
pub mod registry;
pub mod resource;
pub mod rows;
pub mod statement;

pub use connection::Connection;
pub use dsn::{parse_dsn, Config, SCHEME};
pub use registry::{register_global_type, TypeRegistry};
pub use rows::{ColumnType, Rows};
pub use statement::Statement;

use tracing::debug;

use crate::error::DriverResult;
use resource::{DEFAULT_EXTENSIONS, MAX_LINE_BYTES};

/// Reader limits and table-file discovery settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub max_line_bytes: usize,
    /// Extensions tried after the bare table name.
    pub extensions: Vec<String>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: MAX_LINE_BYTES,
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

pub struct Driver;

impl Driver {
    pub fn open(dsn: &str) -> DriverResult<Connection> {
        Self::open_with(dsn, DriverOptions::default())
    }

    pub fn open_with(dsn: &str, options: DriverOptions) -> DriverResult<Connection> {
        let config = parse_dsn(dsn)?;
        if !config.base_path.is_dir() {
            debug!(base = %config.base_path.display(), "base directory does not exist");
        }
        debug!(base_url = %config.base_url, "opened connection");
        Ok(Connection::new(config, options))
    }
}
