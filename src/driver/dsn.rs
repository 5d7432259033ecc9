//! Data source names.
//!
//! A DSN addresses the directory holding the table files:
//! `file:///abs/dir/`, `pathql:///abs/dir/` or a bare path. Query options
//! are not supported.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{DriverError, DriverResult};

/// Driver-specific URL scheme.
pub const SCHEME: &str = "pathql";

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Normalized base location, without query options.
    pub base_url: String,
    /// Directory the table files are resolved against.
    pub base_path: PathBuf,
}

/// Parses the DSN string to a Config
pub fn parse_dsn(dsn: &str) -> DriverResult<Config> {
    let dsn = dsn.trim();
    if dsn.is_empty() {
        return Err(DriverError::InvalidDsn("dsn was empty".to_string()));
    }

    let url = match Url::parse(dsn) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Ok(Config {
                base_url: dsn.to_string(),
                base_path: PathBuf::from(dsn),
            })
        }
        Err(e) => return Err(DriverError::InvalidDsn(format!("{}: {}", dsn, e))),
    };

    let mut unsupported: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    if !unsupported.is_empty() {
        unsupported.sort();
        return Err(DriverError::InvalidDsn(format!(
            "unsupported options: [{}]",
            unsupported.join(", ")
        )));
    }

    let file_url = match url.scheme() {
        "file" => url,
        SCHEME => {
            let rest = &dsn[SCHEME.len() + 1..];
            let rest = rest.split('?').next().unwrap_or(rest);
            Url::parse(&format!("file:{}", rest))
                .map_err(|e| DriverError::InvalidDsn(format!("{}: {}", dsn, e)))?
        }
        other => {
            return Err(DriverError::InvalidDsn(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };

    let path = file_url.to_file_path().map_err(|_| {
        DriverError::InvalidDsn(format!("{}: not a local path", dsn))
    })?;
    let base_path = relative_candidate(&path).unwrap_or(path);

    Ok(Config {
        base_url: format!("file://{}", base_path.display()),
        base_path,
    })
}

/// `file:///testdata/` names `./testdata/` when that directory exists.
fn relative_candidate(path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix("/").ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    let candidate = std::env::current_dir().ok()?.join(relative);
    candidate.exists().then_some(candidate)
}
