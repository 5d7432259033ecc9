//! Table files: discovery, decompression and line-by-line decoding.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::debug;

use crate::error::{DriverError, DriverResult};

/// Extensions tried, in order, after the bare table name.
pub const DEFAULT_EXTENSIONS: [&str; 4] = [".json", ".json.gz", ".yaml", ".yaml.gz"];

/// Longest accepted line.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Pseudo table holding one empty record, used for `SELECT <constants> FROM single`.
pub const SINGLE_TABLE: &str = "single";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory(&'static str),
}

/// A located table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    name: String,
    location: Location,
    format: Format,
    compressed: bool,
}

impl Resource {
    /// Finds table `name` under `base`: the bare name first, then each extension.
    pub fn locate(base: &Path, name: &str, extensions: &[String]) -> DriverResult<Resource> {
        let candidates = std::iter::once(base.join(name))
            .chain(extensions.iter().map(|ext| base.join(format!("{}{}", name, ext))));
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            if candidate.is_dir() {
                return Err(DriverError::Resource(format!(
                    "unsupported directory: {}",
                    candidate.display()
                )));
            }
            return Self::from_path(name, candidate);
        }

        if name.eq_ignore_ascii_case(SINGLE_TABLE) {
            return Ok(Resource {
                name: name.to_string(),
                location: Location::Memory("{}"),
                format: Format::Json,
                compressed: false,
            });
        }
        Err(DriverError::Resource(format!(
            "invalid source: {}",
            base.join(name).display()
        )))
    }

    fn from_path(name: &str, path: PathBuf) -> DriverResult<Resource> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let (stem, compressed) = match file_name.strip_suffix(".gz") {
            Some(stem) => (stem, true),
            None => (file_name.as_str(), false),
        };
        let format = match Path::new(stem).extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => {
                return Err(DriverError::Resource(format!(
                    "unsupported format: {}",
                    path.display()
                )))
            }
        };
        Ok(Resource {
            name: name.to_string(),
            location: Location::File(path),
            format,
            compressed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory(_) => None,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Opens a line reader over the resource.
    pub fn open(&self, max_line_bytes: usize) -> DriverResult<RecordReader> {
        let (label, reader): (String, Box<dyn BufRead + Send>) = match &self.location {
            Location::File(path) => {
                let file = File::open(path)?;
                let reader: Box<dyn BufRead + Send> = if self.compressed {
                    Box::new(BufReader::new(GzDecoder::new(file)))
                } else {
                    Box::new(BufReader::new(file))
                };
                (path.display().to_string(), reader)
            }
            Location::Memory(text) => (self.name.clone(), Box::new(Cursor::new(*text))),
        };
        debug!(
            resource = %label,
            format = ?self.format,
            compressed = self.compressed,
            "opened resource"
        );
        Ok(RecordReader {
            label,
            format: self.format,
            reader,
            line: 0,
            max_line_bytes,
            buf: Vec::new(),
        })
    }
}

/// Decodes one record per non-blank line.
pub struct RecordReader {
    label: String,
    format: Format,
    reader: Box<dyn BufRead + Send>,
    line: usize,
    max_line_bytes: usize,
    buf: Vec<u8>,
}

impl RecordReader {
    pub fn next_record(&mut self) -> Option<DriverResult<Value>> {
        loop {
            self.buf.clear();
            let limit = self.max_line_bytes as u64 + 1;
            let read = match Read::take(&mut self.reader, limit).read_until(b'\n', &mut self.buf) {
                Ok(read) => read,
                Err(e) => return Some(Err(e.into())),
            };
            if read == 0 {
                return None;
            }
            self.line += 1;
            if self.buf.len() > self.max_line_bytes && self.buf.last() != Some(&b'\n') {
                return Some(Err(DriverError::Resource(format!(
                    "line {} of {} exceeds {} bytes",
                    self.line, self.label, self.max_line_bytes
                ))));
            }
            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim(),
                Err(e) => return Some(Err(self.decode_error(e.to_string()))),
            };
            if text.is_empty() {
                continue;
            }
            return Some(self.decode(text));
        }
    }

    fn decode(&self, text: &str) -> DriverResult<Value> {
        let value: Value = match self.format {
            Format::Json => serde_json::from_str(text).map_err(|e| self.decode_error(e.to_string()))?,
            Format::Yaml => serde_yaml::from_str(text).map_err(|e| self.decode_error(e.to_string()))?,
        };
        if !value.is_object() {
            return Err(self.decode_error("expected object".to_string()));
        }
        Ok(value)
    }

    fn decode_error(&self, message: String) -> DriverError {
        DriverError::Decode {
            resource: self.label.clone(),
            line: self.line,
            message,
        }
    }

    /// Lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl Iterator for RecordReader {
    type Item = DriverResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}
