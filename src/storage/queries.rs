//! Named SQL queries.
//!
//! Query files hold blocks introduced by a `-- name: <key>` line; everything up
//! to the next such line belongs to that query. Statements are stored without
//! their trailing semicolon.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INSERT_STATION: &str = "insert-station";
pub const INSERT_MEASUREMENT: &str = "insert-measurement";
pub const NULL_MEASUREMENT_EXISTS: &str = "null-measurement-exists";
pub const UPDATE_MEASUREMENT: &str = "update-measurement";

/// Every query the writer needs.
pub const REQUIRED: [&str; 4] = [
    INSERT_STATION,
    INSERT_MEASUREMENT,
    NULL_MEASUREMENT_EXISTS,
    UPDATE_MEASUREMENT,
];

const EMBEDDED: &str = include_str!("../../queries/groundwater.sql");
const NAME_MARKER: &str = "-- name:";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to read query file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("query {0:?} is defined twice")]
    Duplicate(String),

    #[error("query {0:?} has no SQL")]
    Empty(String),

    #[error("query {0:?} not found")]
    Missing(String),
}

#[derive(Debug, Clone, Default)]
pub struct QueryStore {
    queries: HashMap<String, String>,
}

impl QueryStore {
    /// Queries bundled with the binary.
    pub fn embedded() -> Result<Self, QueryError> {
        Self::parse(EMBEDDED)
    }

    pub fn load(path: &Path) -> Result<Self, QueryError> {
        let text = std::fs::read_to_string(path).map_err(|source| QueryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let mut queries = HashMap::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some(name) = line.trim_start().strip_prefix(NAME_MARKER) {
                if let Some((name, body)) = current.take() {
                    insert(&mut queries, name, &body)?;
                }
                current = Some((name.trim().to_string(), Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some((name, body)) = current.take() {
            insert(&mut queries, name, &body)?;
        }

        Ok(Self { queries })
    }

    pub fn get(&self, name: &str) -> Result<&str, QueryError> {
        self.queries
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| QueryError::Missing(name.to_string()))
    }

    /// Fail unless every name in `names` is defined.
    pub fn require(&self, names: &[&str]) -> Result<(), QueryError> {
        for name in names {
            self.get(name)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }
}

fn insert(
    queries: &mut HashMap<String, String>,
    name: String,
    body: &[&str],
) -> Result<(), QueryError> {
    let sql = body.join("\n");
    let sql = sql.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return Err(QueryError::Empty(name));
    }
    if queries.contains_key(&name) {
        return Err(QueryError::Duplicate(name));
    }
    queries.insert(name, sql.to_string());
    Ok(())
}
