//! Submission sinks: where a completed signup record is written.

pub mod libsql_backend;
mod migrations;
pub mod rest;

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::flow::{SignupRecord, StepSequence};

pub use self::libsql_backend::LibSqlSink;
pub use self::rest::RestSink;

/// Row handed to a sink: storage column → value (`None` stores null).
pub type SubmissionRecord = BTreeMap<String, Option<String>>;

/// Append-only persistence for signup records.
///
/// Retried submissions may deliver the same row twice; implementations must
/// accept duplicates.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Append one record to `collection`.
    async fn insert(
        &self,
        collection: &str,
        record: &SubmissionRecord,
    ) -> Result<(), PersistenceError>;
}

/// Static field name → storage column renames. Unmapped names pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(HashMap<String, String>);

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.0.insert(field.into(), column.into());
        self
    }

    pub fn column<'a>(&'a self, field: &'a str) -> &'a str {
        self.0.get(field).map(String::as_str).unwrap_or(field)
    }

    /// Build the row for `collected`.
    ///
    /// Every collecting field of `sequence` gets a column, null when it was
    /// never answered. Extra collected keys are carried as well.
    pub fn map_record(&self, sequence: &StepSequence, collected: &SignupRecord) -> SubmissionRecord {
        let mut row = SubmissionRecord::new();
        for field in sequence.collecting_fields() {
            let value = collected
                .get(&field.name)
                .filter(|v| !v.trim().is_empty())
                .cloned();
            row.insert(self.column(&field.name).to_string(), value);
        }
        for (name, value) in collected {
            row.entry(self.column(name).to_string())
                .or_insert_with(|| Some(value.clone()));
        }
        row
    }
}

impl FromIterator<(String, String)> for ColumnMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
