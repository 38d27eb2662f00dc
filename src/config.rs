//! Configuration for the dispatcher and for individual databases.
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use bincode::{Decode, Encode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Process-wide settings, fixed when the [`Dispatcher`](crate::Dispatcher) is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding databases opened without a location override.
    pub data_dir: PathBuf,
    /// `None` keeps every worker queue unbounded. `Some(n)` bounds each queue at `n` pending
    /// commands and rejects further ones with [`Error::QueueFull`](crate::Error::QueueFull).
    pub queue_capacity: Option<NonZeroUsize>,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            queue_capacity: None,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}

/// Options recognised by `open`.
///
/// Parsed from a JSON object; unknown keys are ignored and flags count as set whenever the key
/// is present with anything other than `false` or `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct OpenOptions {
    /// Alternate directory for the database file, as a plain path or a `file://` URI.
    #[serde(alias = "androidDatabaseLocation")]
    pub location: Option<String>,

    #[serde(rename = "androidOldDatabaseImplementation", deserialize_with = "flag")]
    pub legacy_execution: bool,

    /// Reopen the connection after a lone `COMMIT`. Only honoured with `legacy_execution`.
    #[serde(rename = "androidBugWorkaround", deserialize_with = "flag")]
    pub commit_workaround: bool,

    #[serde(rename = "isReadOnly", deserialize_with = "flag")]
    pub read_only: bool,
}

impl OpenOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub(crate) fn commit_workaround_enabled(&self) -> bool {
        self.legacy_execution && self.commit_workaround
    }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(!matches!(value, Value::Null | Value::Bool(false)))
}

/// Maps database names onto files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    data_dir: PathBuf,
}

impl Locator {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// File for database `name`, inside `location` when given, else inside the data directory.
    pub fn resolve(&self, name: &str, location: Option<&str>) -> PathBuf {
        match location {
            Some(location) => {
                let dir = location.strip_prefix("file://").unwrap_or(location);
                Path::new(dir).join(name)
            }
            None => self.data_dir.join(name),
        }
    }
}
