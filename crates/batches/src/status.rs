//! Status enums for batches and tasks.
//!
//! Wire and storage representation is the upper-case name (`"QUEUED"`,
//! `"SUCCEEDED"`, ...).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub const ACTIVE: [BatchStatus; 2] = [BatchStatus::Queued, BatchStatus::Running];

    /// Terminal batches are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Succeeded | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Queued => "QUEUED",
            BatchStatus::Running => "RUNNING",
            BatchStatus::Succeeded => "SUCCEEDED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        }
    }
}

/// The terminal outcome a caller may report for a claimed task.
///
/// A separate type so `PENDING`/`RUNNING` can never be submitted as a
/// completion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl From<CompletionStatus> for TaskStatus {
    fn from(value: CompletionStatus) -> Self {
        match value {
            CompletionStatus::Succeeded => TaskStatus::Succeeded,
            CompletionStatus::Failed => TaskStatus::Failed,
            CompletionStatus::Skipped => TaskStatus::Skipped,
        }
    }
}

/// Seeding strategy of a batch.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchScope {
    /// All eligible NEW jobs, optionally narrowed to an explicit selection.
    #[default]
    New,
}

impl BatchScope {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchScope::New => "NEW",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl FromStr for BatchStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(BatchStatus::Queued),
            "RUNNING" => Ok(BatchStatus::Running),
            "SUCCEEDED" => Ok(BatchStatus::Succeeded),
            "FAILED" => Ok(BatchStatus::Failed),
            "CANCELLED" => Ok(BatchStatus::Cancelled),
            other => Err(ParseStatusError::new("batch", other)),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCEEDED" => Ok(TaskStatus::Succeeded),
            "FAILED" => Ok(TaskStatus::Failed),
            "SKIPPED" => Ok(TaskStatus::Skipped),
            other => Err(ParseStatusError::new("task", other)),
        }
    }
}

impl FromStr for BatchScope {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(BatchScope::New),
            other => Err(ParseStatusError::new("scope", other)),
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
