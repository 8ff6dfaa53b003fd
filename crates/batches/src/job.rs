use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use applyflow_core::{JobId, UserId};

use crate::status::ParseStatusError;

/// Pipeline status of a tracked job. Only `NEW` jobs seed batches.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Applied,
    Rejected,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Applied => "APPLIED",
            JobStatus::Rejected => "REJECTED",
        }
    }
}

impl core::str::FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(JobStatus::New),
            "APPLIED" => Ok(JobStatus::Applied),
            "REJECTED" => Ok(JobStatus::Rejected),
            other => Err(ParseStatusError::new("job", other)),
        }
    }
}

/// A job as the catalog stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub user_id: UserId,
    pub title: String,
    pub company: Option<String>,
    pub url: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(user_id: UserId, title: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            title: title.into(),
            company: None,
            url: url.into(),
            status: JobStatus::New,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn display(&self) -> JobDisplay {
        JobDisplay {
            title: self.title.clone(),
            company: self.company.clone(),
            url: self.url.clone(),
        }
    }
}

/// Display fields denormalized onto claimed and listed tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDisplay {
    pub title: String,
    pub company: Option<String>,
    #[serde(rename = "jobUrl")]
    pub url: String,
}

impl JobDisplay {
    /// Placeholder for a task whose job is no longer in the catalog.
    pub fn unknown() -> Self {
        Self {
            title: "Unknown job".to_string(),
            company: None,
            url: String::new(),
        }
    }
}
