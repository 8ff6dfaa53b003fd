//! Caller-supplied limits and the batch creation request.

use serde::{Deserialize, Serialize};

use applyflow_core::{DomainError, DomainResult, JobId};

use crate::status::BatchScope;

/// Upper bound on tasks seeded into one batch, and on an explicit selection.
pub const MAX_BATCH_SIZE: u32 = 200;

/// Default for `limit` on create and retry, and the cap for summary lists.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// Upper bound on claims (and reported completions) per run-once step.
pub const MAX_RUN_ONCE_STEPS: u32 = 20;

/// Resolve an optional caller limit into `1..=max`.
pub fn clamp_limit(requested: Option<u32>, default: u32, max: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, max.max(1))
}

/// Reject an explicit limit outside `1..=MAX_BATCH_SIZE`.
pub fn validate_limit(limit: Option<u32>) -> DomainResult<()> {
    match limit {
        Some(limit) if limit == 0 || limit > MAX_BATCH_SIZE => Err(DomainError::validation(
            format!("limit must be between 1 and {MAX_BATCH_SIZE}"),
        )),
        _ => Ok(()),
    }
}

/// Request to seed a batch from the user's eligible jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    #[serde(default)]
    pub scope: BatchScope,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Narrows the eligible set. `limit` is ignored when present.
    #[serde(default)]
    pub selected_job_ids: Option<Vec<JobId>>,
}

impl CreateBatchRequest {
    pub fn validate(&self) -> DomainResult<()> {
        validate_limit(self.limit)?;
        if let Some(selected) = &self.selected_job_ids {
            if selected.is_empty() || selected.len() > MAX_BATCH_SIZE as usize {
                return Err(DomainError::validation(format!(
                    "selectedJobIds must contain between 1 and {MAX_BATCH_SIZE} ids"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_defaults_and_bounds() {
        assert_eq!(clamp_limit(None, 100, 200), 100);
        assert_eq!(clamp_limit(Some(0), 100, 200), 1);
        assert_eq!(clamp_limit(Some(500), 100, 200), 200);
        assert_eq!(clamp_limit(Some(42), 100, 200), 42);
    }

    #[test]
    fn explicit_limits_must_be_in_range() {
        assert!(validate_limit(None).is_ok());
        assert!(validate_limit(Some(1)).is_ok());
        assert!(validate_limit(Some(MAX_BATCH_SIZE)).is_ok());
        assert!(matches!(validate_limit(Some(0)), Err(DomainError::Validation(_))));
        assert!(matches!(
            validate_limit(Some(MAX_BATCH_SIZE + 1)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let request = CreateBatchRequest {
            selected_job_ids: Some(Vec::new()),
            ..CreateBatchRequest::default()
        };
        assert!(matches!(request.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn limit_out_of_range_is_rejected() {
        for limit in [0, MAX_BATCH_SIZE + 1] {
            let request = CreateBatchRequest {
                limit: Some(limit),
                ..CreateBatchRequest::default()
            };
            assert!(request.validate().is_err());
        }
    }

    #[test]
    fn deserializes_camel_case_body() {
        let job = JobId::new();
        let body = serde_json::json!({ "scope": "NEW", "selectedJobIds": [job.to_string()] });
        let request: CreateBatchRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.selected_job_ids, Some(vec![job]));
        assert_eq!(request.limit, None);
        assert!(request.validate().is_ok());
    }
}
