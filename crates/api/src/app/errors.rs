use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use applyflow_infra::{InvalidState, RunnerError};

pub fn runner_error_to_response(err: RunnerError) -> Response {
    let code = err.code();
    match err {
        RunnerError::NotFound(_) => json_error(StatusCode::NOT_FOUND, code, err.to_string()),
        RunnerError::InvalidState(InvalidState::ActiveBatchExists { batch_id, status }) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": code,
                "message": "an active batch already exists",
                "batchId": batch_id,
                "status": status,
            })),
        )
            .into_response(),
        RunnerError::InvalidState(_) => json_error(StatusCode::CONFLICT, code, err.to_string()),
        RunnerError::NoEligibleJobs | RunnerError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, code, err.to_string())
        }
        RunnerError::Store(_) | RunnerError::Catalog(_) => {
            tracing::error!(error = %err, "batch storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, code, "storage failure")
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
