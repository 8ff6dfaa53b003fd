use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};

use applyflow_batches::CreateBatchRequest;
use applyflow_core::TaskId;
use applyflow_infra::runner::{ClaimOutcome, RunOnceRequest};

use crate::app::dto::{self, BatchEnvelope, CompleteTaskRequest, LatestBatchEnvelope, RetryFailedRequest};
use crate::app::errors::{json_error, runner_error_to_response};
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_batch))
        .route("/latest", get(latest_batch))
        .route("/:id", get(batch_detail))
        .route("/:id/summary", get(batch_summary))
        .route("/:id/claim", post(claim_task))
        .route("/:id/tasks/:task_id", patch(complete_task))
        .route("/:id/cancel", post(cancel_batch))
        .route("/:id/retry-failed", post(retry_failed))
        .route("/:id/run-once", post(run_once))
}

/// Unwrap a parse result or return its error response.
macro_rules! try_response {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(response) => return response,
        }
    };
}

pub async fn create_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Bytes,
) -> Response {
    let request: CreateBatchRequest = try_response!(dto::parse_optional_body(&body));
    match services.runner().create_batch(user.user_id(), request).await {
        Ok(batch) => (StatusCode::CREATED, Json(BatchEnvelope { batch })).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn latest_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> Response {
    match services.runner().latest(user.user_id()).await {
        Ok(batch) => (StatusCode::OK, Json(LatestBatchEnvelope { batch })).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn batch_detail(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    match services.runner().detail(user.user_id(), batch_id).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn batch_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    match services.runner().summary(user.user_id(), batch_id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn claim_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    match services.runner().claim(user.user_id(), batch_id).await {
        Ok(ClaimOutcome::NotFound) => {
            json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "batch not found")
        }
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn complete_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path((id, task_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    let task_id: TaskId = try_response!(dto::parse_id(&task_id));
    let request: CompleteTaskRequest = try_response!(dto::parse_body(&body));

    match services
        .runner()
        .complete(
            user.user_id(),
            batch_id,
            task_id,
            request.status,
            request.error.as_deref(),
        )
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn cancel_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    match services.runner().cancel(user.user_id(), batch_id).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn retry_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    let request: RetryFailedRequest = try_response!(dto::parse_optional_body(&body));
    match services
        .runner()
        .retry_failed(user.user_id(), batch_id, request.limit)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}

pub async fn run_once(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let batch_id = try_response!(dto::parse_batch_id(&id));
    let request: RunOnceRequest = try_response!(dto::parse_optional_body(&body));
    match services.runner().run_once(user.user_id(), batch_id, request).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => runner_error_to_response(e),
    }
}
