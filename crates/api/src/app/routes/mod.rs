use axum::{routing::get, Router};

pub mod batches;
pub mod system;

/// Router for all authenticated (user-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/application-batches", batches::router())
}
