use super::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::resolve_labels))
        .route("/ping", get(handlers::ping))
}
