mod detect;
mod health;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use detect::DetectRequestError;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/ping", get(health::ping))
        .route("/detect", post(detect::detect))
}
