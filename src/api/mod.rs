//! HTTP API: the SSE chat endpoint and health check.

mod routes;

pub use routes::{build_router, AppState};
