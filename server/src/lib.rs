//! HTTP API for the mixtape pipeline.
//!
//! Thin axum layer over [`mixtape::Mixtape`]: JSON endpoints for submit,
//! status and cancel, a server-sent event stream per job and a streamed
//! archive download.

pub mod error;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
