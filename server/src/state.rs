use std::sync::Arc;
use std::time::Instant;

use mixtape::Mixtape;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub mixtape: Arc<Mixtape>,
    /// Cancelled on server shutdown; open event streams end with it.
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(mixtape: Mixtape, shutdown: CancellationToken) -> Self {
        Self {
            mixtape: Arc::new(mixtape),
            shutdown,
            start_time: Instant::now(),
        }
    }
}
