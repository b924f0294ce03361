pub mod collab;
pub mod config;
pub mod tasks;
pub mod ws;

use std::sync::Arc;

use collab::SharedHub;
use config::CollabConfig;

/// Shared application state passed to the transport layer and background
/// tasks. Constructed once at startup; the hub is the only mutable part
/// and serializes its own access.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<CollabConfig>,
    pub hub: SharedHub,
    pub started_at: std::time::Instant,
}
