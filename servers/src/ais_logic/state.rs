use lib_relay::core::{Dispatcher, Registry};
use std::sync::Arc;

/// Shared handles for the upstream task and the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    // Live set of downstream clients
    pub registry: Arc<Registry>,
    // Fans every upstream frame out to `registry`
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
        Self { registry, dispatcher }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
