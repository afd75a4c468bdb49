//! Shared application state for the server.

use std::sync::Arc;

use forge::io::config::ForgeConfig;

/// Shared state accessible from all request handlers.
///
/// Generic over the completion service and sandbox so tests can mount the
/// router on scripted collaborators.
pub struct AppState<C, S> {
    pub gateway: Arc<C>,
    pub sandbox: Arc<S>,
    /// Loaded once at startup; every request runs with the same settings.
    pub config: Arc<ForgeConfig>,
}

impl<C, S> AppState<C, S> {
    pub fn new(gateway: C, sandbox: S, config: ForgeConfig) -> Self {
        Self {
            gateway: Arc::new(gateway),
            sandbox: Arc::new(sandbox),
            config: Arc::new(config),
        }
    }
}

impl<C, S> Clone for AppState<C, S> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            sandbox: Arc::clone(&self.sandbox),
            config: Arc::clone(&self.config),
        }
    }
}
