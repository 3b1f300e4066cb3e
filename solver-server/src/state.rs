//! Shared application state for the upload server.

use std::path::PathBuf;
use std::sync::Arc;

use solver::io::config::SolverConfig;

/// Shared state accessible from all request handlers.
///
/// Holds no generator state: each request builds its own backends so the
/// proxy fallback of one request never leaks into another.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SolverConfig>,
    /// Directory every uploaded file is written to.
    pub save_dir: PathBuf,
}

impl AppState {
    pub fn new(config: SolverConfig, save_dir: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            save_dir,
        }
    }
}
