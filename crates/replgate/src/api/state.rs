//! Application state shared across handlers.

use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    /// Live interpreter sessions.
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self { sessions }
    }
}
