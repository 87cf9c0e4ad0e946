// ABOUTME: Shared state handed to every request handler

use std::sync::Arc;

use crate::session::{SessionLifecycleManager, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub sessions: Arc<SessionLifecycleManager>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, sessions: Arc<SessionLifecycleManager>) -> Self {
        Self { registry, sessions }
    }
}
