use crate::supervisor::StreamSupervisor;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<StreamSupervisor>,
}

impl AppState {
    pub fn new(supervisor: Arc<StreamSupervisor>) -> Self {
        Self { supervisor }
    }
}
