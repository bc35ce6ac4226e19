use std::sync::Arc;

use crate::executor::BatchExecutor;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<BatchExecutor>,
}

impl AppState {
    pub fn new(executor: BatchExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }
}
