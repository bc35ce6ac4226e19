use serde_json::Value;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use uuid::Uuid;

/// Hands out one throwaway session per row. Sessions are never pooled or
/// reused, so concurrent rows cannot see each other's state.
#[derive(Clone)]
pub struct SessionFactory {
    app_name: String,
    user_id: String,
    open: Arc<AtomicUsize>,
}

/// Execution context for a single row. The agent writes its outputs into
/// `state`, keyed by output key.
pub struct ItemSession {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub state: HashMap<String, Value>,
    open: Arc<AtomicUsize>,
}

impl SessionFactory {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn create(&self) -> ItemSession {
        self.open.fetch_add(1, Ordering::SeqCst);
        ItemSession {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: Uuid::new_v4().to_string(),
            state: HashMap::new(),
            open: self.open.clone(),
        }
    }

    /// Sessions created and not yet torn down.
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl ItemSession {
    pub fn state_text(&self, key: &str) -> Option<String> {
        match self.state.get(key)? {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl Drop for ItemSession {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
