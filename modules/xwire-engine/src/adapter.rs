//! The search adapter contract consumed by the plugin.
//!
//! Request and response shapes belong to the adapter; the engine only moves
//! JSON values around and listens for configuration changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Called with the new adapter configuration every time it changes.
pub type ConfigChangedListener = Box<dyn Fn(Value) + Send + Sync>;

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    async fn request(&self, endpoint: &str, request: Value) -> Result<Value>;

    /// Register a configuration change listener. Returns `false` if the
    /// adapter has no notion of configuration changes.
    fn add_config_changed_listener(&self, _listener: ConfigChangedListener) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// MemoryAdapter (canned responses for demos and tests)
// ---------------------------------------------------------------------------

/// In-memory adapter. Serves canned responses per endpoint, records every
/// request, and notifies listeners on [`MemoryAdapter::set_config`].
#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryAdapterState>,
}

#[derive(Default)]
struct MemoryAdapterState {
    responses: HashMap<String, Value>,
    requests: Vec<(String, Value)>,
    config: Value,
    listeners: Vec<Arc<ConfigChangedListener>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, endpoint: &str, response: Value) -> Self {
        self.lock().responses.insert(endpoint.to_string(), response);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryAdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.lock().requests.clone()
    }

    pub fn config(&self) -> Value {
        self.lock().config.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Replace the configuration and notify listeners.
    pub fn set_config(&self, config: Value) {
        let listeners = {
            let mut state = self.lock();
            state.config = config.clone();
            state.listeners.clone()
        };
        for listener in listeners {
            listener(config.clone());
        }
    }
}

#[async_trait]
impl SearchAdapter for MemoryAdapter {
    async fn request(&self, endpoint: &str, request: Value) -> Result<Value> {
        let mut state = self.lock();
        state.requests.push((endpoint.to_string(), request));
        state
            .responses
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No response configured for endpoint `{endpoint}`"))
    }

    fn add_config_changed_listener(&self, listener: ConfigChangedListener) -> bool {
        self.lock().listeners.push(Arc::new(listener));
        true
    }
}
