//! Named callbacks and action hooks that queue jobs refer to by string.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{QubusError, Result};

/// Processes one queue item. `Ok(true)` means the item is done and may be deleted.
pub type Callback = Arc<dyn Fn(&Value) -> Result<bool> + Send + Sync>;
/// Fired when a scheduled job runs.
pub type Action = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Default, Clone)]
pub struct Registry {
    callbacks: HashMap<String, Callback>,
    actions: HashMap<String, Vec<Action>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register<F>(&mut self, name: &str, callback: F)
    where
        F: Fn(&Value) -> Result<bool> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.to_string(), Arc::new(callback));
    }
    pub fn unregister(&mut self, name: &str) -> bool {
        self.callbacks.remove(name).is_some()
    }
    /// True when no callback is registered at all.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
    pub fn exists(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }
    pub fn invoke(&self, name: &str, payload: &Value) -> Result<bool> {
        let callback = self
            .callbacks
            .get(name)
            .ok_or_else(|| QubusError::StaleCallback(name.to_string()))?;
        callback(payload)
    }

    /// Hook `action` onto `hook`. Several actions may share a hook; they run in order.
    pub fn add_action<F>(&mut self, hook: &str, action: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.actions.entry(hook.to_string()).or_default().push(Arc::new(action));
    }
    pub fn has_action(&self, hook: &str) -> bool {
        self.actions.get(hook).is_some_and(|actions| !actions.is_empty())
    }
    /// Run every action on `hook`, stopping at the first failure. Returns how many ran.
    pub fn do_action(&self, hook: &str) -> Result<usize> {
        let Some(actions) = self.actions.get(hook) else {
            return Ok(0);
        };
        for action in actions {
            action()?;
        }
        Ok(actions.len())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut callbacks: Vec<&String> = self.callbacks.keys().collect();
        callbacks.sort();
        let mut actions: Vec<&String> = self.actions.keys().collect();
        actions.sort();
        f.debug_struct("Registry")
            .field("callbacks", &callbacks)
            .field("actions", &actions)
            .finish()
    }
}
