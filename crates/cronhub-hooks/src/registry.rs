use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HookError;
use crate::types::{HookCallback, HookOutcome};

/// Maps hook names to their callbacks, in registration order.
///
/// One registry is built per process at boot and handed to the task manager;
/// share it as `Arc<HookRegistry>`. Nothing here is persisted.
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, Vec<Arc<dyn HookCallback>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Append `callback` to the list for `hook`. Repeated registrations are
    /// all kept and all invoked.
    pub fn register<F>(&self, hook: impl Into<String>, callback: F)
    where
        F: Fn(&[Value]) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.register_arc(hook, Arc::new(callback));
    }

    pub fn register_arc(&self, hook: impl Into<String>, callback: Arc<dyn HookCallback>) {
        let hook = hook.into();
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let callbacks = hooks.entry(hook.clone()).or_default();
        callbacks.push(callback);
        debug!(%hook, count = callbacks.len(), "hook callback registered");
    }

    /// Drop every callback for `hook`. Silent no-op if the name is unknown.
    pub fn unregister(&self, hook: &str) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        if hooks.remove(hook).is_some() {
            debug!(hook, "hook unregistered");
        }
    }

    pub fn has_hook(&self, hook: &str) -> bool {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hook)
            .is_some_and(|cbs| !cbs.is_empty())
    }

    /// Registered hook names, sorted.
    pub fn hooks(&self) -> Vec<String> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = hooks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call every callback registered for `hook` in registration order.
    ///
    /// Stops at the first callback that returns an error. Panics are not
    /// caught here; the caller owns per-task isolation.
    pub fn invoke(&self, hook: &str, args: &[Value]) -> HookOutcome {
        // Clone the list out so callbacks run without the lock held and may
        // themselves register hooks.
        let callbacks: Vec<Arc<dyn HookCallback>> = {
            let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
            match hooks.get(hook) {
                Some(cbs) if !cbs.is_empty() => cbs.clone(),
                _ => {
                    warn!(hook, "no callback registered for hook");
                    return HookOutcome::NotRegistered;
                }
            }
        };

        let mut results = Vec::with_capacity(callbacks.len());
        for (index, callback) in callbacks.iter().enumerate() {
            let t = Instant::now();
            let result = callback.call(args);
            let elapsed_ms = t.elapsed().as_millis() as u64;

            match result {
                Ok(value) => {
                    debug!(hook, index, duration_ms = elapsed_ms, "hook callback completed");
                    results.push(value);
                }
                Err(error) => {
                    warn!(hook, index, duration_ms = elapsed_ms, %error, "hook callback failed");
                    return HookOutcome::Failed { index, error };
                }
            }
        }

        HookOutcome::Completed(results)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
