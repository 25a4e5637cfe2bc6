use serde_json::Value;

use crate::error::HookError;

/// Synchronous hook callback.
///
/// `args` are the task's stored arguments, passed positionally. The return
/// value is collected by [`crate::HookRegistry::invoke`] but is otherwise
/// opaque to the scheduler.
pub trait HookCallback: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<Value, HookError>;
}

impl<F> HookCallback for F
where
    F: Fn(&[Value]) -> Result<Value, HookError> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> Result<Value, HookError> {
        self(args)
    }
}

/// What happened when a hook name was invoked.
#[derive(Debug)]
pub enum HookOutcome {
    /// No callback is registered under the name.
    NotRegistered,
    /// Every callback ran; their return values in registration order.
    Completed(Vec<Value>),
    /// Callback number `index` (0-based) returned an error; later callbacks
    /// were not called.
    Failed { index: usize, error: HookError },
}

impl HookOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HookOutcome::Completed(_))
    }

    /// Failure text for the run log, `None` on success.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            HookOutcome::NotRegistered => Some("no callback registered for hook".to_string()),
            HookOutcome::Completed(_) => None,
            HookOutcome::Failed { error, .. } => Some(error.to_string()),
        }
    }
}
