use serde_json::Value;

use crate::permission::PermissionMode;

/// Events emitted by the permission coordinator
///
/// These events let observers follow mode changes and every permission
/// decision without wrapping the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionEvent {
    // ===== Mode =====
    /// Tracked mode changed (via `set_mode` or `reset`)
    ModeChanged {
        /// Mode before the change
        previous: PermissionMode,
        /// Mode after the change
        current: PermissionMode,
    },

    // ===== Message Stream =====
    /// A tool-use announcement was recorded from the message stream
    InvocationRecorded {
        /// Identifier assigned by the message source
        tool_use_id: String,
        /// Tool name
        tool_name: String,
    },

    // ===== Decisions =====
    /// Call allowed without asking (bypass or accept-edits)
    AutoAllowed {
        /// Tool name
        tool_name: String,
        /// Mode that allowed it
        mode: PermissionMode,
    },

    /// No announcement matched the call yet
    InvocationUnresolved {
        /// Tool name
        tool_name: String,
        /// Tool input parameters
        input: Value,
    },

    /// Call forwarded to the decision transport
    PermissionRequired {
        /// Invocation identifier the answer must reference
        tool_use_id: String,
        /// Tool name
        tool_name: String,
        /// Tool input parameters
        params: Value,
        /// Mode that applied to the call
        mode: PermissionMode,
    },

    /// Pending call approved
    PermissionGranted {
        /// Invocation identifier
        tool_use_id: String,
        /// Whether the answer edited the input
        input_updated: bool,
    },

    /// Pending call denied by the decision maker
    PermissionDenied {
        /// Invocation identifier
        tool_use_id: String,
        /// Reason for denial
        reason: String,
    },

    /// Pending call cancelled before an answer arrived
    PermissionCancelled {
        /// Invocation identifier
        tool_use_id: String,
        /// Why it was cancelled
        reason: String,
    },
}

/// Hook for observing permission events
///
/// Implement this trait to receive notifications about coordinator activity.
///
/// # Example
/// ```
/// use toolgate_core::events::{PermissionEvent, PermissionHook};
///
/// struct Logger;
///
/// impl PermissionHook for Logger {
///     fn on_event(&self, event: &PermissionEvent) {
///         match event {
///             PermissionEvent::PermissionRequired { tool_name, .. } => {
///                 println!("Asking about: {}", tool_name);
///             }
///             PermissionEvent::ModeChanged { current, .. } => {
///                 println!("Mode is now {}", current);
///             }
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait PermissionHook: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &PermissionEvent);
}

/// Blanket implementation for closures
impl<F> PermissionHook for F
where
    F: Fn(&PermissionEvent) + Send + Sync,
{
    fn on_event(&self, event: &PermissionEvent) {
        self(event)
    }
}

/// Unique identifier for a registered hook.
///
/// Used to remove hooks via [`crate::PermissionCoordinator::remove_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_hook() {
        let seen = AtomicUsize::new(0);
        let hook = |event: &PermissionEvent| {
            if matches!(event, PermissionEvent::ModeChanged { .. }) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        };

        hook.on_event(&PermissionEvent::ModeChanged {
            previous: PermissionMode::Default,
            current: PermissionMode::Plan,
        });
        hook.on_event(&PermissionEvent::AutoAllowed {
            tool_name: "Read".into(),
            mode: PermissionMode::BypassPermissions,
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
