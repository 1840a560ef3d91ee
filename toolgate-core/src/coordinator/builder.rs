//! CoordinatorBuilder for fluent coordinator construction

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PermissionError, Result};
use crate::events::{HookId, PermissionHook};
use crate::permission::{
    DecisionTransport, DefaultEditTools, EditToolClassifier, ModeState, PendingRequestRegistry,
    PermissionMode, ToolInvocationIndex, DEFAULT_INDEX_CAPACITY,
};

use super::PermissionCoordinator;

/// Builder for creating a [`PermissionCoordinator`]
///
/// Use `PermissionCoordinator::builder()` to create a new builder, configure
/// it with the `with_*` methods, and call `.build()`.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use toolgate_core::{ChannelTransport, PermissionCoordinator, PermissionMode};
///
/// let (transport, _requests) = ChannelTransport::new();
/// let coordinator = PermissionCoordinator::builder()
///     .with_transport(transport)
///     .with_mode(PermissionMode::AcceptEdits)
///     .with_edit_tools(["Edit", "Write"])
///     .with_decision_timeout(Duration::from_secs(300))
///     .build()
///     .unwrap();
///
/// assert_eq!(coordinator.mode(), PermissionMode::AcceptEdits);
/// ```
pub struct CoordinatorBuilder {
    mode: PermissionMode,
    transport: Option<Arc<dyn DecisionTransport>>,
    classifier: Arc<dyn EditToolClassifier>,
    index_capacity: usize,
    /// Cancel pending requests after this long (None waits forever)
    decision_timeout: Option<Duration>,
    hooks: Vec<Arc<dyn PermissionHook>>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("mode", &self.mode)
            .field("has_transport", &self.transport.is_some())
            .field("index_capacity", &self.index_capacity)
            .field("decision_timeout", &self.decision_timeout)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl CoordinatorBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            mode: PermissionMode::default(),
            transport: None,
            classifier: Arc::new(DefaultEditTools::default()),
            index_capacity: DEFAULT_INDEX_CAPACITY,
            decision_timeout: None,
            hooks: Vec::new(),
        }
    }

    /// Set where permission requests are sent. Required.
    pub fn with_transport(mut self, transport: impl DecisionTransport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set a shared transport.
    pub fn with_shared_transport(mut self, transport: Arc<dyn DecisionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Initial tracked mode (default: `PermissionMode::Default`)
    pub fn with_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Classify exactly these tool names as edit-class.
    pub fn with_edit_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifier = Arc::new(DefaultEditTools::from_names(names));
        self
    }

    /// Replace the edit-class classifier.
    pub fn with_edit_classifier(mut self, classifier: impl EditToolClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Bound on unmatched tool-use announcements kept for matching.
    ///
    /// Default: [`DEFAULT_INDEX_CAPACITY`]
    pub fn with_index_capacity(mut self, capacity: usize) -> Self {
        self.index_capacity = capacity;
        self
    }

    /// Cancel pending requests that get no answer within `timeout`.
    ///
    /// By default pending requests wait until answered or cancelled.
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = Some(timeout);
        self
    }

    /// Register a hook to observe coordinator events
    pub fn add_hook(mut self, hook: impl PermissionHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Build the coordinator
    ///
    /// Returns an error if no transport was configured.
    pub fn build(self) -> Result<PermissionCoordinator> {
        let transport = self.transport.ok_or_else(|| {
            PermissionError::Config(
                "No decision transport configured. Call .with_transport() before .build()"
                    .to_string(),
            )
        })?;

        let next_hook_id = self.hooks.len() as u64;
        let hooks: HashMap<HookId, Arc<dyn PermissionHook>> = self
            .hooks
            .into_iter()
            .enumerate()
            .map(|(i, hook)| (HookId(i as u64), hook))
            .collect();

        Ok(PermissionCoordinator {
            mode: ModeState::new(self.mode),
            index: ToolInvocationIndex::with_capacity(self.index_capacity),
            registry: PendingRequestRegistry::new(),
            transport,
            classifier: self.classifier,
            decision_timeout: self.decision_timeout,
            hooks: Arc::new(parking_lot::RwLock::new(hooks)),
            next_hook_id: AtomicU64::new(next_hook_id),
        })
    }
}
