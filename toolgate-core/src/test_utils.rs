//! Test utilities for toolgate-core.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! toolgate-core = { version = "...", features = ["test-utils"] }
//! ```
//!
//! # Example
//!
//! ```rust
//! use toolgate_core::test_utils::{EventCollector, RecordingTransport};
//! use toolgate_core::PermissionCoordinator;
//!
//! let transport = RecordingTransport::new();
//! let events = EventCollector::new();
//! let coordinator = PermissionCoordinator::builder()
//!     .with_transport(transport.clone())
//!     .add_hook(events.clone())
//!     .build()
//!     .unwrap();
//!
//! coordinator.reset();
//! assert_eq!(events.event_types(), vec!["ModeChanged"]);
//! assert!(transport.requests().is_empty());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::events::{PermissionEvent, PermissionHook};
use crate::permission::{DecisionTransport, PermissionRequest, TransportError};

/// A transport that records every request instead of asking anyone.
///
/// Clones share the same record, so keep one clone for assertions and hand
/// another to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<PermissionRequest>>>,
    fail_next: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<PermissionRequest> {
        self.requests.lock().clone()
    }

    /// Identifiers of all requests received so far.
    pub fn request_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.tool_call_id.clone())
            .collect()
    }

    /// Make the next request fail with [`TransportError::Closed`].
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Wait until at least `count` requests have been recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<PermissionRequest> {
        loop {
            let notified = self.notify.notified();
            {
                let requests = self.requests.lock();
                if requests.len() >= count {
                    return requests.clone();
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl DecisionTransport for RecordingTransport {
    async fn request_decision(&self, request: PermissionRequest) -> Result<(), TransportError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.requests.lock().push(request);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Collects events emitted by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<PermissionEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<PermissionEvent> {
        self.events.lock().clone()
    }

    /// Variant names of the events received so far.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .map(|event| match event {
                PermissionEvent::ModeChanged { .. } => "ModeChanged",
                PermissionEvent::InvocationRecorded { .. } => "InvocationRecorded",
                PermissionEvent::AutoAllowed { .. } => "AutoAllowed",
                PermissionEvent::InvocationUnresolved { .. } => "InvocationUnresolved",
                PermissionEvent::PermissionRequired { .. } => "PermissionRequired",
                PermissionEvent::PermissionGranted { .. } => "PermissionGranted",
                PermissionEvent::PermissionDenied { .. } => "PermissionDenied",
                PermissionEvent::PermissionCancelled { .. } => "PermissionCancelled",
            })
            .collect()
    }
}

impl PermissionHook for EventCollector {
    fn on_event(&self, event: &PermissionEvent) {
        self.events.lock().push(event.clone());
    }
}
