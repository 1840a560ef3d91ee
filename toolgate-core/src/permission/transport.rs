//! Seam to whoever answers permission requests.
//!
//! A transport only has to deliver a [`PermissionRequest`] somewhere a human
//! (or a UI, or a remote client) can see it. The answer comes back later
//! through [`crate::PermissionCoordinator::resolve`] keyed by
//! `tool_call_id`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::mode::PermissionMode;

/// Default buffer size for [`ChannelTransport`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Errors raised while handing a request to the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The receiving side is gone
    #[error("decision channel closed")]
    Closed,

    /// Transport-specific failure
    #[error("{0}")]
    Other(String),
}

/// A request for a human decision on one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Identifier to answer with
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
    /// Mode that applied when the request was made
    pub effective_mode: PermissionMode,
    pub created_at: DateTime<Utc>,
}

/// Delivers permission requests to the decision maker.
#[async_trait]
pub trait DecisionTransport: Send + Sync {
    /// Hand off `request`. Must not wait for the answer.
    async fn request_decision(&self, request: PermissionRequest) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> DecisionTransport for Arc<T>
where
    T: DecisionTransport + ?Sized,
{
    async fn request_decision(&self, request: PermissionRequest) -> Result<(), TransportError> {
        (**self).request_decision(request).await
    }
}

/// Transport that forwards requests over a tokio mpsc channel.
///
/// # Example
///
/// ```rust
/// use toolgate_core::permission::ChannelTransport;
///
/// let (transport, mut requests) = ChannelTransport::new();
/// # drop(transport);
/// # tokio_test::block_on(async { assert!(requests.recv().await.is_none()) });
/// ```
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<PermissionRequest>,
}

impl ChannelTransport {
    /// Create a transport with [`DEFAULT_CHANNEL_CAPACITY`] buffered requests.
    pub fn new() -> (Self, mpsc::Receiver<PermissionRequest>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<PermissionRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DecisionTransport for ChannelTransport {
    async fn request_decision(&self, request: PermissionRequest) -> Result<(), TransportError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| TransportError::Closed)
    }
}
