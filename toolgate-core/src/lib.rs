//! # toolgate
//!
//! Decides whether an agent may run a tool call without asking a human, and
//! coordinates the human decision when it may not.
//!
//! The coordinator sits between a streaming message source (an assistant
//! announcing `tool_use` blocks) and an operator who grants or denies each
//! call. It
//!
//! - tracks an authorization mode (`default`, `acceptEdits`,
//!   `bypassPermissions`, `plan`) that each call may override,
//! - matches a permission request back to the identifier the message stream
//!   assigned to that exact invocation,
//! - allows on the spot when the effective mode permits it, and otherwise
//!   registers a pending request, forwards it to a [`DecisionTransport`], and
//!   settles it exactly once with the answer or a cancellation.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use toolgate_core::{
//!     CallModeOverride, ChannelTransport, PermissionCoordinator, PermissionMode,
//! };
//!
//! # tokio_test::block_on(async {
//! let (transport, _requests) = ChannelTransport::new();
//! let coordinator = PermissionCoordinator::builder()
//!     .with_transport(transport)
//!     .build()?;
//!
//! // Bypass needs neither a human nor an announced invocation
//! let call = CallModeOverride::with_mode(PermissionMode::BypassPermissions);
//! let decision = coordinator
//!     .decide_and_wait("Read", &json!({"file_path": "/f"}), Some(&call), &CancellationToken::new())
//!     .await?;
//! assert!(decision.is_allow());
//! # Ok::<(), toolgate_core::PermissionError>(())
//! # }).unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils` - [`test_utils::RecordingTransport`] and [`test_utils::EventCollector`]

pub mod coordinator;
pub mod error;
pub mod events;
pub mod permission;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use coordinator::{CoordinatorBuilder, PermissionCoordinator};
pub use error::{PermissionError, Result};
pub use events::{HookId, PermissionEvent, PermissionHook};

pub use permission::{
    hash_input, CallModeOverride, ChannelTransport, Decision, DecisionTransport, DefaultEditTools,
    EditToolClassifier, InvocationKey, ModeState, PendingDecision, PendingRequestRegistry,
    PermissionMode, PermissionRequest, ToolInvocationIndex, ToolInvocationRecord, TransportError,
    Verdict, DEFAULT_EDIT_TOOLS, DEFAULT_INDEX_CAPACITY,
};
pub use types::{ContentBlock, Message, Role, ToolResultBlock, ToolUseBlock};
