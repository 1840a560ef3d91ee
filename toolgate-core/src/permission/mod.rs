//! Building blocks of the permission coordinator.
//!
//! # Overview
//!
//! - **[`ModeState`]**: Tracked [`PermissionMode`] and per-call override precedence
//! - **[`ToolInvocationIndex`]**: Maps `(tool name, input)` to the identifier the
//!   message stream announced, first-seen-first-matched
//! - **[`PendingRequestRegistry`]**: Live human-decision requests, each settled exactly once
//! - **[`EditToolClassifier`]**: Which tools `acceptEdits` lets through
//! - **[`DecisionTransport`]**: Where permission requests are sent
//!
//! Most callers use these through [`crate::PermissionCoordinator`].
//!
//! # Modes
//!
//! | Mode | Edit-class tools | Other tools |
//! |------|------------------|-------------|
//! | `default` | ask | ask |
//! | `acceptEdits` | allow | ask |
//! | `bypassPermissions` | allow | allow |
//! | `plan` | ask | ask |
//!
//! # Example
//!
//! ```rust
//! use toolgate_core::permission::{Decision, PendingRequestRegistry};
//!
//! # tokio_test::block_on(async {
//! let registry = PendingRequestRegistry::new();
//! let pending = registry.create("toolu_01").unwrap();
//!
//! // Later, the decision transport answers
//! registry.resolve("toolu_01", Decision::allow()).unwrap();
//!
//! assert!(pending.wait().await.is_allow());
//! # });
//! ```

mod classifier;
mod decision;
mod index;
mod mode;
mod registry;
mod transport;

pub use classifier::{DefaultEditTools, EditToolClassifier, DEFAULT_EDIT_TOOLS};
pub use decision::{Decision, Verdict, CANCELLED_MESSAGE};
pub use index::{
    hash_input, InvocationKey, ToolInvocationIndex, ToolInvocationRecord, DEFAULT_INDEX_CAPACITY,
};
pub use mode::{CallModeOverride, ModeState, ParseModeError, PermissionMode};
pub use registry::{CancelNotifier, PendingDecision, PendingRequestRegistry, TIMEOUT_MESSAGE};
pub use transport::{
    ChannelTransport, DecisionTransport, PermissionRequest, TransportError,
    DEFAULT_CHANNEL_CAPACITY,
};
