//! Permission decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::PendingDecision;

/// Message carried by a deny produced by cancellation.
pub const CANCELLED_MESSAGE: &str = "Tool use aborted";

/// Final answer for one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "camelCase")]
pub enum Decision {
    /// Run the tool, optionally with an edited input.
    Allow {
        #[serde(
            rename = "updatedInput",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        updated_input: Option<Value>,
    },

    /// Do not run the tool.
    Deny {
        /// Reason shown to the model
        message: String,
        /// Set when the deny came from cancellation rather than a human answer
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
    },
}

impl Decision {
    /// Allow with the original input.
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
        }
    }

    /// Allow with an edited input.
    pub fn allow_with_input(input: Value) -> Self {
        Self::Allow {
            updated_input: Some(input),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            cancelled: false,
        }
    }

    /// Deny-equivalent outcome of a cancelled request.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Deny {
            message: reason.into(),
            cancelled: true,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Deny { cancelled: true, .. })
    }

    /// Edited input, if the decision carries one.
    pub fn updated_input(&self) -> Option<&Value> {
        match self {
            Self::Allow { updated_input } => updated_input.as_ref(),
            Self::Deny { .. } => None,
        }
    }
}

/// Result of [`crate::PermissionCoordinator::decide`].
#[derive(Debug)]
pub enum Verdict {
    /// Decided without asking anyone.
    Immediate(Decision),
    /// Waiting on the decision transport.
    Pending(PendingDecision),
}

impl Verdict {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The immediate decision, if there is one.
    pub fn immediate(&self) -> Option<&Decision> {
        match self {
            Self::Immediate(decision) => Some(decision),
            Self::Pending(_) => None,
        }
    }

    /// Identifier of the pending request, if there is one.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::Immediate(_) => None,
            Self::Pending(pending) => Some(pending.tool_call_id()),
        }
    }

    /// Wait for the final decision.
    pub async fn into_decision(self) -> Decision {
        match self {
            Self::Immediate(decision) => decision,
            Self::Pending(pending) => pending.wait().await,
        }
    }
}
