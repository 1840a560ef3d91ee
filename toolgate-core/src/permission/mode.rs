//! Authorization modes and per-call overrides.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Coarse policy governing the default disposition toward tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Every call that is not otherwise allowed needs a human decision.
    #[default]
    Default,

    /// Edit-class tools run without confirmation; everything else asks.
    AcceptEdits,

    /// Every call runs without confirmation.
    BypassPermissions,

    /// Planning mode. Asks for every call, like `Default`.
    Plan,
}

impl PermissionMode {
    /// All modes, in the order they are usually presented.
    pub const ALL: [PermissionMode; 4] = [
        PermissionMode::Default,
        PermissionMode::AcceptEdits,
        PermissionMode::BypassPermissions,
        PermissionMode::Plan,
    ];

    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission mode: {0}")]
pub struct ParseModeError(pub String);

impl std::str::FromStr for PermissionMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// Per-call snapshot supplied by the caller at the moment of a request.
///
/// When `permission_mode` is set it is authoritative for the call; the
/// coordinator's tracked mode only applies when it is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallModeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

impl CallModeOverride {
    /// Override carrying only a permission mode.
    pub fn with_mode(mode: PermissionMode) -> Self {
        Self {
            permission_mode: Some(mode),
            ..Self::default()
        }
    }

    /// Set the model for this call.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl From<PermissionMode> for CallModeOverride {
    fn from(mode: PermissionMode) -> Self {
        Self::with_mode(mode)
    }
}

/// Process-local tracked mode.
#[derive(Debug, Default)]
pub struct ModeState {
    mode: RwLock<PermissionMode>,
}

impl ModeState {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode: RwLock::new(mode),
        }
    }

    /// Current tracked mode.
    pub fn mode(&self) -> PermissionMode {
        *self.mode.read()
    }

    /// Replace the tracked mode, returning the previous one.
    pub fn set_mode(&self, mode: PermissionMode) -> PermissionMode {
        std::mem::replace(&mut *self.mode.write(), mode)
    }

    /// Return the tracked mode to `Default`, returning the previous one.
    ///
    /// Pending requests are untouched.
    pub fn reset(&self) -> PermissionMode {
        self.set_mode(PermissionMode::Default)
    }

    /// Mode that applies to one call.
    pub fn effective_mode(&self, call: Option<&CallModeOverride>) -> PermissionMode {
        match call.and_then(|c| c.permission_mode) {
            Some(mode) => mode,
            None => self.mode(),
        }
    }
}
