//! The permission coordinator
//!
//! [`PermissionCoordinator`] is the façade the surrounding layers talk to:
//!
//! - the message-source adapter calls [`PermissionCoordinator::ingest_message`]
//!   for every inbound message,
//! - the operator-facing layer calls [`PermissionCoordinator::set_mode`] and
//!   [`PermissionCoordinator::reset`],
//! - the tool-execution layer calls [`PermissionCoordinator::decide`] before
//!   running any tool,
//! - the decision transport answers with [`PermissionCoordinator::resolve`].
//!
//! ## Deciding
//!
//! Each call reads the effective mode exactly once. Bypass, and accept-edits
//! on an edit-class tool, are allowed on the spot without looking at the
//! message stream. Everything else is matched to the identifier the stream
//! announced for it, registered as pending, and forwarded to the transport.
//!
//! ```rust
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use toolgate_core::{
//!     CallModeOverride, ChannelTransport, Decision, Message, PermissionCoordinator,
//!     PermissionMode, ToolUseBlock,
//! };
//!
//! # tokio_test::block_on(async {
//! let (transport, mut requests) = ChannelTransport::new();
//! let coordinator = PermissionCoordinator::builder()
//!     .with_transport(transport)
//!     .build()
//!     .unwrap();
//!
//! coordinator.ingest_message(&Message::assistant_with_tool_use(
//!     "Listing files",
//!     vec![ToolUseBlock::new("toolu_01", "Bash", json!({"command": "ls"}))],
//! ));
//!
//! let call = CallModeOverride::with_mode(PermissionMode::Default);
//! let verdict = coordinator
//!     .decide("Bash", &json!({"command": "ls"}), Some(&call), &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert_eq!(verdict.tool_call_id(), Some("toolu_01"));
//!
//! // The transport side answers
//! let request = requests.recv().await.unwrap();
//! coordinator.resolve(&request.tool_call_id, Decision::allow()).unwrap();
//!
//! assert!(verdict.into_decision().await.is_allow());
//! # });
//! ```
//!
//! ## Unresolved invocations
//!
//! A call can reach `decide` before the message announcing it has been
//! ingested. That surfaces as [`crate::PermissionError::UnresolvedInvocation`];
//! the caller decides whether to retry, typically after
//! [`PermissionCoordinator::subscribe_ingest`] reports new announcements.

mod builder;

pub use builder::CoordinatorBuilder;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{HookId, PermissionEvent, PermissionHook};
use crate::permission::{
    CallModeOverride, CancelNotifier, Decision, DecisionTransport, EditToolClassifier, ModeState,
    PendingRequestRegistry, PermissionMode, PermissionRequest, ToolInvocationIndex, Verdict,
    CANCELLED_MESSAGE,
};
use crate::types::Message;

type HookMap = parking_lot::RwLock<HashMap<HookId, Arc<dyn PermissionHook>>>;

/// Decides whether tool invocations may run, asking a human when needed.
pub struct PermissionCoordinator {
    mode: ModeState,
    index: ToolInvocationIndex,
    registry: PendingRequestRegistry,
    transport: Arc<dyn DecisionTransport>,
    classifier: Arc<dyn EditToolClassifier>,
    decision_timeout: Option<Duration>,
    hooks: Arc<HookMap>,
    next_hook_id: AtomicU64,
}

impl std::fmt::Debug for PermissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCoordinator")
            .field("mode", &self.mode.mode())
            .field("unmatched_invocations", &self.index.len())
            .field("pending_requests", &self.registry.len())
            .field("decision_timeout", &self.decision_timeout)
            .finish_non_exhaustive()
    }
}

impl PermissionCoordinator {
    /// Create a new [`CoordinatorBuilder`]
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    // ===== Message stream =====

    /// Record the tool-use announcements in `message`.
    ///
    /// Must be called in arrival order. Returns how many announcements were
    /// recorded.
    pub fn ingest_message(&self, message: &Message) -> usize {
        let records = self.index.ingest(message);
        for record in &records {
            log::debug!("recorded invocation {} ({})", record.id, record.name);
            self.emit_event(PermissionEvent::InvocationRecorded {
                tool_use_id: record.id.clone(),
                tool_name: record.name.clone(),
            });
        }
        records.len()
    }

    /// Watch the running count of recorded announcements.
    pub fn subscribe_ingest(&self) -> watch::Receiver<u64> {
        self.index.subscribe()
    }

    // ===== Mode =====

    /// Current tracked mode.
    pub fn mode(&self) -> PermissionMode {
        self.mode.mode()
    }

    /// Change the tracked mode used by calls that carry no mode override.
    pub fn set_mode(&self, mode: PermissionMode) {
        let previous = self.mode.set_mode(mode);
        log::info!("permission mode changed: {} -> {}", previous, mode);
        self.emit_event(PermissionEvent::ModeChanged {
            previous,
            current: mode,
        });
    }

    /// Return the tracked mode to `default`.
    ///
    /// Pending requests are left alone; use [`Self::cancel_all`] to drop them.
    pub fn reset(&self) {
        let previous = self.mode.reset();
        log::info!("permission mode reset from {}", previous);
        self.emit_event(PermissionEvent::ModeChanged {
            previous,
            current: PermissionMode::Default,
        });
    }

    /// Mode that applies to a call carrying `call`.
    pub fn effective_mode(&self, call: Option<&CallModeOverride>) -> PermissionMode {
        self.mode.effective_mode(call)
    }

    /// Whether `tool_name` is edit-class for `acceptEdits`.
    pub fn is_edit_tool(&self, tool_name: &str) -> bool {
        self.classifier.is_edit_tool(tool_name)
    }

    // ===== Deciding =====

    /// Decide whether `tool_name` may run with `input`.
    ///
    /// Returns [`Verdict::Immediate`] when no human is needed and
    /// [`Verdict::Pending`] once the request has been handed to the transport.
    /// If `cancellation` has already fired by the time a human would be
    /// needed, the call ends with a cancelled deny and nothing is registered.
    /// If it fires while the transport is still accepting the request, the
    /// request is withdrawn and the call ends with a cancelled deny.
    ///
    /// Every cancellation of the returned request, whether by token, timeout,
    /// drop or [`Self::cancel`], emits [`PermissionEvent::PermissionCancelled`].
    ///
    /// # Errors
    ///
    /// - [`crate::PermissionError::UnresolvedInvocation`] if no ingested
    ///   announcement matches the call yet
    /// - [`crate::PermissionError::DuplicateRequest`] if the matched identifier
    ///   already has a live request. The matched announcement is consumed.
    /// - [`crate::PermissionError::Transport`] if the transport rejected the
    ///   request. The announcement is put back, so the call can be retried.
    pub async fn decide(
        &self,
        tool_name: &str,
        input: &Value,
        call: Option<&CallModeOverride>,
        cancellation: &CancellationToken,
    ) -> Result<Verdict> {
        let mode = self.mode.effective_mode(call);

        match mode {
            PermissionMode::BypassPermissions => return Ok(self.auto_allow(tool_name, mode)),
            PermissionMode::AcceptEdits if self.classifier.is_edit_tool(tool_name) => {
                return Ok(self.auto_allow(tool_name, mode));
            }
            _ => {}
        }

        if cancellation.is_cancelled() {
            log::debug!("{} cancelled before registration", tool_name);
            return Ok(Verdict::Immediate(Decision::cancelled(CANCELLED_MESSAGE)));
        }

        let record = match self.index.take(tool_name, input) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("{} has no announced invocation to match yet", tool_name);
                self.emit_event(PermissionEvent::InvocationUnresolved {
                    tool_name: tool_name.to_string(),
                    input: input.clone(),
                });
                return Err(err);
            }
        };
        let tool_call_id = record.id.clone();

        let mut pending = self
            .registry
            .create(tool_call_id.clone())
            .inspect_err(|err| log::warn!("{}", err))?
            .with_cancellation(cancellation.clone());
        if let Some(timeout) = self.decision_timeout {
            pending = pending.with_deadline(tokio::time::Instant::now() + timeout);
        }

        let request = PermissionRequest {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.to_string(),
            input: input.clone(),
            effective_mode: mode,
            created_at: pending.created_at(),
        };

        self.emit_event(PermissionEvent::PermissionRequired {
            tool_use_id: tool_call_id.clone(),
            tool_name: tool_name.to_string(),
            params: input.clone(),
            mode,
        });

        let forwarded = tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            result = self.transport.request_decision(request) => Some(result),
        };

        match forwarded {
            None => {
                pending.cancel();
                self.report_cancelled(&tool_call_id, CANCELLED_MESSAGE);
                return Ok(Verdict::Immediate(Decision::cancelled(CANCELLED_MESSAGE)));
            }
            Some(Err(err)) => {
                log::warn!("could not forward request {}: {}", tool_call_id, err);
                pending.cancel();
                self.index.requeue(record);
                return Err(err.into());
            }
            Some(Ok(())) => {}
        }

        log::debug!("awaiting decision for {} ({})", tool_call_id, tool_name);
        Ok(Verdict::Pending(
            pending.with_cancel_notifier(self.cancel_notifier()),
        ))
    }

    /// [`Self::decide`], then wait for the final decision.
    pub async fn decide_and_wait(
        &self,
        tool_name: &str,
        input: &Value,
        call: Option<&CallModeOverride>,
        cancellation: &CancellationToken,
    ) -> Result<Decision> {
        let verdict = self.decide(tool_name, input, call, cancellation).await?;
        Ok(verdict.into_decision().await)
    }

    fn auto_allow(&self, tool_name: &str, mode: PermissionMode) -> Verdict {
        log::debug!("{} allowed by {} mode", tool_name, mode);
        self.emit_event(PermissionEvent::AutoAllowed {
            tool_name: tool_name.to_string(),
            mode,
        });
        Verdict::Immediate(Decision::allow())
    }

    // ===== Answers =====

    /// Deliver the decision for a pending request.
    ///
    /// Returns [`crate::PermissionError::UnknownRequest`] if the request already
    /// settled or never existed. That happens legitimately when an answer
    /// races a cancellation, so callers should log it and move on.
    pub fn resolve(&self, tool_call_id: &str, decision: Decision) -> Result<()> {
        let event = match &decision {
            Decision::Allow { updated_input } => PermissionEvent::PermissionGranted {
                tool_use_id: tool_call_id.to_string(),
                input_updated: updated_input.is_some(),
            },
            Decision::Deny {
                message,
                cancelled: true,
            } => PermissionEvent::PermissionCancelled {
                tool_use_id: tool_call_id.to_string(),
                reason: message.clone(),
            },
            Decision::Deny { message, .. } => PermissionEvent::PermissionDenied {
                tool_use_id: tool_call_id.to_string(),
                reason: message.clone(),
            },
        };

        match self.registry.resolve(tool_call_id, decision) {
            Ok(()) => {
                log::info!("decision received for {}", tool_call_id);
                self.emit_event(event);
                Ok(())
            }
            Err(err) => {
                log::debug!("ignoring decision: {}", err);
                Err(err)
            }
        }
    }

    /// Cancel one pending request.
    pub fn cancel(&self, tool_call_id: &str, reason: &str) -> Result<()> {
        match self.registry.cancel(tool_call_id, reason) {
            Ok(()) => {
                self.report_cancelled(tool_call_id, reason);
                Ok(())
            }
            Err(err) => {
                log::debug!("nothing to cancel: {}", err);
                Err(err)
            }
        }
    }

    /// Cancel every pending request, returning how many were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids = self.registry.pending_ids();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id, reason).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    fn report_cancelled(&self, tool_call_id: &str, reason: &str) {
        report_cancelled(&self.hooks, tool_call_id, reason);
    }

    /// Reports cancellations the pending handle makes on its own.
    fn cancel_notifier(&self) -> CancelNotifier {
        let hooks = Arc::clone(&self.hooks);
        Arc::new(move |tool_call_id: &str, reason: &str| {
            report_cancelled(&hooks, tool_call_id, reason)
        })
    }

    // ===== Introspection =====

    /// The invocation index.
    pub fn index(&self) -> &ToolInvocationIndex {
        &self.index
    }

    /// The pending request registry.
    pub fn registry(&self) -> &PendingRequestRegistry {
        &self.registry
    }

    /// Number of requests awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    // ===== Hooks =====

    /// Register a hook, returning an id for [`Self::remove_hook`].
    pub fn add_hook(&self, hook: impl PermissionHook + 'static) -> HookId {
        let id = HookId(self.next_hook_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().insert(id, Arc::new(hook));
        id
    }

    /// Remove a hook. Returns false if it was not registered.
    pub fn remove_hook(&self, id: HookId) -> bool {
        self.hooks.write().remove(&id).is_some()
    }

    /// Emit an event to all registered hooks
    fn emit_event(&self, event: PermissionEvent) {
        emit(&self.hooks, event);
    }
}

fn emit(hooks: &HookMap, event: PermissionEvent) {
    let hooks: Vec<_> = hooks.read().values().cloned().collect();
    for hook in hooks {
        hook.on_event(&event);
    }
}

fn report_cancelled(hooks: &HookMap, tool_call_id: &str, reason: &str) {
    log::info!("cancelled request {}: {}", tool_call_id, reason);
    emit(
        hooks,
        PermissionEvent::PermissionCancelled {
            tool_use_id: tool_call_id.to_string(),
            reason: reason.to_string(),
        },
    );
}
