//! In-flight human-decision requests.
//!
//! Each live request owns a single-assignment cell (a oneshot sender) stored
//! under the registry lock. Resolving, cancelling, timing out and dropping all
//! begin by removing that cell from the map, so exactly one of them ever
//! writes the outcome and every later attempt sees `UnknownRequest`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::decision::{Decision, CANCELLED_MESSAGE};
use crate::error::{PermissionError, Result};

/// Deny message used when a request outlives its decision timeout.
pub const TIMEOUT_MESSAGE: &str = "Authorization request timed out";

/// Called with `(tool_call_id, reason)` when a handle cancels its own request.
pub type CancelNotifier = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug)]
struct Entry {
    ticket: u64,
    created_at: DateTime<Utc>,
    sender: oneshot::Sender<Decision>,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, Entry>,
    next_ticket: u64,
}

/// Tracks pending requests keyed by invocation identifier.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Debug, Clone, Default)]
pub struct PendingRequestRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `id`.
    ///
    /// Fails with [`PermissionError::DuplicateRequest`] if a live request for
    /// `id` already exists.
    pub fn create(&self, id: impl Into<String>) -> Result<PendingDecision> {
        let id = id.into();
        let (sender, receiver) = oneshot::channel();
        let created_at = Utc::now();

        let ticket = {
            let mut state = self.state.lock();
            if state.entries.contains_key(&id) {
                return Err(PermissionError::DuplicateRequest(id));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.entries.insert(
                id.clone(),
                Entry {
                    ticket,
                    created_at,
                    sender,
                },
            );
            ticket
        };

        Ok(PendingDecision {
            tool_call_id: id,
            created_at,
            ticket,
            receiver: Some(receiver),
            registry: self.clone(),
            cancellation: CancellationToken::new(),
            deadline: None,
            on_cancel: None,
        })
    }

    /// Complete the request for `id` with `decision`.
    pub fn resolve(&self, id: &str, decision: Decision) -> Result<()> {
        let entry = self.take(id, None)?;
        // The receiver may already be gone; the request is settled either way.
        let _ = entry.sender.send(decision);
        Ok(())
    }

    /// Complete the request for `id` with a cancellation deny.
    pub fn cancel(&self, id: &str, reason: impl Into<String>) -> Result<()> {
        let entry = self.take(id, None)?;
        let _ = entry.sender.send(Decision::cancelled(reason));
        Ok(())
    }

    /// Cancel every live request, returning how many were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let entries: Vec<Entry> = {
            let mut state = self.state.lock();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in entries {
            let _ = entry.sender.send(Decision::cancelled(reason));
        }
        count
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// When the live request for `id` was created.
    pub fn created_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().entries.get(id).map(|e| e.created_at)
    }

    /// Identifiers of all live requests, oldest first.
    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state
            .entries
            .iter()
            .map(|(id, entry)| (entry.ticket, id.clone()))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Remove the entry for `id`, optionally only if it carries `ticket`.
    fn take(&self, id: &str, ticket: Option<u64>) -> Result<Entry> {
        let mut state = self.state.lock();
        let live = state
            .entries
            .get(id)
            .is_some_and(|entry| ticket.map_or(true, |t| t == entry.ticket));
        if !live {
            return Err(PermissionError::UnknownRequest(id.to_string()));
        }
        state
            .entries
            .remove(id)
            .ok_or_else(|| PermissionError::UnknownRequest(id.to_string()))
    }

    fn cancel_ticket(&self, id: &str, ticket: u64, reason: &str) -> bool {
        match self.take(id, Some(ticket)) {
            Ok(entry) => {
                let _ = entry.sender.send(Decision::cancelled(reason));
                true
            }
            Err(_) => false,
        }
    }
}

/// The caller's handle on a pending request.
///
/// Awaiting [`PendingDecision::wait`] yields the outcome. The request is
/// cancelled when the attached [`CancellationToken`] fires, when the optional
/// deadline passes, or when the handle is dropped before settling.
pub struct PendingDecision {
    tool_call_id: String,
    created_at: DateTime<Utc>,
    ticket: u64,
    receiver: Option<oneshot::Receiver<Decision>>,
    registry: PendingRequestRegistry,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    on_cancel: Option<CancelNotifier>,
}

impl std::fmt::Debug for PendingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDecision")
            .field("tool_call_id", &self.tool_call_id)
            .field("created_at", &self.created_at)
            .field("ticket", &self.ticket)
            .field("deadline", &self.deadline)
            .field("has_cancel_notifier", &self.on_cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl PendingDecision {
    /// Identifier of the invocation this request is for.
    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Cancel the request when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cancel the request if no decision has arrived by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run `notify` whenever this handle cancels its own request, whether
    /// through [`Self::cancel`], the token, the deadline or a drop.
    ///
    /// Cancellations made through the registry by id do not call it.
    pub fn with_cancel_notifier(mut self, notify: CancelNotifier) -> Self {
        self.on_cancel = Some(notify);
        self
    }

    /// Cancel this request now.
    ///
    /// Returns `false` if the request had already settled. Calling it again
    /// is harmless.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CANCELLED_MESSAGE)
    }

    fn cancel_with(&self, reason: &str) -> bool {
        let cancelled = self
            .registry
            .cancel_ticket(&self.tool_call_id, self.ticket, reason);
        if cancelled {
            if let Some(notify) = &self.on_cancel {
                notify(&self.tool_call_id, reason);
            }
        }
        cancelled
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> Decision {
        let Some(mut receiver) = self.receiver.take() else {
            return Decision::cancelled(CANCELLED_MESSAGE);
        };

        let deadline = self.deadline;
        let timeout = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let reason = tokio::select! {
            biased;
            result = &mut receiver => return settle(result),
            _ = self.cancellation.cancelled() => CANCELLED_MESSAGE,
            _ = timeout => TIMEOUT_MESSAGE,
        };

        // Losing the race to a concurrent resolve is fine: whichever side
        // removed the entry has already written the cell.
        self.cancel_with(reason);
        settle(receiver.await)
    }
}

fn settle(result: std::result::Result<Decision, oneshot::error::RecvError>) -> Decision {
    result.unwrap_or_else(|_| Decision::cancelled(CANCELLED_MESSAGE))
}

impl Drop for PendingDecision {
    fn drop(&mut self) {
        if self.cancel_with(CANCELLED_MESSAGE) {
            log::debug!(
                "pending request {} dropped before settling",
                self.tool_call_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_and_resolve() {
        let registry = PendingRequestRegistry::new();
        let pending = registry.create("t1").unwrap();
        assert_eq!(pending.tool_call_id(), "t1");
        assert!(registry.contains("t1"));

        registry.resolve("t1", Decision::allow()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(pending.wait().await, Decision::allow());
    }

    #[test]
    fn test_duplicate_request() {
        let registry = PendingRequestRegistry::new();
        let _pending = registry.create("t1").unwrap();

        let err = registry.create("t1").unwrap_err();
        assert!(err.is_logic_defect());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_id_reusable_after_settle() {
        let registry = PendingRequestRegistry::new();
        let _first = registry.create("t1").unwrap();
        registry.resolve("t1", Decision::allow()).unwrap();

        assert!(registry.create("t1").is_ok());
    }

    #[tokio::test]
    async fn test_resolve_twice_keeps_first() {
        let registry = PendingRequestRegistry::new();
        let pending = registry.create("t1").unwrap();

        registry.resolve("t1", Decision::deny("no")).unwrap();
        let err = registry.resolve("t1", Decision::allow()).unwrap_err();
        assert!(err.is_ignorable());

        assert_eq!(pending.wait().await, Decision::deny("no"));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = PendingRequestRegistry::new();
        let err = registry.resolve("nope", Decision::allow()).unwrap_err();
        assert!(matches!(err, PermissionError::UnknownRequest(ref id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_cancel_then_resolve() {
        let registry = PendingRequestRegistry::new();
        let pending = registry.create("t1").unwrap();

        registry.cancel("t1", "user interrupted").unwrap();
        assert!(registry.resolve("t1", Decision::allow()).is_err());
        assert!(registry.cancel("t1", "again").is_err());

        let decision = pending.wait().await;
        assert!(decision.is_cancelled());
        assert_eq!(decision, Decision::cancelled("user interrupted"));
    }

    #[tokio::test]
    async fn test_token_cancels_waiting_request() {
        let registry = PendingRequestRegistry::new();
        let token = CancellationToken::new();
        let pending = registry
            .create("t1")
            .unwrap()
            .with_cancellation(token.clone());

        let waiter = tokio::spawn(pending.wait());
        tokio::task::yield_now().await;
        token.cancel();

        let decision = waiter.await.unwrap();
        assert!(decision.is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_before_token_fires() {
        let registry = PendingRequestRegistry::new();
        let token = CancellationToken::new();
        let pending = registry
            .create("t1")
            .unwrap()
            .with_cancellation(token.clone());

        registry.resolve("t1", Decision::allow()).unwrap();
        token.cancel();

        assert_eq!(pending.wait().await, Decision::allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels() {
        let registry = PendingRequestRegistry::new();
        let pending = registry
            .create("t1")
            .unwrap()
            .with_deadline(Instant::now() + Duration::from_secs(5));

        let decision = pending.wait().await;
        assert_eq!(decision, Decision::cancelled(TIMEOUT_MESSAGE));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_removes_entry() {
        let registry = PendingRequestRegistry::new();
        let pending = registry.create("t1").unwrap();
        drop(pending);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_drop_keeps_newer_entry() {
        let registry = PendingRequestRegistry::new();
        let first = registry.create("t1").unwrap();
        registry.resolve("t1", Decision::allow()).unwrap();

        let _second = registry.create("t1").unwrap();
        drop(first);
        assert!(registry.contains("t1"));
    }

    #[test]
    fn test_handle_cancel_is_idempotent() {
        let registry = PendingRequestRegistry::new();
        let pending = registry.create("t1").unwrap();
        assert!(pending.cancel());
        assert!(!pending.cancel());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifier_sees_handle_cancellations() {
        let registry = PendingRequestRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier: CancelNotifier = {
            let seen = Arc::clone(&seen);
            Arc::new(move |id: &str, reason: &str| {
                seen.lock().push((id.to_string(), reason.to_string()))
            })
        };

        let token = CancellationToken::new();
        let by_token = registry
            .create("token")
            .unwrap()
            .with_cancellation(token.clone())
            .with_cancel_notifier(Arc::clone(&notifier));
        token.cancel();
        assert!(by_token.wait().await.is_cancelled());

        let by_deadline = registry
            .create("deadline")
            .unwrap()
            .with_deadline(Instant::now() + Duration::from_secs(1))
            .with_cancel_notifier(Arc::clone(&notifier));
        by_deadline.wait().await;

        let by_drop = registry
            .create("drop")
            .unwrap()
            .with_cancel_notifier(Arc::clone(&notifier));
        drop(by_drop);

        assert_eq!(
            *seen.lock(),
            vec![
                ("token".to_string(), CANCELLED_MESSAGE.to_string()),
                ("deadline".to_string(), TIMEOUT_MESSAGE.to_string()),
                ("drop".to_string(), CANCELLED_MESSAGE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_notifier_skipped_when_answered() {
        let registry = PendingRequestRegistry::new();
        let seen = Arc::new(Mutex::new(0usize));
        let pending = registry.create("t1").unwrap().with_cancel_notifier({
            let seen = Arc::clone(&seen);
            Arc::new(move |_: &str, _: &str| *seen.lock() += 1)
        });

        registry.resolve("t1", Decision::allow()).unwrap();
        assert_eq!(pending.wait().await, Decision::allow());

        let pending = registry.create("t2").unwrap().with_cancel_notifier({
            let seen = Arc::clone(&seen);
            Arc::new(move |_: &str, _: &str| *seen.lock() += 1)
        });
        registry.cancel("t2", "by id").unwrap();
        drop(pending);

        assert_eq!(*seen.lock(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = PendingRequestRegistry::new();
        let a = registry.create("a").unwrap();
        let b = registry.create("b").unwrap();
        assert_eq!(registry.pending_ids(), vec!["a".to_string(), "b".to_string()]);

        assert_eq!(registry.cancel_all("session reset"), 2);
        assert!(registry.is_empty());
        assert_eq!(a.wait().await, Decision::cancelled("session reset"));
        assert_eq!(b.wait().await, Decision::cancelled("session reset"));
    }

    #[tokio::test]
    async fn test_concurrent_resolve_and_cancel_settle_once() {
        for _ in 0..64 {
            let registry = PendingRequestRegistry::new();
            let token = CancellationToken::new();
            let pending = registry
                .create("t1")
                .unwrap()
                .with_cancellation(token.clone());

            let resolver = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.resolve("t1", Decision::allow()).is_ok() })
            };
            let canceller = tokio::spawn(async move { token.cancel() });

            let decision = pending.wait().await;
            let resolved = resolver.await.unwrap();
            canceller.await.unwrap();

            if resolved {
                assert_eq!(decision, Decision::allow());
            } else {
                assert!(decision.is_cancelled());
            }
            assert!(registry.is_empty());
        }
    }
}
