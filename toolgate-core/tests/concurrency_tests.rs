mod common;

use std::sync::Arc;

use common::{announce, coordinator, signal};
use futures::future::join_all;
use serde_json::json;
use toolgate_core::test_utils::{EventCollector, RecordingTransport};
use toolgate_core::{
    CallModeOverride, Decision, Message, PermissionCoordinator, PermissionMode, ToolUseBlock,
};

#[tokio::test]
async fn test_cancellation_while_awaiting_human() {
    let (coordinator, _transport) = coordinator();
    announce(&coordinator, "t1", "Bash", json!({"command": "sleep 100"}));

    let token = signal();
    let verdict = coordinator
        .decide("Bash", &json!({"command": "sleep 100"}), None, &token)
        .await
        .unwrap();
    assert_eq!(coordinator.pending_count(), 1);

    let waiter = tokio::spawn(verdict.into_decision());
    tokio::task::yield_now().await;
    token.cancel();

    let decision = waiter.await.unwrap();
    assert!(decision.is_deny());
    assert!(decision.is_cancelled());
    assert_eq!(coordinator.pending_count(), 0);

    // A late answer is ignorable, not a failure of the coordinator
    let err = coordinator.resolve("t1", Decision::allow()).unwrap_err();
    assert!(err.is_ignorable());

    // Cancelling again is a no-op
    token.cancel();
}

#[tokio::test]
async fn test_cancellation_after_resolution_is_noop() {
    let (coordinator, _transport) = coordinator();
    announce(&coordinator, "t1", "Bash", json!({}));

    let token = signal();
    let verdict = coordinator.decide("Bash", &json!({}), None, &token).await.unwrap();
    coordinator.resolve("t1", Decision::allow()).unwrap();
    token.cancel();

    assert_eq!(verdict.into_decision().await, Decision::allow());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_and_resolve_race_settles_once() {
    for round in 0..100 {
        let (coordinator, _transport) = coordinator();
        let coordinator = Arc::new(coordinator);
        let id = format!("t{}", round);
        announce(&coordinator, &id, "Bash", json!({"round": round}));

        let token = signal();
        let verdict = coordinator
            .decide("Bash", &json!({"round": round}), None, &token)
            .await
            .unwrap();

        let resolver = {
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            tokio::spawn(async move { coordinator.resolve(&id, Decision::allow()).is_ok() })
        };
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move { token.cancel() })
        };

        let decision = verdict.into_decision().await;
        let resolved = resolver.await.unwrap();
        canceller.await.unwrap();

        if resolved {
            assert_eq!(decision, Decision::allow(), "round {}", round);
        } else {
            assert!(decision.is_cancelled(), "round {}", round);
        }
        assert_eq!(coordinator.pending_count(), 0);
    }
}

#[tokio::test]
async fn test_parallel_identical_calls_match_in_order() {
    let (coordinator, transport) = coordinator();
    let input = json!({"command": "git status"});
    coordinator.ingest_message(&Message::assistant_with_tool_use(
        "Checking twice",
        vec![
            ToolUseBlock::new("a", "Bash", input.clone()),
            ToolUseBlock::new("b", "Bash", input.clone()),
            ToolUseBlock::new("c", "Bash", input.clone()),
        ],
    ));

    let mut verdicts = Vec::new();
    for _ in 0..3 {
        verdicts.push(coordinator.decide("Bash", &input, None, &signal()).await.unwrap());
    }

    let ids: Vec<_> = verdicts.iter().filter_map(|v| v.tool_call_id()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(coordinator.pending_count(), 3);
    assert_eq!(transport.request_ids(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_independent_requests_resolve_in_any_order() {
    let transport = RecordingTransport::new();
    let coordinator = Arc::new(
        PermissionCoordinator::builder()
            .with_transport(transport.clone())
            .build()
            .unwrap(),
    );

    for i in 0..5 {
        announce(&coordinator, &format!("t{}", i), "Bash", json!({"n": i}));
    }

    let waits = (0..5).map(|i| {
        let coordinator = Arc::clone(&coordinator);
        async move {
            coordinator
                .decide_and_wait("Bash", &json!({"n": i}), None, &signal())
                .await
                .unwrap()
        }
    });
    let all = tokio::spawn(join_all(waits));

    let requests = transport.wait_for(5).await;
    for request in requests.iter().rev() {
        let decision = if request.tool_call_id == "t2" {
            Decision::deny("not that one")
        } else {
            Decision::allow()
        };
        coordinator.resolve(&request.tool_call_id, decision).unwrap();
    }

    let decisions = all.await.unwrap();
    for (i, decision) in decisions.iter().enumerate() {
        if i == 2 {
            assert_eq!(decision, &Decision::deny("not that one"));
        } else {
            assert!(decision.is_allow(), "t{} should be allowed", i);
        }
    }
}

#[tokio::test]
async fn test_mode_change_does_not_affect_overridden_call() {
    let (coordinator, transport) = coordinator();
    let events = EventCollector::new();
    coordinator.add_hook(events.clone());
    announce(&coordinator, "t1", "Bash", json!({"command": "ls"}));

    // The operator flips to bypass while a call decided under `default` is in flight
    let call = CallModeOverride::with_mode(PermissionMode::Default);
    let verdict = coordinator
        .decide("Bash", &json!({"command": "ls"}), Some(&call), &signal())
        .await
        .unwrap();
    coordinator.set_mode(PermissionMode::BypassPermissions);

    assert!(verdict.is_pending());
    assert_eq!(transport.requests()[0].effective_mode, PermissionMode::Default);

    // And a call that already carries bypass does not wait for the tracked mode
    coordinator.reset();
    let call = CallModeOverride::with_mode(PermissionMode::BypassPermissions);
    let verdict = coordinator
        .decide("Bash", &json!({"command": "rm"}), Some(&call), &signal())
        .await
        .unwrap();
    assert!(verdict.is_immediate());

    assert_eq!(
        events.event_types(),
        vec![
            "InvocationRecorded",
            "PermissionRequired",
            "ModeChanged",
            "ModeChanged",
            "AutoAllowed",
        ]
    );
}

#[tokio::test]
async fn test_dropped_verdict_frees_registry() {
    let (coordinator, _transport) = coordinator();
    announce(&coordinator, "t1", "Bash", json!({}));

    let verdict = coordinator.decide("Bash", &json!({}), None, &signal()).await.unwrap();
    assert_eq!(coordinator.pending_count(), 1);
    drop(verdict);
    assert_eq!(coordinator.pending_count(), 0);

    assert!(coordinator.resolve("t1", Decision::allow()).is_err());
}

#[tokio::test]
async fn test_ingest_interleaved_with_decisions() {
    let (coordinator, _transport) = coordinator();
    let coordinator = Arc::new(coordinator);
    let mut ingested = coordinator.subscribe_ingest();

    let decider = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            loop {
                match coordinator
                    .decide("Read", &json!({"file_path": "/late"}), None, &signal())
                    .await
                {
                    Ok(verdict) => return verdict.tool_call_id().map(str::to_string),
                    Err(err) if err.is_recoverable() => {
                        if ingested.changed().await.is_err() {
                            return None;
                        }
                    }
                    Err(_) => return None,
                }
            }
        })
    };

    tokio::task::yield_now().await;
    announce(&coordinator, "other", "Read", json!({"file_path": "/other"}));
    announce(&coordinator, "late", "Read", json!({"file_path": "/late"}));

    assert_eq!(decider.await.unwrap(), Some("late".to_string()));
}
