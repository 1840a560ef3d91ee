#![allow(dead_code)]

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use toolgate_core::test_utils::RecordingTransport;
use toolgate_core::{Message, PermissionCoordinator, ToolUseBlock};

/// Coordinator wired to a recording transport
pub fn coordinator() -> (PermissionCoordinator, RecordingTransport) {
    let transport = RecordingTransport::new();
    let coordinator = PermissionCoordinator::builder()
        .with_transport(transport.clone())
        .build()
        .unwrap();
    (coordinator, transport)
}

/// Ingest an assistant message announcing a single tool call
pub fn announce(coordinator: &PermissionCoordinator, id: &str, name: &str, input: Value) {
    coordinator.ingest_message(&Message::assistant_with_tool_use(
        "",
        vec![ToolUseBlock::new(id, name, input)],
    ));
}

/// A cancellation signal that has not fired
pub fn signal() -> CancellationToken {
    CancellationToken::new()
}
