// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

#[test]
fn host_message_tags_are_screaming() {
    let frame = HostMessage::Reset;
    let line = encode_frame(&frame).unwrap();
    assert_eq!(line, "{\"type\":\"RESET\"}\n");

    let init = HostMessage::InitPlugin {
        plugin_path: PathBuf::from("/plugins/echo"),
        plugin_name: "echo".to_string(),
        context: WorkerInitContext {
            working_dir: PathBuf::from("/work"),
            agent_id: "agent".to_string(),
            plugin_config: json!({}),
            capabilities: CapabilityDeclarations::default(),
            module_allow: vec![],
            module_deny: vec![],
        },
    };
    let value: Value = serde_json::from_str(encode_frame(&init).unwrap().trim()).unwrap();
    assert_eq!(value["type"], "INIT_PLUGIN");
    assert_eq!(value["plugin_name"], "echo");
}

#[test]
fn round_trip_tool_result() {
    let frame = WorkerMessage::ToolResult {
        request_id: RequestId::new("r-1"),
        result: Some("out".to_string()),
        error: None,
    };
    let line = encode_frame(&frame).unwrap();
    let back: WorkerMessage = decode_frame(&line).unwrap();
    assert_eq!(back, frame);
}

#[test]
fn host_request_flattens_rpc() {
    let frame = WorkerMessage::HostRequest {
        request_id: RequestId::new("r-9"),
        request: WorkerRpc::ProviderGet {
            id: "openai".to_string(),
        },
    };
    let value: Value = serde_json::from_str(encode_frame(&frame).unwrap().trim()).unwrap();
    assert_eq!(value["type"], "HOST_REQUEST");
    assert_eq!(value["method"], "provider_get");
    assert_eq!(value["params"]["id"], "openai");

    let back: WorkerMessage = decode_frame(&value.to_string()).unwrap();
    assert_eq!(back, frame);
}

#[test]
fn unit_rpc_variants_round_trip() {
    let frame = WorkerMessage::HostRequest {
        request_id: RequestId::new("r-2"),
        request: WorkerRpc::SessionList,
    };
    let line = encode_frame(&frame).unwrap();
    let back: WorkerMessage = decode_frame(&line).unwrap();
    assert_eq!(back, frame);
}

#[parameterized(
    not_json = { "this is not json" },
    array = { "[1, 2, 3]" },
    no_type = { "{\"foo\": 1}" },
    numeric_type = { "{\"type\": 42}" },
    unknown_tag = { "{\"type\": \"NO_SUCH_FRAME\"}" },
    empty = { "" },
)]
fn malformed_frames_dropped(line: &str) {
    assert_eq!(decode_frame::<WorkerMessage>(line), None);
    assert_eq!(decode_frame::<HostMessage>(line), None);
}

#[test]
fn known_tag_with_missing_fields_dropped() {
    // TOOL_RESULT requires request_id.
    assert_eq!(
        decode_frame::<WorkerMessage>("{\"type\": \"TOOL_RESULT\"}"),
        None
    );
}

#[test]
fn heartbeat_is_minimal() {
    let line = encode_frame(&WorkerMessage::Heartbeat).unwrap();
    assert_eq!(line, "{\"type\":\"HEARTBEAT\"}\n");
}

#[test]
fn event_frame_carries_bus_event() {
    let frame = HostMessage::Event {
        event: BusEvent::new("custom:tick", json!({"sessionId": "s"})),
    };
    let line = encode_frame(&frame).unwrap();
    let back: HostMessage = decode_frame(&line).unwrap();
    match back {
        HostMessage::Event { event } => assert_eq!(event.event_type, "custom:tick"),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn hook_catalog_defaults_empty() {
    let catalog: HookCatalog = serde_json::from_value(json!({})).unwrap();
    assert!(catalog.tools.is_empty());
    assert!(catalog.listeners.is_empty());
}
