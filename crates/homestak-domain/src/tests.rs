use crate::types::*;

#[test]
fn node_status_display_is_snake_case() {
    assert_eq!(NodeStatus::AwaitingAddress.to_string(), "awaiting_address");
    assert_eq!(NodeStatus::Ready.to_string(), "ready");
}

#[test]
fn on_error_default_is_stop() {
    assert_eq!(OnError::default(), OnError::Stop);
}

#[test]
fn execution_mode_round_trips_through_json() {
    let e = Execution {
        mode: ExecutionMode::Pull,
        spec: Some("guest.yaml".into()),
    };
    let json = serde_json::to_string(&e).unwrap();
    let back: Execution = serde_json::from_str(&json).unwrap();
    assert_eq!(e, back);
}
