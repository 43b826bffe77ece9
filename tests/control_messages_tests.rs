use roundstream::control::{route, subject_for, ControlEnvelope, ControlMessage};
use roundstream::listener::ListenerState;

#[test]
fn test_heartbeat_serialization() {
    let envelope = ControlEnvelope::to(42, ControlMessage::Heartbeat);

    let json = serde_json::to_string(&envelope).unwrap();
    assert!(json.contains("\"session_id\":42"));
    assert!(json.contains("\"operation\":\"heartbeat\""));

    let deserialized: ControlEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, envelope);
}

#[test]
fn test_move_listener_deserialization() {
    let json = r#"{
        "session_id": 7,
        "message": {
            "operation": "move_listener",
            "listener": { "latitude": 45.5, "longitude": -73.6 }
        }
    }"#;

    let envelope: ControlEnvelope = serde_json::from_str(json).unwrap();
    assert_eq!(envelope.session_id, Some(7));
    assert_eq!(
        envelope.message,
        ControlMessage::MoveListener {
            listener: ListenerState::at(45.5, -73.6)
        }
    );
}

#[test]
fn test_modify_stream_fields_are_optional() {
    let json = r#"{ "session_id": 7, "message": { "operation": "modify_stream" } }"#;

    let envelope: ControlEnvelope = serde_json::from_str(json).unwrap();
    match envelope.message {
        ControlMessage::ModifyStream {
            tags,
            language,
            listener,
        } => {
            assert!(tags.is_none());
            assert!(language.is_none());
            assert_eq!(listener, ListenerState::unknown());
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn test_play_asset_requires_asset_id() {
    let json = r#"{ "session_id": 7, "message": { "operation": "play_asset" } }"#;
    assert!(serde_json::from_str::<ControlEnvelope>(json).is_err());

    let json = r#"{ "session_id": 7, "message": { "operation": "play_asset", "asset_id": 9 } }"#;
    let envelope: ControlEnvelope = serde_json::from_str(json).unwrap();
    assert_eq!(envelope.message, ControlMessage::PlayAsset { asset_id: 9 });
    assert_eq!(envelope.message.name(), "play_asset");
}

#[test]
fn test_unknown_operation_is_rejected() {
    let json = r#"{ "session_id": 7, "message": { "operation": "reboot" } }"#;
    assert!(serde_json::from_str::<ControlEnvelope>(json).is_err());
}

#[test]
fn test_routing_by_session() {
    let mine = ControlEnvelope::to(7, ControlMessage::SkipAhead);
    let theirs = ControlEnvelope::to(8, ControlMessage::SkipAhead);

    assert_eq!(route(mine, 7), Some(ControlMessage::SkipAhead));
    assert_eq!(route(theirs, 7), None);
}

#[test]
fn test_only_refresh_is_honored_from_broadcast() {
    let refresh = ControlEnvelope::broadcast(ControlMessage::RefreshRecordings);
    let skip = ControlEnvelope::broadcast(ControlMessage::SkipAhead);

    assert_eq!(route(refresh, 7), Some(ControlMessage::RefreshRecordings));
    assert_eq!(route(skip, 7), None);
}

#[test]
fn test_subjects() {
    assert_eq!(subject_for("roundstream.control", Some(7)), "roundstream.control.7");
    assert_eq!(subject_for("roundstream.control", None), "roundstream.control.all");
}
