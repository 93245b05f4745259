use nsexec_core::protocol::{decode_request, encode_request};
use nsexec_core::*;
use std::time::SystemTime;

#[test]
fn test_request_wire_format() {
    let spec = ProcessSpec::new("/bin/echo")
        .with_args(["hello", "world"])
        .with_user("app")
        .with_env("LANG=C");

    let frame = encode_request(&spec).unwrap();
    assert_eq!(frame.last(), Some(&b'\n'));

    let json: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(json["path"], "/bin/echo");
    assert_eq!(json["args"], serde_json::json!(["hello", "world"]));
    assert_eq!(json["user"], "app");

    assert_eq!(decode_request(&frame).unwrap(), spec);
}

#[test]
fn test_minimal_request_uses_defaults() {
    let spec = decode_request(br#"{"path":"/bin/true"}"#).unwrap();

    assert_eq!(spec.path, "/bin/true");
    assert!(spec.args.is_empty());
    assert!(spec.user.is_empty());
    assert!(spec.dir.is_none());
    assert!(spec.env.is_empty());
}

#[test]
fn test_decode_failures() {
    assert!(matches!(
        decode_request(b""),
        Err(Error::IncompleteRequest { .. })
    ));
    assert!(matches!(
        decode_request(br#"{"path":"/bin/tr"#),
        Err(Error::IncompleteRequest { .. })
    ));
    assert!(matches!(
        decode_request(b"[1, 2, 3]"),
        Err(Error::Decode { .. })
    ));
    assert!(matches!(
        decode_request(br#"{"path":""}"#),
        Err(Error::Decode { .. })
    ));

    // Both incomplete and malformed input are reported as decode failures.
    assert_eq!(decode_request(b"").unwrap_err().kind(), "decode");
}

#[test]
fn test_error_reply_crosses_the_wire() {
    let err = Error::UnknownUser {
        user: "ghost".to_string(),
    };
    let json = serde_json::to_string(&Response::failure(&err)).unwrap();

    let response: Response = serde_json::from_str(&json).unwrap();
    match response.into_result().unwrap_err() {
        remote @ Error::Remote { .. } => {
            assert_eq!(remote.kind(), "credential");
            assert!(remote.to_string().contains("ghost"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let ok = serde_json::to_string(&Response::success()).unwrap();
    assert_eq!(ok, "{}");
}

#[test]
fn test_exit_status_mapping() {
    assert_eq!(ExitStatus::from_code(0), ExitStatus::SUCCESS);
    assert_eq!(ExitStatus::from_code(3).as_raw(), 3);
    assert_eq!(ExitStatus::from_code(256).as_raw(), 0);
    assert_eq!(ExitStatus::from_signal(9).as_raw(), 137);
    assert!(ExitStatus::UNKNOWN.is_unknown());
    assert!(!ExitStatus::from_code(1).is_unknown());
}

#[test]
fn test_event_serialization() {
    let event = ProcessEvent::Exited {
        path: "/bin/echo".to_string(),
        status: ExitStatus::from_code(2),
        timestamp: SystemTime::now(),
    };

    let json = serde_json::to_string(&event).unwrap();
    let back: ProcessEvent = serde_json::from_str(&json).unwrap();

    assert_eq!(back.path(), "/bin/echo");
    assert!(!back.is_critical());
    match back {
        ProcessEvent::Exited { status, .. } => assert_eq!(status.as_raw(), 2),
        other => panic!("unexpected event: {other}"),
    }
}

#[test]
fn test_user_record_credentials() {
    let record = UserRecord::new("app", 1000, 1001);
    let creds = record.credentials();

    assert_eq!(creds, Credentials::new(1000, 1001));
    assert_eq!(creds.to_string(), "1000:1001");
}
