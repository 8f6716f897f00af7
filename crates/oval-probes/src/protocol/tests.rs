//! Unit tests for the frame envelope.

use rstest::rstest;
use serde_json::json;

use super::*;

#[test]
fn command_frame_reads_probe_output() {
    let line = r#"{"kind":"command","id":7,"command":"ste_fetch","payload":["a","b"]}"#;
    let frame: Frame = serde_json::from_str(line).expect("parse");
    assert_eq!(
        frame,
        Frame::Command {
            id: 7,
            command: ProbeCommand::StateFetch,
            payload: json!(["a", "b"]),
        }
    );
}

#[test]
fn command_payload_defaults_to_null() {
    let frame: Frame =
        serde_json::from_str(r#"{"kind":"command","id":1,"command":"obj_eval"}"#).expect("parse");
    assert!(matches!(
        frame,
        Frame::Command { payload: serde_json::Value::Null, .. }
    ));
}

#[test]
fn command_reply_carries_tagged_outcome() {
    let frame = Frame::CommandReply {
        id: 3,
        outcome: CommandOutcome::States {
            states: vec![json!({"id": "s1"})],
        },
    };
    let value = serde_json::to_value(&frame).expect("serialise");
    assert_eq!(
        value,
        json!({
            "kind": "command_reply",
            "id": 3,
            "outcome": {"status": "states", "states": [{"id": "s1"}]}
        })
    );
}

#[test]
fn unknown_kind_is_rejected() {
    let result = serde_json::from_str::<Frame>(r#"{"kind":"hello","payload":1}"#);
    assert!(result.is_err());
}

#[test]
fn unknown_command_is_rejected() {
    let result =
        serde_json::from_str::<Frame>(r#"{"kind":"command","id":1,"command":"var_ref"}"#);
    assert!(result.is_err());
    assert_eq!(
        "var_ref".parse::<ProbeCommand>(),
        Err(UnknownCommand("var_ref".into()))
    );
}

#[rstest]
#[case(CommandOutcome::Ack, true)]
#[case(CommandOutcome::States { states: vec![] }, true)]
#[case(CommandOutcome::error("unknown object id 'x'"), false)]
fn outcome_success_flag(#[case] outcome: CommandOutcome, #[case] expected: bool) {
    assert_eq!(outcome.is_success(), expected);
}

#[test]
fn frame_kind_names_match_wire_tags() {
    for frame in [
        Frame::request(json!(null)),
        Frame::reply(json!(null)),
        Frame::CommandReply {
            id: 1,
            outcome: CommandOutcome::Ack,
        },
    ] {
        let value = serde_json::to_value(&frame).expect("serialise");
        assert_eq!(value.get("kind").and_then(|k| k.as_str()), Some(frame.kind()));
    }
}
