//! Encoding then decoding preserves command names and argument fields.

use protocol::{
    Command, DecodedMessage, Execute, ReplyGetSIStack, ReplyGetThreads, SaveChanges, StackEntry,
    ThreadInfo, WindowContent, decode, encode,
};
use serde_json::json;

fn round_trip(command: Command) {
    let payload = encode(&command).expect("encoding");
    assert_eq!(
        decode(&payload),
        DecodedMessage::Command(command.clone()),
        "payload {payload}"
    );
}

#[test]
fn representative_commands_round_trip() {
    round_trip(Command::Execute(Execute {
        text: "      ⍳5\n".to_string(),
        trace: true,
    }));
    round_trip(Command::OpenWindow(WindowContent {
        token: 700,
        name: "Foo".to_string(),
        filename: "/ws/Foo.aplf".to_string(),
        text: vec!["r←Foo y".to_string(), "r←y+1".to_string()],
        current_row: 4,
        debugger: true,
        stop: vec![1],
        tid: Some(3),
        tname: "worker".to_string(),
        ..Default::default()
    }));
    round_trip(Command::ReplyGetThreads(ReplyGetThreads {
        threads: vec![ThreadInfo {
            tid: 0,
            description: "Main".to_string(),
            state: "Session".to_string(),
            ..Default::default()
        }],
    }));
    round_trip(Command::ReplyGetSIStack(ReplyGetSIStack {
        stack: vec![StackEntry {
            description: "#.Foo[1]".to_string(),
        }],
        tid: 0,
    }));
    round_trip(Command::SaveChanges(SaveChanges {
        win: 9,
        text: vec!["Foo".to_string()],
        ..Default::default()
    }));
    round_trip(Command::StrongInterrupt);
}

#[test]
fn unknown_command_round_trips_raw_fields() {
    let args = json!({"title": "Confirm", "options": ["Yes", "No"], "token": 12});
    let command = Command::Unknown {
        name: "OptionsDialog".to_string(),
        args: args.as_object().cloned().unwrap(),
    };
    round_trip(command);
}

#[test]
fn every_known_name_decodes_from_empty_arguments() {
    for name in Command::KNOWN {
        let decoded = decode(&format!(r#"["{name}",{{}}]"#));
        let command = decoded.into_command().expect("command");
        assert!(command.is_known(), "{name} should be known");
        assert_eq!(command.name(), *name);
    }
}
