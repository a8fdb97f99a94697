use lever_stream::{
    FrameReader, Identify, List, Message, MonitorError, MonitorUpdate, Unwrap, WatchList,
    WatchSummary, Wrap,
};
use serde_json::json;

fn conversation() -> Vec<Message> {
    vec![
        Message::Identify(Identify::game(Some("test".to_string()))),
        Message::Wrap(Wrap {
            id: "hp".to_string(),
            path: "Root.player.Health".to_string(),
        }),
        Message::MonitorUpdate(MonitorUpdate {
            id: "hp".to_string(),
            value: json!(57),
            ts: 1,
        }),
        Message::List(List {}),
        Message::WatchList(WatchList {
            entries: vec![WatchSummary {
                id: "hp".to_string(),
                path: "Root.player.Health".to_string(),
            }],
        }),
        Message::MonitorError(MonitorError {
            id: Some("bad".to_string()),
            message: "path segment `nope` not found".to_string(),
        }),
        Message::Unwrap(Unwrap {
            id: "hp".to_string(),
        }),
    ]
}

#[test]
fn frames_survive_arbitrary_read_boundaries() {
    let messages = conversation();
    let mut stream = Vec::new();
    for message in &messages {
        stream.extend(message.encode().expect("encode message"));
    }

    for chunk_size in [1usize, 3, 7, 12, 13, 64, stream.len()] {
        let mut reader = FrameReader::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            reader.push(chunk);
            while let Some(message) = reader.next_message().expect("valid stream") {
                decoded.push(message);
            }
        }
        assert_eq!(decoded, messages, "chunk size {chunk_size}");
        assert_eq!(reader.pending(), 0);
    }
}

#[test]
fn identify_announces_game_client() {
    let bytes = Message::Identify(Identify::game(None))
        .encode()
        .expect("encode identify");
    let mut reader = FrameReader::new();
    reader.push(&bytes);
    match reader.next_message().expect("decode identify") {
        Some(Message::Identify(identify)) => {
            assert_eq!(identify.client_type, "game");
            assert!(identify.build.is_none());
        }
        other => panic!("expected identify, got {other:?}"),
    }
}
