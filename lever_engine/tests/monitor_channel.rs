use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use lever_engine::monitor::{Monitor, MonitorSettings, TcpChannel, TcpChannelConfig};
use lever_engine::{HostLink, Map, PathResolver};
use lever_stream::{FrameReader, List, Message, Wrap, GAME_CLIENT_TYPE};
use serde_json::json;

struct Peer {
    stream: TcpStream,
    frames: FrameReader,
}

impl Peer {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("accept monitor connection");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("read timeout");
        Self {
            stream,
            frames: FrameReader::new(),
        }
    }

    /// Collect messages until `done` accepts one (inclusive).
    fn read_until(&mut self, mut done: impl FnMut(&Message) -> bool) -> Vec<Message> {
        let mut seen = Vec::new();
        let mut buffer = [0u8; 1024];
        loop {
            while let Some(message) = self.frames.next_message().expect("valid frame") {
                let stop = done(&message);
                seen.push(message);
                if stop {
                    return seen;
                }
            }
            let read = self.stream.read(&mut buffer).expect("read from monitor");
            assert!(read > 0, "monitor closed the connection early");
            self.frames.push(&buffer[..read]);
        }
    }

    fn send(&mut self, message: Message) {
        let bytes = message.encode().expect("encode request");
        self.stream.write_all(&bytes).expect("write request");
    }
}

fn is_update(message: &Message, id: &str) -> bool {
    matches!(message, Message::MonitorUpdate(update) if update.id == id)
}

fn monitor_for(addr: SocketAddr, root: Map) -> Monitor {
    let mut config = TcpChannelConfig::new(addr);
    config.reconnect_delay = Duration::from_millis(50);
    Monitor::new(
        Rc::new(HostLink::with_root(root)),
        Rc::new(PathResolver::new()),
        Box::new(TcpChannel::new(config)),
        MonitorSettings {
            poll_interval: Duration::from_millis(10),
            throttle: Duration::from_millis(5),
        },
    )
}

/// Pump `monitor` on this thread until the listener thread reports back.
fn pump_until<T>(monitor: &mut Monitor, done: &Receiver<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        monitor.pump(Instant::now());
        if let Ok(result) = done.try_recv() {
            return result;
        }
        assert!(Instant::now() < deadline, "listener never finished");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn watch_streams_to_listener_and_answers_requests() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        let greeting = peer.read_until(|message| is_update(message, "h1"));
        peer.send(Message::Wrap(Wrap {
            id: "h2".to_string(),
            path: "Root.Health".to_string(),
        }));
        peer.send(Message::List(List {}));
        let replies = peer.read_until(|message| matches!(message, Message::WatchList(_)));
        tx.send((greeting, replies)).expect("report");
    });

    let root = Map::new();
    root.set("Health", 57);
    let mut monitor = monitor_for(addr, root);
    monitor
        .wrap("h1", "Root.Health", Instant::now())
        .expect("wrap h1");

    let (greeting, replies) = pump_until(&mut monitor, &rx);
    server.join().expect("listener thread");

    match greeting.first() {
        Some(Message::Identify(identify)) => assert_eq!(identify.client_type, GAME_CLIENT_TYPE),
        other => panic!("expected identify first, got {other:?}"),
    }
    match greeting.last() {
        Some(Message::MonitorUpdate(update)) => assert_eq!(update.value, json!(57)),
        other => panic!("expected an update, got {other:?}"),
    }

    assert!(replies.iter().any(|message| is_update(message, "h2")));
    match replies.last() {
        Some(Message::WatchList(list)) => {
            let ids: Vec<&str> = list.entries.iter().map(|entry| entry.id.as_str()).collect();
            assert_eq!(ids, vec!["h1", "h2"]);
        }
        other => panic!("expected a watch list, got {other:?}"),
    }
}

#[test]
fn reconnect_identifies_again_and_flushes_watches() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    let server = thread::spawn(move || {
        let mut first = Peer::accept(&listener);
        first.read_until(|message| is_update(message, "hp"));
        drop(first);

        let mut second = Peer::accept(&listener);
        let resent = second.read_until(|message| is_update(message, "hp"));
        tx.send(resent).expect("report");
    });

    let root = Map::new();
    root.set("Health", 12);
    let mut monitor = monitor_for(addr, root);
    monitor
        .wrap("hp", "Health", Instant::now())
        .expect("wrap hp");

    let resent = pump_until(&mut monitor, &rx);
    server.join().expect("listener thread");

    assert!(matches!(resent.first(), Some(Message::Identify(_))));
    match resent.last() {
        Some(Message::MonitorUpdate(update)) => assert_eq!(update.value, json!(12)),
        other => panic!("expected the flushed update, got {other:?}"),
    }
}
