//! Value monitor: watches host paths and streams their changes.
//!
//! Watches are polled on a fixed interval. Each poll re-resolves the path,
//! reduces the value to a canonical comparable and pushes an update when it
//! differs from the last one seen. Pushes for one id are throttled; changes
//! inside the throttle window are dropped rather than queued.

mod channel;
mod comparable;

pub use channel::{ChannelError, ChannelEvent, MonitorChannel, TcpChannel, TcpChannelConfig};
pub use comparable::{comparable, COMPARE_DEPTH, UNRESOLVED};

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lever_stream::{Message, MonitorError as WireError, MonitorUpdate, WatchList, WatchSummary};
use serde_json::Value as Json;
use thiserror::Error;

use crate::host::{HostLink, Value};
use crate::path::{PathError, PathResolver};

/// Nesting depth of composite values sent to the listener.
pub const UPDATE_VALUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Minimum time between two pushes for the same id.
    pub throttle: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(120),
            throttle: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("watch id must not be empty")]
    EmptyId,
    #[error("watch path must not be empty")]
    EmptyPath,
    #[error("cannot watch `{path}`: {source}")]
    Path {
        path: String,
        #[source]
        source: PathError,
    },
}

#[derive(Debug, Clone)]
struct WatchEntry {
    id: String,
    path: String,
    has_last_value: bool,
    last_comparable: Option<String>,
    /// Push on the next poll regardless of change and throttle.
    pending_force: bool,
    /// Pushed at least once over the current connection.
    delivered: bool,
}

impl WatchEntry {
    fn new(id: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_string(),
            has_last_value: false,
            last_comparable: None,
            pending_force: true,
            delivered: false,
        }
    }
}

pub struct Monitor {
    host: Rc<HostLink>,
    resolver: Rc<PathResolver>,
    channel: Box<dyn MonitorChannel>,
    settings: MonitorSettings,
    entries: Vec<WatchEntry>,
    last_push: HashMap<String, Instant>,
    next_poll: Option<Instant>,
    initialized: bool,
}

impl Monitor {
    pub fn new(
        host: Rc<HostLink>,
        resolver: Rc<PathResolver>,
        channel: Box<dyn MonitorChannel>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            host,
            resolver,
            channel,
            settings,
            entries: Vec::new(),
            last_push: HashMap::new(),
            next_poll: None,
            initialized: false,
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    /// Bring up the channel. Safe to call repeatedly.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.channel.init();
    }

    /// Start (or re-target) the watch `id` and push its current value as
    /// soon as the channel is connected.
    pub fn wrap(&mut self, id: &str, path: &str, now: Instant) -> Result<(), MonitorError> {
        let id = id.trim();
        let path = path.trim();
        if id.is_empty() {
            return Err(MonitorError::EmptyId);
        }
        if path.is_empty() {
            return Err(MonitorError::EmptyPath);
        }
        self.resolve(path).map_err(|source| MonitorError::Path {
            path: path.to_string(),
            source,
        })?;

        let index = match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries[index] = WatchEntry::new(id, path);
                index
            }
            None => {
                self.entries.push(WatchEntry::new(id, path));
                self.entries.len() - 1
            }
        };
        log::debug!("watching {id} -> {path}");

        self.init();
        if self.next_poll.is_none() {
            self.next_poll = Some(now + self.settings.poll_interval);
        }
        self.poll_entry(index, now);
        Ok(())
    }

    /// Drop the watch `id`. Returns whether it existed.
    pub fn unwrap(&mut self, id: &str) -> bool {
        let id = id.trim();
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.last_push.remove(id);
        if self.entries.is_empty() {
            self.next_poll = None;
        }
        before != self.entries.len()
    }

    /// `(id, path)` pairs in insertion order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|entry| (entry.id.clone(), entry.path.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_polling(&self) -> bool {
        self.next_poll.is_some()
    }

    /// Advance the monitor: apply channel events and requests, then poll
    /// when the interval has elapsed.
    pub fn pump(&mut self, now: Instant) {
        for event in self.channel.poll_events() {
            match event {
                ChannelEvent::Connected => {
                    // Entries wrapped after the link came up but before this
                    // event was drained have already been pushed.
                    let mut flushed = 0;
                    for entry in self.entries.iter_mut().filter(|entry| !entry.delivered) {
                        entry.pending_force = true;
                        flushed += 1;
                    }
                    log::info!("monitor channel up; flushing {flushed} watches");
                    self.poll(now);
                }
                ChannelEvent::Disconnected => {
                    log::info!("monitor channel down");
                    for entry in &mut self.entries {
                        entry.delivered = false;
                    }
                }
                ChannelEvent::Request(message) => self.handle_request(message, now),
            }
        }

        if let Some(due) = self.next_poll {
            if now >= due {
                self.poll(now);
                self.next_poll = Some(now + self.settings.poll_interval);
            }
        }
    }

    /// One poll tick over every watch, in insertion order.
    pub fn poll(&mut self, now: Instant) {
        for index in 0..self.entries.len() {
            self.poll_entry(index, now);
        }
    }

    fn handle_request(&mut self, message: Message, now: Instant) {
        match message {
            Message::Wrap(request) => {
                if let Err(err) = self.wrap(&request.id, &request.path, now) {
                    log::warn!("remote wrap of {} failed: {err}", request.id);
                    self.send(Message::MonitorError(WireError {
                        id: Some(request.id),
                        message: err.to_string(),
                    }));
                }
            }
            Message::Unwrap(request) => {
                if !self.unwrap(&request.id) {
                    log::debug!("remote unwrap of unknown watch {}", request.id);
                }
            }
            Message::List(_) => {
                let entries = self
                    .list()
                    .into_iter()
                    .map(|(id, path)| WatchSummary { id, path })
                    .collect();
                self.send(Message::WatchList(WatchList { entries }));
            }
            other => log::debug!("ignoring {} message from listener", other.kind().label()),
        }
    }

    fn resolve(&self, path: &str) -> Result<Value, PathError> {
        let root = self.host.root().ok_or(PathError::HostNotReady)?;
        self.resolver.read(&root, path)
    }

    fn poll_entry(&mut self, index: usize, now: Instant) {
        // Deferred until connected; forced entries keep their flag.
        if !self.channel.is_connected() {
            return;
        }
        let Some(entry) = self.entries.get(index) else {
            return;
        };
        let (value, current) = match self.resolve(&entry.path) {
            Ok(value) => (value.to_json(UPDATE_VALUE_DEPTH), comparable(&value)),
            Err(err) => {
                log::trace!("watch {} unresolved: {err}", entry.id);
                (Json::Null, UNRESOLVED.to_string())
            }
        };

        let throttle = self.settings.throttle;
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        let forced = entry.pending_force;
        if !forced && entry.last_comparable.as_deref() == Some(current.as_str()) {
            return;
        }
        entry.has_last_value = true;
        entry.last_comparable = Some(current);
        entry.pending_force = false;
        let id = entry.id.clone();

        if !forced {
            if let Some(last) = self.last_push.get(&id) {
                if now.saturating_duration_since(*last) < throttle {
                    log::trace!("throttled update for {id}");
                    return;
                }
            }
        }

        let update = MonitorUpdate {
            id: id.clone(),
            value,
            ts: epoch_millis(),
        };
        if self.send(Message::MonitorUpdate(update)) {
            if let Some(entry) = self.entries.get_mut(index) {
                entry.delivered = true;
            }
            self.last_push.insert(id, now);
        }
    }

    fn send(&mut self, message: Message) -> bool {
        match self.channel.send(message) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("monitor push failed: {err}");
                false
            }
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use lever_stream::{List, Unwrap, Wrap};

    use super::*;
    use crate::host::Map;

    /// Channel double that records sent messages.
    #[derive(Clone, Default)]
    struct Recording {
        sent: Rc<RefCell<Vec<Message>>>,
        events: Rc<RefCell<Vec<ChannelEvent>>>,
        connected: Rc<RefCell<bool>>,
        inits: Rc<RefCell<usize>>,
    }

    impl Recording {
        fn connected() -> Self {
            let channel = Self::default();
            *channel.connected.borrow_mut() = true;
            channel
        }

        fn updates(&self) -> Vec<(String, Json)> {
            self.sent
                .borrow()
                .iter()
                .filter_map(|message| match message {
                    Message::MonitorUpdate(update) => {
                        Some((update.id.clone(), update.value.clone()))
                    }
                    _ => None,
                })
                .collect()
        }
    }

    impl MonitorChannel for Recording {
        fn init(&mut self) {
            *self.inits.borrow_mut() += 1;
        }

        fn is_connected(&self) -> bool {
            *self.connected.borrow()
        }

        fn send(&mut self, message: Message) -> Result<(), ChannelError> {
            self.sent.borrow_mut().push(message);
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<ChannelEvent> {
            self.events.borrow_mut().drain(..).collect()
        }
    }

    fn setup(channel: Recording) -> (Map, Monitor) {
        let root = Map::new();
        root.set("Health", 57);
        let host = Rc::new(HostLink::with_root(root.clone()));
        let monitor = Monitor::new(
            host,
            Rc::new(PathResolver::new()),
            Box::new(channel),
            MonitorSettings::default(),
        );
        (root, monitor)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn changes_push_once_and_throttle_drops_bursts() {
        let channel = Recording::connected();
        let (root, mut monitor) = setup(channel.clone());
        let t0 = Instant::now();

        monitor.wrap("h1", "Root.Health", t0).expect("wrap");
        assert_eq!(channel.updates(), vec![("h1".to_string(), Json::from(57))]);

        monitor.pump(t0 + ms(120));
        monitor.pump(t0 + ms(240));
        assert_eq!(channel.updates().len(), 1);

        root.set("Health", 40);
        monitor.pump(t0 + ms(360));
        assert_eq!(channel.updates().len(), 2);
        assert_eq!(channel.updates()[1].1, Json::from(40));

        root.set("Health", 30);
        monitor.poll(t0 + ms(380));
        assert_eq!(channel.updates().len(), 2);
    }

    #[test]
    fn rewrap_after_unwrap_forces_one_push() {
        let channel = Recording::connected();
        let (_root, mut monitor) = setup(channel.clone());
        let t0 = Instant::now();

        monitor.wrap("h1", "Root.Health", t0).expect("wrap");
        assert!(monitor.unwrap("h1"));
        assert!(!monitor.is_polling());
        monitor.wrap("h1", "Root.Health", t0 + ms(10)).expect("rewrap");
        monitor.pump(t0 + ms(130));

        assert_eq!(channel.updates().len(), 2);
        assert_eq!(monitor.list(), vec![("h1".to_string(), "Root.Health".to_string())]);
    }

    #[test]
    fn forced_push_waits_for_connection() {
        let channel = Recording::default();
        let (_root, mut monitor) = setup(channel.clone());
        let t0 = Instant::now();

        monitor.wrap("h1", "Health", t0).expect("wrap");
        monitor.pump(t0 + ms(120));
        assert!(channel.updates().is_empty());

        *channel.connected.borrow_mut() = true;
        channel.events.borrow_mut().push(ChannelEvent::Connected);
        monitor.pump(t0 + ms(130));
        assert_eq!(channel.updates().len(), 1);
        assert_eq!(*channel.inits.borrow(), 1);
    }

    #[test]
    fn reconnect_flushes_every_watch() {
        let channel = Recording::connected();
        let (root, mut monitor) = setup(channel.clone());
        root.set("Mana", 3);
        let t0 = Instant::now();
        monitor.wrap("h", "Health", t0).expect("wrap h");
        monitor.wrap("m", "Mana", t0).expect("wrap m");

        channel.events.borrow_mut().push(ChannelEvent::Disconnected);
        channel.events.borrow_mut().push(ChannelEvent::Connected);
        monitor.pump(t0 + ms(20));

        let ids: Vec<String> = channel.updates().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["h", "m", "h", "m"]);
    }

    #[test]
    fn wrap_racing_the_connect_event_pushes_once() {
        let channel = Recording::default();
        let (root, mut monitor) = setup(channel.clone());
        root.set("Mana", 3);
        let t0 = Instant::now();
        monitor.wrap("m", "Mana", t0).expect("wrap before connect");

        // the link is up but its Connected event has not been drained yet
        *channel.connected.borrow_mut() = true;
        monitor.wrap("h", "Health", t0 + ms(5)).expect("wrap in the gap");
        channel.events.borrow_mut().push(ChannelEvent::Connected);
        monitor.pump(t0 + ms(10));

        let ids: Vec<String> = channel.updates().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["h", "m"]);
    }

    #[test]
    fn unwrap_trims_ids_like_wrap() {
        let (_root, mut monitor) = setup(Recording::connected());
        let now = Instant::now();
        monitor.wrap(" h1 ", "Health", now).expect("wrap");
        assert_eq!(monitor.list(), vec![("h1".to_string(), "Health".to_string())]);
        assert!(monitor.unwrap(" h1"));
        assert!(monitor.is_empty());
    }

    #[test]
    fn invalid_wraps_are_rejected_up_front() {
        let (_root, mut monitor) = setup(Recording::connected());
        let now = Instant::now();
        assert_eq!(monitor.wrap(" ", "Health", now), Err(MonitorError::EmptyId));
        assert_eq!(monitor.wrap("h", "", now), Err(MonitorError::EmptyPath));
        assert!(matches!(
            monitor.wrap("h", "ghost.hp", now),
            Err(MonitorError::Path { .. })
        ));
        assert!(monitor.is_empty());
    }

    #[test]
    fn vanished_paths_push_null_once() {
        let channel = Recording::connected();
        let (root, mut monitor) = setup(channel.clone());
        let stats = Map::new();
        stats.set("hp", 1);
        root.set("stats", stats);
        let t0 = Instant::now();
        monitor.wrap("hp", "stats.hp", t0).expect("wrap");

        root.remove("stats");
        monitor.pump(t0 + ms(120));
        monitor.pump(t0 + ms(240));
        assert_eq!(
            channel.updates(),
            vec![("hp".to_string(), Json::from(1)), ("hp".to_string(), Json::Null)]
        );
    }

    #[test]
    fn listener_requests_are_applied() {
        let channel = Recording::connected();
        let (_root, mut monitor) = setup(channel.clone());
        let t0 = Instant::now();
        channel.events.borrow_mut().extend([
            ChannelEvent::Request(Message::Wrap(Wrap {
                id: "h2".into(),
                path: "Root.Health".into(),
            })),
            ChannelEvent::Request(Message::Wrap(Wrap {
                id: "bad".into(),
                path: "nope.x".into(),
            })),
            ChannelEvent::Request(Message::List(List {})),
        ]);
        monitor.pump(t0);

        let sent = channel.sent.borrow();
        assert!(matches!(&sent[0], Message::MonitorUpdate(update) if update.id == "h2"));
        assert!(matches!(&sent[1], Message::MonitorError(err) if err.id.as_deref() == Some("bad")));
        assert!(matches!(&sent[2], Message::WatchList(list) if list.entries.len() == 1));
        drop(sent);

        channel
            .events
            .borrow_mut()
            .push(ChannelEvent::Request(Message::Unwrap(Unwrap { id: "h2".into() })));
        monitor.pump(t0 + ms(10));
        assert!(monitor.is_empty());
    }
}
