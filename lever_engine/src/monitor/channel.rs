use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use lever_stream::{FrameReader, Identify, Message};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("monitor channel worker disconnected")]
    Disconnected,
    #[error("message encode failed: {0}")]
    Encode(#[from] lever_stream::ProtocolError),
}

/// What the host thread learns from the channel between two pumps.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Request(Message),
}

/// Transport between the monitor and the remote listener.
pub trait MonitorChannel {
    /// Start connecting. Calling it again has no effect.
    fn init(&mut self);

    fn is_connected(&self) -> bool;

    fn send(&mut self, message: Message) -> Result<(), ChannelError>;

    /// Drain connection changes and requests received since the last call.
    fn poll_events(&mut self) -> Vec<ChannelEvent>;
}

#[derive(Debug, Clone)]
pub struct TcpChannelConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub build: Option<String>,
}

impl TcpChannelConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(3),
            build: None,
        }
    }

    pub fn resolve<A: ToSocketAddrs>(addr: A) -> anyhow::Result<Self> {
        let addr = addr
            .to_socket_addrs()
            .context("resolving monitor address")?
            .next()
            .context("monitor address resolved to nothing")?;
        Ok(Self::new(addr))
    }
}

enum Command {
    Send(Vec<u8>),
    Shutdown,
}

struct Worker {
    sender: Sender<Command>,
    events: Receiver<ChannelEvent>,
}

/// Persistent client connection to the monitor listener.
///
/// A dedicated thread owns the socket: it connects lazily once
/// [`MonitorChannel::init`] runs, announces itself with an identify message,
/// and retries after `reconnect_delay` whenever the connection drops.
pub struct TcpChannel {
    config: TcpChannelConfig,
    worker: Option<Worker>,
    connected: Arc<AtomicBool>,
}

impl TcpChannel {
    pub fn new(config: TcpChannelConfig) -> Self {
        Self {
            config,
            worker: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn(&self) -> anyhow::Result<Worker> {
        let (tx, rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let config = self.config.clone();
        let connected = Arc::clone(&self.connected);
        thread::Builder::new()
            .name("lever_monitor".to_string())
            .spawn(move || worker_loop(config, rx, event_tx, connected))
            .context("spawning monitor channel thread")?;
        Ok(Worker {
            sender: tx,
            events: event_rx,
        })
    }
}

impl MonitorChannel for TcpChannel {
    fn init(&mut self) {
        if self.worker.is_some() {
            return;
        }
        match self.spawn() {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => log::warn!("{err:#}"),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&mut self, message: Message) -> Result<(), ChannelError> {
        let worker = self.worker.as_ref().ok_or(ChannelError::Disconnected)?;
        let bytes = message.encode()?;
        worker
            .sender
            .send(Command::Send(bytes))
            .map_err(|_| ChannelError::Disconnected)
    }

    fn poll_events(&mut self) -> Vec<ChannelEvent> {
        match self.worker.as_ref() {
            Some(worker) => worker.events.try_iter().collect(),
            None => Vec::new(),
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.sender.send(Command::Shutdown);
        }
    }
}

struct Connection {
    stream: TcpStream,
    frames: FrameReader,
}

fn worker_loop(
    config: TcpChannelConfig,
    rx: Receiver<Command>,
    events: Sender<ChannelEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut conn: Option<Connection> = None;
    let mut next_attempt = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(16)) {
            Ok(Command::Send(buffer)) => {
                if let Some(active) = conn.as_mut() {
                    if let Err(err) = write_all(&mut active.stream, &buffer) {
                        log::warn!("monitor send failed: {err}; reconnecting");
                        conn = None;
                        next_attempt = Instant::now() + config.reconnect_delay;
                        mark_disconnected(&connected, &events);
                    }
                }
            }
            Ok(Command::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(active) = conn.as_mut() {
            if let Err(err) = read_requests(active, &events) {
                log::warn!("monitor connection lost: {err}");
                conn = None;
                next_attempt = Instant::now() + config.reconnect_delay;
                mark_disconnected(&connected, &events);
            }
            continue;
        }

        if Instant::now() < next_attempt {
            continue;
        }
        match connect(&config) {
            Ok(active) => {
                log::info!("monitor connected to {}", config.addr);
                conn = Some(active);
                connected.store(true, Ordering::Release);
                let _ = events.send(ChannelEvent::Connected);
            }
            Err(err) => {
                log::debug!("monitor connect to {} failed: {err}", config.addr);
                next_attempt = Instant::now() + config.reconnect_delay;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

fn mark_disconnected(connected: &AtomicBool, events: &Sender<ChannelEvent>) {
    connected.store(false, Ordering::Release);
    let _ = events.send(ChannelEvent::Disconnected);
}

fn connect(config: &TcpChannelConfig) -> io::Result<Connection> {
    let mut stream = TcpStream::connect_timeout(&config.addr, config.connect_timeout)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(Duration::from_millis(2)))?;
    let identify = Message::Identify(Identify::game(config.build.clone()))
        .encode()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    write_all(&mut stream, &identify)?;
    Ok(Connection {
        stream,
        frames: FrameReader::new(),
    })
}

/// Read whatever the listener sent and forward complete requests.
fn read_requests(conn: &mut Connection, events: &Sender<ChannelEvent>) -> io::Result<()> {
    let mut buffer = [0u8; 4096];
    loop {
        match conn.stream.read(&mut buffer) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "listener closed connection",
                ))
            }
            Ok(read) => conn.frames.push(&buffer[..read]),
            Err(ref err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                break
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    loop {
        match conn.frames.next_message() {
            Ok(Some(message)) => {
                let _ = events.send(ChannelEvent::Request(message));
            }
            Ok(None) => return Ok(()),
            Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        }
    }
}

fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        match stream.write(&bytes[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "remote closed connection",
                ))
            }
            Ok(written) => offset += written,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
