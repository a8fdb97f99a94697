use std::io::BufRead;

use anyhow::{Context, Result};
use clap::Parser;
use lever_stream::{FrameReader, List, Message, Unwrap, Wrap};
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(about = "Remote end of the lever value monitor", version)]
struct Args {
    /// Address the game connects to (host:port).
    #[arg(long, default_value = "127.0.0.1:17410")]
    bind: String,

    /// Watch to request on every connection, as ID=PATH (repeatable).
    #[arg(long = "watch", value_name = "ID=PATH")]
    watch: Vec<String>,

    /// Print updates as JSON lines instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum ListenerError {
    #[error("unknown command `{0}` (expected wrap, unwrap, list or quit)")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("watch `{0}` must look like ID=PATH")]
    BadWatch(String),
}

/// Operator input, parsed from one stdin line.
#[derive(Debug, PartialEq)]
enum Request {
    Send(Message),
    Quit,
}

enum Session {
    Closed,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let watches = args
        .watch
        .iter()
        .map(|spec| parse_watch(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    println!("[monitor_listener] waiting for game at {}", args.bind);

    let mut commands = spawn_stdin_reader();
    let mut stdin_open = true;
    loop {
        let (socket, addr) = listener
            .accept()
            .await
            .with_context(|| format!("accepting game connection on {}", args.bind))?;
        println!("[monitor_listener] game connected from {addr}");
        socket.set_nodelay(true)?;

        match serve(socket, &watches, &mut commands, &mut stdin_open, args.json).await {
            Ok(Session::Closed) => println!("[monitor_listener] game disconnected; waiting"),
            Ok(Session::Quit) => return Ok(()),
            Err(err) => eprintln!("[monitor_listener] session ended: {err:#}"),
        }
    }
}

async fn serve(
    socket: TcpStream,
    watches: &[Wrap],
    commands: &mut mpsc::Receiver<String>,
    stdin_open: &mut bool,
    json: bool,
) -> Result<Session> {
    let (mut reader, mut writer) = socket.into_split();
    for wrap in watches {
        send(&mut writer, Message::Wrap(wrap.clone())).await?;
    }

    let mut frames = FrameReader::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        tokio::select! {
            read = reader.read(&mut buffer) => {
                let read = read.context("reading from game")?;
                if read == 0 {
                    return Ok(Session::Closed);
                }
                frames.push(&buffer[..read]);
                while let Some(message) = frames.next_message()? {
                    report(&message, json);
                }
            }
            line = commands.recv(), if *stdin_open => {
                let Some(line) = line else {
                    *stdin_open = false;
                    continue;
                };
                match parse_command(&line) {
                    Ok(Some(Request::Send(message))) => send(&mut writer, message).await?,
                    Ok(Some(Request::Quit)) => return Ok(Session::Quit),
                    Ok(None) => {}
                    Err(err) => eprintln!("[monitor_listener] {err}"),
                }
            }
        }
    }
}

async fn send(writer: &mut OwnedWriteHalf, message: Message) -> Result<()> {
    let bytes = message.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn report(message: &Message, json: bool) {
    match message {
        Message::Identify(identify) => println!(
            "[monitor_listener] {} client identified (build {})",
            identify.client_type,
            identify.build.as_deref().unwrap_or("unknown")
        ),
        Message::MonitorUpdate(update) if json => println!(
            "{}",
            json!({ "id": update.id, "value": update.value, "ts": update.ts })
        ),
        Message::MonitorUpdate(update) => println!("{} = {}  @{}", update.id, update.value, update.ts),
        Message::WatchList(list) if list.entries.is_empty() => println!("(no watches)"),
        Message::WatchList(list) => {
            for entry in &list.entries {
                println!("{} -> {}", entry.id, entry.path);
            }
        }
        Message::MonitorError(err) => eprintln!(
            "[monitor_listener] game error{}: {}",
            err.id
                .as_deref()
                .map(|id| format!(" for {id}"))
                .unwrap_or_default(),
            err.message
        ),
        Message::Heartbeat(_) => {}
        other => eprintln!(
            "[monitor_listener] unexpected {} message from game",
            other.kind().label()
        ),
    }
}

fn parse_watch(spec: &str) -> Result<Wrap, ListenerError> {
    match spec.split_once('=') {
        Some((id, path)) if !id.trim().is_empty() && !path.trim().is_empty() => Ok(Wrap {
            id: id.trim().to_string(),
            path: path.trim().to_string(),
        }),
        _ => Err(ListenerError::BadWatch(spec.to_string())),
    }
}

fn parse_command(line: &str) -> Result<Option<Request>, ListenerError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();
    let request = match verb {
        "wrap" | "watch" => {
            let [id, path @ ..] = rest.as_slice() else {
                return Err(ListenerError::Usage("wrap <id> <path>"));
            };
            if path.is_empty() {
                return Err(ListenerError::Usage("wrap <id> <path>"));
            }
            Request::Send(Message::Wrap(Wrap {
                id: id.to_string(),
                path: path.join(" "),
            }))
        }
        "unwrap" | "unwatch" => {
            let [id] = rest.as_slice() else {
                return Err(ListenerError::Usage("unwrap <id>"));
            };
            Request::Send(Message::Unwrap(Unwrap { id: id.to_string() }))
        }
        "list" => Request::Send(Message::List(List {})),
        "quit" | "exit" => Request::Quit,
        other => return Err(ListenerError::UnknownCommand(other.to_string())),
    };
    Ok(Some(request))
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
