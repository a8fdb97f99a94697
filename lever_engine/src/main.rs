use std::cell::RefCell;
use std::io::{self, BufRead};
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use lever_engine::cli::Args;
use lever_engine::commands::builtin;
use lever_engine::demo::{self, DemoHost};
use lever_engine::monitor::{Monitor, TcpChannel};
use lever_engine::{Console, HostLink};

/// How often the demo host advances and the monitor is pumped.
const FRAME: Duration = Duration::from_millis(20);

/// Interval between two demo host steps.
const HOST_STEP: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = args.resolve_settings()?;

    let demo_host = DemoHost::new();
    let link = Rc::new(HostLink::with_root(demo_host.root()));
    let resolver = Rc::new(settings.resolver()?);

    let console = Console::new(Rc::clone(&link), Rc::clone(&resolver), settings.console_options())?;
    console.set_initializer(Box::new(|| {
        log::info!("console initialized");
        Ok(())
    }));
    builtin::install(&console);
    demo::install(&console, &demo_host).context("registering demo commands")?;

    let channel = TcpChannel::new(settings.channel_config()?);
    let monitor = Rc::new(RefCell::new(Monitor::new(
        link,
        resolver,
        Box::new(channel),
        settings.monitor_settings(),
    )));
    builtin::install_monitor(&console, Rc::clone(&monitor));

    for line in &args.exec {
        println!("> {line}");
        println!("{}", console.dispatch(line));
    }
    if args.batch {
        return Ok(());
    }

    let (tx, rx) = mpsc::channel::<String>();
    thread::Builder::new()
        .name("lever-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawning stdin reader")?;

    println!(
        "lever console ready; monitor listener expected at {} (type `help`)",
        settings.monitor_addr
    );
    let mut next_step = Instant::now() + HOST_STEP;
    loop {
        match rx.recv_timeout(FRAME) {
            Ok(line) => {
                let line = line.trim();
                if matches!(line, "quit" | "exit") {
                    break;
                }
                if !line.is_empty() {
                    println!("{}", console.dispatch(line));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_step {
            demo_host.advance();
            next_step = now + HOST_STEP;
        }
        monitor.borrow_mut().pump(now);
    }
    Ok(())
}
