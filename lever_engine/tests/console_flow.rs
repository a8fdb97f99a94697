use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use lever_engine::commands::{builtin, CommandSpec, ConfigValue, Console, ConsoleOptions};
use lever_engine::monitor::{Monitor, MonitorSettings, TcpChannel, TcpChannelConfig};
use lever_engine::{HostLink, List, Map, PathResolver, Value};
use serde_json::json;

fn path(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn console_with(root: Map, options: ConsoleOptions) -> Console {
    let host = Rc::new(HostLink::with_root(root));
    let console = Console::new(host, Rc::new(PathResolver::new()), options).expect("console");
    builtin::install(&console);
    console
}

fn console() -> Console {
    console_with(Map::new(), ConsoleOptions::default())
}

fn wide_group() -> CommandSpec {
    CommandSpec::new("wide", "Widescreen fixes")
        .toggle_all()
        .subcommand(CommandSpec::new("mtx", "Matrix fix"))
        .subcommand(CommandSpec::new("post", "Post-processing fix"))
}

#[test]
fn empty_registry_rejects_unknown_commands() {
    let host = Rc::new(HostLink::with_root(Map::new()));
    let console = Console::new(host, Rc::new(PathResolver::new()), ConsoleOptions::default())
        .expect("console");
    assert_eq!(console.dispatch("zzz"), "zzz is not a valid option.");
}

#[test]
fn group_toggle_flips_children_and_all_flag() {
    let console = console();
    console.register_group(wide_group());
    let state = console.state();

    assert_eq!(console.dispatch("wide"), "All wide options activated.");
    assert_eq!(
        state.borrow().to_json()["wide"],
        json!({ "mtx": true, "post": true })
    );
    assert!(state.borrow().all_flag(&path(&["wide"])));

    assert_eq!(console.dispatch("wide"), "All wide options deactivated.");
    assert_eq!(
        state.borrow().to_json()["wide"],
        json!({ "mtx": false, "post": false })
    );
    assert!(!state.borrow().all_flag(&path(&["wide"])));
}

#[test]
fn leaf_toggle_reports_help_text() {
    let console = console();
    console.register_group(wide_group());
    assert_eq!(console.dispatch("wide mtx"), "Matrix fix activated.");
    assert_eq!(console.dispatch("wide mtx"), "Matrix fix deactivated.");
    assert_eq!(
        console.dispatch("wide mtx 3"),
        "this cheat doesn't accept values."
    );
}

#[test]
fn groups_without_toggle_print_usage() {
    let console = console();
    console.register_group(
        CommandSpec::new("camera", "Camera")
            .subcommand(CommandSpec::new("free", "Free camera"))
            .subcommand(CommandSpec::new("shake", "Camera shake")),
    );
    assert_eq!(console.dispatch("camera"), "Usage: camera <free|shake>");
    assert_eq!(console.dispatch("camera loud"), "Usage: camera <free|shake>");
}

#[test]
fn custom_handlers_receive_trailing_params() {
    let console = console();
    let (tx, rx) = mpsc::channel();
    let tx_a = tx.clone();
    console.register_command(
        CommandSpec::new("a", "A")
            .handler(move |_, params| {
                tx_a.send(("a", params.to_vec())).expect("send");
                Ok(None)
            })
            .subcommand(CommandSpec::new("b", "B").handler(move |_, params| {
                tx.send(("a b", params.to_vec())).expect("send");
                Ok(Some("b ran".to_string()))
            })),
    );

    assert_eq!(console.dispatch("a b c"), "b ran");
    assert_eq!(rx.recv().expect("a b"), ("a b", vec!["c".to_string()]));
    assert_eq!(console.dispatch("a x"), "Done.");
    assert_eq!(rx.recv().expect("a"), ("a", vec!["x".to_string()]));
}

#[test]
fn configurable_commands_store_literals_and_transforms() {
    let console = console();
    console.register_group(
        CommandSpec::new("player", "Player")
            .subcommand(CommandSpec::new("speed", "Speed").configurable())
            .subcommand(CommandSpec::new("damage", "Damage").keyed()),
    );
    let config = console.config();
    let speed = path(&["player", "speed"]);

    assert_eq!(console.dispatch("player speed 2"), "player speed set to 2.");
    assert_eq!(config.borrow().number(&speed), Some(2.0));
    assert!(console.state().borrow().flag(&speed));

    console.dispatch("player speed x * 3");
    match config.borrow().get(&speed) {
        Some(ConfigValue::Transform(transform)) => {
            assert_eq!(transform.apply(2.0).expect("apply"), 6.0)
        }
        other => panic!("expected a transform, got {other:?}"),
    }

    let reply = console.dispatch("player speed nope");
    assert!(reply.starts_with("Error:"), "{reply}");

    assert_eq!(
        console.dispatch("player damage sword 40"),
        "player damage [sword] set to 40."
    );
    assert_eq!(
        config.borrow().number(&path(&["player", "damage", "sword"])),
        Some(40.0)
    );
    assert_eq!(
        console.dispatch("player damage sword"),
        "Usage: player damage <key> <value>"
    );
}

#[test]
fn handler_failures_never_escape_dispatch() {
    let console = console();
    console.register_command(
        CommandSpec::new("explode", "Explodes").handler(|_, _| panic!("bad handler")),
    );
    assert_eq!(console.dispatch("explode"), "Error: handler panicked: bad handler");
    // the console stays usable afterwards
    assert_eq!(console.dispatch("explode now"), "Error: handler panicked: bad handler");
    assert_eq!(console.dispatch(""), "No command given.");
}

#[test]
fn initializer_runs_once_on_first_dispatch() {
    let console = console();
    let (tx, rx) = mpsc::channel();
    console.set_initializer(Box::new(move || {
        tx.send(()).expect("signal");
        Ok(())
    }));
    assert!(!console.is_initialized());

    console.dispatch("help");
    console.dispatch("help");
    assert!(console.is_initialized());
    rx.recv_timeout(Duration::from_secs(5))
        .expect("initializer ran");
    // the sender is dropped with the finished closure, so no second run can follow
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
}

#[test]
fn chng_requires_path_writes() {
    let root = Map::new();
    root.set("Health", 57);

    let locked = console_with(root.clone(), ConsoleOptions::default());
    let reply = locked.dispatch("chng Root.Health = 99");
    assert!(reply.starts_with("Error: path writes are disabled"), "{reply}");
    assert_eq!(root.get("Health"), Value::from(57));

    let open = console_with(
        root.clone(),
        ConsoleOptions {
            allow_path_writes: true,
        },
    );
    assert_eq!(open.dispatch("chng Root.Health = 99"), "Root.Health = 99");
    assert_eq!(root.get("Health"), Value::from(99));
    assert_eq!(open.dispatch("chng Health"), "Health = 99");
}

#[test]
fn chng_accepts_bracket_keys_with_equals() {
    let bag = Map::new();
    let root = Map::new();
    root.set("bag", bag.clone());
    let console = console_with(
        root,
        ConsoleOptions {
            allow_path_writes: true,
        },
    );

    assert_eq!(
        console.dispatch(r#"chng Root.bag["x=y"] = 1"#),
        r#"Root.bag["x=y"] = 1"#
    );
    assert_eq!(bag.get("x=y"), Value::from(1));
}

#[test]
fn chng_rejects_list_writes_past_the_end() {
    let items = List::from_values([Value::from(1)]);
    let root = Map::new();
    root.set("items", items.clone());
    let console = console_with(
        root,
        ConsoleOptions {
            allow_path_writes: true,
        },
    );

    let reply = console.dispatch("chng Root.items[1000000000000000] = 1");
    assert!(reply.starts_with("Error: index 1000000000000000 is past the end"), "{reply}");
    assert_eq!(items.len(), 1);

    assert_eq!(console.dispatch("chng Root.items[1] = 2"), "Root.items[1] = 2");
    assert_eq!(items.items(), vec![Value::from(1), Value::from(2)]);
}

#[test]
fn snapshot_of_a_multiply_cyclic_graph_completes() {
    let root = Map::new();
    let child = Map::new();
    root.set("me", root.clone());
    root.set("child", child.clone());
    child.set("parent", root.clone());
    child.set("hp", 3);
    let console = console_with(
        root.clone(),
        ConsoleOptions {
            allow_path_writes: true,
        },
    );

    assert_eq!(
        console.dispatch("snapshot s Root.child"),
        "Saved snapshot s of Root.child."
    );
    child.set("hp", 0);
    assert_eq!(
        console.dispatch("restore-snapshot s Root.child"),
        "Restored snapshot s into Root.child."
    );
    let restored = root.get("child");
    let restored = restored.as_map().expect("child map");
    assert_eq!(restored.get("hp"), Value::from(3));
    let parent = restored.get("parent");
    assert!(!parent.as_map().expect("parent map").ptr_eq(&root));
}

#[test]
fn snapshots_restore_earlier_values() {
    let stats = Map::new();
    stats.set("hp", 10);
    let root = Map::new();
    root.set("stats", stats.clone());
    let console = console_with(
        root.clone(),
        ConsoleOptions {
            allow_path_writes: true,
        },
    );

    assert_eq!(
        console.dispatch("snapshot before stats"),
        "Saved snapshot before of stats."
    );
    stats.set("hp", 1);
    assert_eq!(
        console.dispatch("restore-snapshot before stats"),
        "Restored snapshot before into stats."
    );
    let restored = root.get("stats");
    let restored = restored.as_map().expect("map");
    assert_eq!(restored.get("hp"), Value::from(10));
    assert!(!restored.ptr_eq(&stats));
}

#[test]
fn dump_lists_one_level_through_containers() {
    let inner = Map::new();
    inner.set("Health", 57);
    let player = Map::new();
    player.set("_data", inner);
    let root = Map::new();
    root.set("player", player);
    let console = console_with(root, ConsoleOptions::default());

    assert_eq!(console.dispatch("dump Root.player"), "Health = 57");
    assert_eq!(console.dispatch("dump Root 2"), "player.Health = 57");
}

#[test]
fn help_filters_by_category() {
    let console = console();
    console.register_group(wide_group());
    let help = console.dispatch("help wide");
    assert_eq!(
        help,
        "[wide]\n  wide - Widescreen fixes\n  wide mtx - Matrix fix\n  wide post - Post-processing fix"
    );
    assert_eq!(console.dispatch("help nothing"), "No commands in category nothing.");
}

#[test]
fn watch_commands_drive_the_monitor() {
    let root = Map::new();
    root.set("Health", 57);
    let host = Rc::new(HostLink::with_root(root));
    let resolver = Rc::new(PathResolver::new());
    let console = Console::new(Rc::clone(&host), Rc::clone(&resolver), ConsoleOptions::default())
        .expect("console");
    // nothing listens here; watches are kept while the channel retries
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 9));
    let monitor = Rc::new(RefCell::new(Monitor::new(
        host,
        resolver,
        Box::new(TcpChannel::new(TcpChannelConfig::new(addr))),
        MonitorSettings::default(),
    )));
    builtin::install_monitor(&console, Rc::clone(&monitor));

    assert_eq!(console.dispatch("watches"), "No active watches.");
    assert_eq!(
        console.dispatch("watch hp Root.Health"),
        "Watching Root.Health as hp."
    );
    assert_eq!(console.dispatch("watches"), "  hp -> Root.Health");
    assert!(console
        .dispatch("watch bad Root.nothing.here")
        .starts_with("Error: cannot watch"));
    assert_eq!(console.dispatch("unwatch hp"), "Stopped watching hp.");
    assert_eq!(console.dispatch("unwatch hp"), "No watch named hp.");
    assert!(!monitor.borrow().is_polling());
}
