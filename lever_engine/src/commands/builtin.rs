//! Commands every console carries: help, state inspection, path access,
//! snapshots and monitor control.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use serde_json::Value as Json;

use super::{CommandEnv, CommandError, CommandSpec, Console};
use crate::cloner::deep_clone;
use crate::host::Value;
use crate::monitor::Monitor;
use crate::path;
use crate::walk::walk;

pub const CATEGORY: &str = "console";

/// Lines printed by `dump` before the listing is cut short.
pub const DUMP_LINE_LIMIT: usize = 200;

const DEFAULT_DUMP_DEPTH: i32 = 1;

/// Register `help`, `state`, `chng`, `dump`, `snapshot` and
/// `restore-snapshot`.
pub fn install(console: &Console) {
    console.register_command(
        CommandSpec::new("help", "List commands, optionally for one category")
            .category(CATEGORY)
            .handler(help),
    );
    console.register_command(
        CommandSpec::new("state", "Print the command state tree")
            .category(CATEGORY)
            .handler(|env, _| {
                let json = serde_json::to_string_pretty(&env.state.borrow().to_json())
                    .context("serializing state tree")?;
                Ok(Some(json))
            }),
    );
    console.register_command(
        CommandSpec::new("chng", "Read or assign a host path: chng <path> [= <json>]")
            .category(CATEGORY)
            .handler(change),
    );
    console.register_command(
        CommandSpec::new("dump", "List the host graph below a path: dump <path> [depth]")
            .category(CATEGORY)
            .handler(dump),
    );
    console.register_command(
        CommandSpec::new("snapshot", "Deep-copy a host value: snapshot <name> <path>")
            .category(CATEGORY)
            .handler(snapshot),
    );
    console.register_command(
        CommandSpec::new(
            "restore-snapshot",
            "Write a snapshot back: restore-snapshot <name> <path>",
        )
        .category(CATEGORY)
        .handler(restore_snapshot),
    );
}

/// Register `watch`, `unwatch` and `watches` against `monitor`.
pub fn install_monitor(console: &Console, monitor: Rc<RefCell<Monitor>>) {
    let watch_monitor = Rc::clone(&monitor);
    console.register_command(
        CommandSpec::new("watch", "Stream a host value: watch <id> <path>")
            .category(CATEGORY)
            .handler(move |_, params| {
                let [id, path @ ..] = params else {
                    return Err(CommandError::Usage("Usage: watch <id> <path>".into()).into());
                };
                if path.is_empty() {
                    return Err(CommandError::Usage("Usage: watch <id> <path>".into()).into());
                }
                let path = path.join(" ");
                watch_monitor
                    .borrow_mut()
                    .wrap(id, &path, Instant::now())?;
                Ok(Some(format!("Watching {path} as {id}.")))
            }),
    );

    let unwatch_monitor = Rc::clone(&monitor);
    console.register_command(
        CommandSpec::new("unwatch", "Stop streaming a value: unwatch <id>")
            .category(CATEGORY)
            .handler(move |_, params| {
                let [id] = params else {
                    return Err(CommandError::Usage("Usage: unwatch <id>".into()).into());
                };
                let message = if unwatch_monitor.borrow_mut().unwrap(id) {
                    format!("Stopped watching {id}.")
                } else {
                    format!("No watch named {id}.")
                };
                Ok(Some(message))
            }),
    );

    console.register_command(
        CommandSpec::new("watches", "List active watches")
            .category(CATEGORY)
            .handler(move |_, _| {
                let entries = monitor.borrow().list();
                if entries.is_empty() {
                    return Ok(Some("No active watches.".to_string()));
                }
                let lines: Vec<String> = entries
                    .into_iter()
                    .map(|(id, path)| format!("  {id} -> {path}"))
                    .collect();
                Ok(Some(lines.join("\n")))
            }),
    );
}

fn help(env: &CommandEnv, params: &[String]) -> anyhow::Result<Option<String>> {
    let registry = env.registry.borrow();
    let filter = params.first();
    let mut out = String::new();
    for category in registry.categories() {
        if filter.is_some_and(|wanted| *wanted != category) {
            continue;
        }
        let _ = writeln!(out, "[{category}]");
        for command in registry.iter().filter(|c| c.category == category) {
            let _ = writeln!(out, "  {} - {}", command.full_name, command.help);
        }
    }
    if out.is_empty() {
        return Ok(Some(match filter {
            Some(category) => format!("No commands in category {category}."),
            None => "No commands registered.".to_string(),
        }));
    }
    Ok(Some(out.trim_end().to_string()))
}

fn require_path_writes(env: &CommandEnv) -> Result<(), CommandError> {
    if env.options.allow_path_writes {
        Ok(())
    } else {
        Err(CommandError::PathWritesDisabled)
    }
}

fn change(env: &CommandEnv, params: &[String]) -> anyhow::Result<Option<String>> {
    require_path_writes(env)?;
    let text = params.join(" ");
    if text.is_empty() {
        return Err(CommandError::Usage("Usage: chng <path> [= <json>]".into()).into());
    }

    let Some((path, literal)) = split_assignment(&text) else {
        let value = env.lookup(&text).map_err(CommandError::from)?;
        return Ok(Some(format!("{} = {}", text.trim(), value.to_json(2))));
    };
    let path = path.trim();
    let json: Json = serde_json::from_str(literal.trim())
        .with_context(|| format!("`{}` is not a JSON literal", literal.trim()))?;
    let root = env.root().map_err(CommandError::from)?;
    let resolved = env
        .resolver
        .resolve(&root, path)
        .map_err(CommandError::from)?;
    resolved
        .write(Value::from_json(&json))
        .map_err(CommandError::from)?;
    log::info!("chng {path} = {json}");
    Ok(Some(format!("{path} = {}", resolved.read().to_json(2))))
}

/// Split `path = literal` at the first `=` outside brackets and quotes, so
/// bracket keys may contain `=`.
fn split_assignment(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut quote = None;
    for (at, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if depth > 0 => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '=') if depth == 0 => return Some((&text[..at], &text[at + 1..])),
            _ => {}
        }
    }
    None
}

fn dump(env: &CommandEnv, params: &[String]) -> anyhow::Result<Option<String>> {
    let (target, depth) = match params {
        [target] => (target.as_str(), DEFAULT_DUMP_DEPTH),
        [target, depth] => (
            target.as_str(),
            depth
                .parse()
                .with_context(|| format!("`{depth}` is not a depth"))?,
        ),
        _ => return Err(CommandError::Usage("Usage: dump <path> [depth]".into()).into()),
    };
    let node = env.lookup(target).map_err(CommandError::from)?;

    let mut lines = Vec::new();
    let mut skipped = 0usize;
    let summary = walk(&node, depth, |value, segments, _| {
        if segments.is_empty() {
            return Ok(());
        }
        if lines.len() >= DUMP_LINE_LIMIT {
            skipped += 1;
            return Ok(());
        }
        lines.push(format!("{} = {}", path::format_path(segments), describe(value)));
        Ok(())
    });
    if lines.is_empty() {
        return Ok(Some(format!("{target} = {}", describe(&node))));
    }
    if skipped > 0 {
        lines.push(format!("... {skipped} more"));
    }
    if summary.errors > 0 {
        lines.push(format!("({} nodes could not be read)", summary.errors));
    }
    Ok(Some(lines.join("\n")))
}

fn describe(value: &Value) -> String {
    match value {
        Value::List(list) => format!("list ({} items)", list.len()),
        Value::Map(map) => format!("map ({} keys)", map.len()),
        Value::Native(object) => format!("<{}>", object.type_name()),
        Value::Str(text) => format!("{text:?}"),
        other => other.to_string(),
    }
}

fn snapshot(env: &CommandEnv, params: &[String]) -> anyhow::Result<Option<String>> {
    let [name, path] = params else {
        return Err(CommandError::Usage("Usage: snapshot <name> <path>".into()).into());
    };
    let value = env.lookup(path).map_err(CommandError::from)?;
    env.snapshots
        .borrow_mut()
        .insert(name.clone(), deep_clone(&value));
    Ok(Some(format!("Saved snapshot {name} of {path}.")))
}

fn restore_snapshot(env: &CommandEnv, params: &[String]) -> anyhow::Result<Option<String>> {
    require_path_writes(env)?;
    let [name, path] = params else {
        return Err(CommandError::Usage("Usage: restore-snapshot <name> <path>".into()).into());
    };
    let stored = env
        .snapshots
        .borrow()
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow!("no snapshot named {name}"))?;
    let root = env.root().map_err(CommandError::from)?;
    let resolved = env
        .resolver
        .resolve(&root, path)
        .map_err(CommandError::from)?;
    resolved
        .write(deep_clone(&stored))
        .map_err(CommandError::from)?;
    Ok(Some(format!("Restored snapshot {name} into {path}.")))
}
