//! Small stand-in host graph and command set for running the console
//! without a real host attached.

use std::cell::Cell;

use anyhow::Context;

use crate::commands::{CommandSpec, Console};
use crate::host::{Behavior, List, Map, Value};
use crate::path::CONTAINER_KEY;

const MAX_HEALTH: f64 = 100.0;

/// Mutable demo graph: a player wrapper with its fields under the
/// container key, a world that points back at the root, and a few
/// top-level values.
pub struct DemoHost {
    root: Map,
    stats: Map,
    world: Map,
    ticks: Cell<u64>,
}

impl DemoHost {
    pub fn new() -> Self {
        let stats = Map::new();
        stats.set("Health", MAX_HEALTH);
        stats.set("MaxHealth", MAX_HEALTH);
        stats.set("speed", 1.5);
        stats.set("name", "Manny");
        let player = Map::new();
        player.set(CONTAINER_KEY, stats.clone());
        player.set("class", "Reaper");

        let root = Map::new();
        root.set("Health", 57);
        root.set("player", player);
        root.set(
            "inventory",
            List::from_values([Value::from("scythe"), Value::from("lamp")]),
        );

        let world = Map::new();
        world.set("tick", 0);
        world.set("root", root.clone());
        root.set("world", world.clone());

        Self {
            root,
            stats,
            world,
            ticks: Cell::new(0),
        }
    }

    pub fn root(&self) -> Map {
        self.root.clone()
    }

    /// The player's real fields (`player._data`).
    pub fn stats(&self) -> Map {
        self.stats.clone()
    }

    /// One simulation step: the player bleeds one point (respawning at
    /// zero) and the world clock moves on.
    pub fn advance(&self) {
        let tick = self.ticks.get() + 1;
        self.ticks.set(tick);
        self.world.set("tick", tick as f64);

        let health = self.stats.get("Health").as_number().unwrap_or(0.0);
        let next = if health <= 0.0 { MAX_HEALTH } else { health - 1.0 };
        self.stats.set("Health", next);

        if tick % 10 == 0 {
            let top = self.root.get("Health").as_number().unwrap_or(0.0);
            self.root.set("Health", if top <= 0.0 { 57.0 } else { top - 1.0 });
        }
    }
}

impl Default for DemoHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the `player` and `wide` groups against `host`.
pub fn install(console: &Console, host: &DemoHost) -> anyhow::Result<()> {
    let stats = host.stats();
    let godmode_stats = stats.clone();
    let godmode = CommandSpec::new("godmode", "God mode").handler(move |env, _| {
        let path = vec!["player".to_string(), "godmode".to_string()];
        let enabled = !env.state.borrow().flag(&path);
        if enabled {
            let max = godmode_stats.clone();
            godmode_stats.intercept("Health", Behavior::getter(move |_| max.get("MaxHealth")))?;
        } else {
            godmode_stats.restore("Health");
        }
        env.state.borrow_mut().set_flag(&path, enabled);
        let verb = if enabled { "activated" } else { "deactivated" };
        Ok(Some(format!("God mode {verb}.")))
    });

    console.register_group(
        CommandSpec::new("player", "Player tweaks")
            .subcommand(godmode)
            .subcommand(CommandSpec::new("speed", "Speed multiplier").configurable())
            .subcommand(CommandSpec::new("damage", "Per-weapon damage").keyed()),
    );
    console.register_group(
        CommandSpec::new("wide", "Widescreen fixes")
            .toggle_all()
            .subcommand(CommandSpec::new("mtx", "Projection matrix fix"))
            .subcommand(CommandSpec::new("post", "Post-processing fix")),
    );

    let state = console.state();
    let config = console.config();
    let speed_path = vec!["player".to_string(), "speed".to_string()];
    stats
        .intercept(
            "speed",
            Behavior::accessors().with_get(move |original: &Value| {
                let (Ok(state), Ok(config)) = (state.try_borrow(), config.try_borrow()) else {
                    return original.clone();
                };
                match original {
                    Value::Number(n) if state.flag(&speed_path) => {
                        Value::Number(config.apply(&speed_path, *n))
                    }
                    other => other.clone(),
                }
            }),
        )
        .context("installing speed interception")?;
    Ok(())
}
