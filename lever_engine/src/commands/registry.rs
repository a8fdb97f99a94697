use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::{CommandEnv, Handler, StateTree};

/// Category of commands that neither declare nor inherit one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Declarative description of a command (or group of commands).
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub help: String,
    pub category: Option<String>,
    pub handler: Option<Handler>,
    pub subcommands: Vec<CommandSpec>,
    pub can_toggle_subcommands: bool,
    pub configurable: bool,
    pub keyed: bool,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            category: None,
            handler: None,
            subcommands: Vec::new(),
            can_toggle_subcommands: false,
            configurable: false,
            keyed: false,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CommandEnv, &[String]) -> anyhow::Result<Option<String>> + 'static,
    {
        self.handler = Some(Rc::new(handler));
        self
    }

    pub fn subcommand(mut self, spec: CommandSpec) -> Self {
        self.subcommands.push(spec);
        self
    }

    /// Running the group without parameters flips every child at once.
    pub fn toggle_all(mut self) -> Self {
        self.can_toggle_subcommands = true;
        self
    }

    /// Accepts a literal or transform as its parameter.
    pub fn configurable(mut self) -> Self {
        self.configurable = true;
        self
    }

    /// Configurable per key: `<command> <key> <value>`.
    pub fn keyed(mut self) -> Self {
        self.configurable = true;
        self.keyed = true;
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("custom", &self.handler.is_some())
            .field("subcommands", &self.subcommands)
            .finish()
    }
}

#[derive(Clone)]
pub enum Action {
    /// Toggle/configure behavior derived from the descriptor flags.
    Generated,
    Custom(Handler),
}

/// A registered command, keyed by its space-joined full name.
#[derive(Clone)]
pub struct Command {
    pub full_name: String,
    /// Name segments from the top-level group down; also the state tree path.
    pub path: Vec<String>,
    pub help: String,
    pub category: String,
    pub action: Action,
    /// Names of the direct children.
    pub children: Vec<String>,
    pub can_toggle_subcommands: bool,
    pub configurable: bool,
    pub keyed: bool,
}

impl Command {
    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn usage(&self) -> String {
        format!("Usage: {} <{}>", self.full_name, self.children.join("|"))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("full_name", &self.full_name)
            .field("category", &self.category)
            .field("custom", &matches!(self.action, Action::Custom(_)))
            .field("children", &self.children)
            .finish()
    }
}

/// Flat full-name -> command table.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<String, Command>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `spec` (and its subtree) below `parent`, initializing the
    /// matching state tree nodes. Re-registering a full name replaces it.
    pub fn register(
        &mut self,
        spec: CommandSpec,
        parent: &[String],
        parent_category: Option<&str>,
        state: &mut StateTree,
    ) {
        let CommandSpec {
            name,
            help,
            category,
            handler,
            subcommands,
            can_toggle_subcommands,
            configurable,
            keyed,
        } = spec;

        let mut path = parent.to_vec();
        path.push(name.clone());
        let full_name = path.join(" ");
        let has_children = !subcommands.is_empty();
        let category = category
            .or_else(|| parent_category.map(str::to_string))
            .or_else(|| (parent.is_empty() && has_children).then(|| name.clone()))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        state.init_node(parent, &name, has_children);
        if can_toggle_subcommands {
            state.init_all_flag(parent, &name);
        }

        let command = Command {
            full_name: full_name.clone(),
            path: path.clone(),
            help,
            category: category.clone(),
            action: handler.map_or(Action::Generated, Action::Custom),
            children: subcommands.iter().map(|child| child.name.clone()).collect(),
            can_toggle_subcommands,
            configurable,
            keyed,
        };
        if self.commands.insert(full_name.clone(), command).is_some() {
            log::debug!("command `{full_name}` re-registered");
        } else {
            self.order.push(full_name);
        }

        for child in subcommands {
            self.register(child, &path, Some(&category), state);
        }
    }

    pub fn get(&self, full_name: &str) -> Option<&Command> {
        self.commands.get(full_name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.order.iter().filter_map(|name| self.commands.get(name))
    }

    /// Distinct categories in registration order.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();
        for command in self.iter() {
            if !categories.contains(&command.category) {
                categories.push(command.category.clone());
            }
        }
        categories
    }
}
