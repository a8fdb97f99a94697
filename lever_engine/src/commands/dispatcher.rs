use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread;

use anyhow::Context;

use super::{
    generated, Action, Command, CommandEnv, CommandError, CommandSpec, ConfigOverlay, Registry,
    StateTree, TransformEngine,
};
use crate::host::HostLink;
use crate::path::PathResolver;

/// One-shot setup run off the host thread on the first dispatch.
pub type Initializer = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Default)]
pub struct ConsoleOptions {
    /// Enables the commands that assign arbitrary host paths.
    pub allow_path_writes: bool,
}

/// Registry, state and dispatcher behind the operator console.
pub struct Console {
    env: CommandEnv,
    initializer: RefCell<Option<Initializer>>,
    initialized: Cell<bool>,
}

impl Console {
    pub fn new(
        host: Rc<HostLink>,
        resolver: Rc<PathResolver>,
        options: ConsoleOptions,
    ) -> anyhow::Result<Self> {
        let transforms = TransformEngine::new().context("creating transform engine")?;
        Ok(Self {
            env: CommandEnv {
                registry: Rc::new(RefCell::new(Registry::new())),
                state: Rc::new(RefCell::new(StateTree::new())),
                config: Rc::new(RefCell::new(ConfigOverlay::new())),
                host,
                resolver,
                transforms,
                options,
                snapshots: RefCell::new(BTreeMap::new()),
            },
            initializer: RefCell::new(None),
            initialized: Cell::new(false),
        })
    }

    pub fn env(&self) -> &CommandEnv {
        &self.env
    }

    pub fn state(&self) -> Rc<RefCell<StateTree>> {
        Rc::clone(&self.env.state)
    }

    /// Shared with behavior code that reads configured values.
    pub fn config(&self) -> Rc<RefCell<ConfigOverlay>> {
        Rc::clone(&self.env.config)
    }

    pub fn host(&self) -> Rc<HostLink> {
        Rc::clone(&self.env.host)
    }

    pub fn set_initializer(&self, initializer: Initializer) {
        *self.initializer.borrow_mut() = Some(initializer);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn register_command(&self, spec: CommandSpec) {
        let mut state = self.env.state.borrow_mut();
        self.env
            .registry
            .borrow_mut()
            .register(spec, &[], None, &mut state);
    }

    /// Same as [`Console::register_command`]; kept separate so call sites
    /// read as the hierarchy they declare.
    pub fn register_group(&self, spec: CommandSpec) {
        if spec.subcommands.is_empty() {
            log::warn!("group `{}` registered without subcommands", spec.name);
        }
        self.register_command(spec);
    }

    /// Longest registered prefix of `tokens` and the parameters after it.
    pub fn find(&self, tokens: &[String]) -> Option<(Command, Vec<String>)> {
        let registry = self.env.registry.borrow();
        (1..=tokens.len()).rev().find_map(|split| {
            registry
                .get(&tokens[..split].join(" "))
                .map(|command| (command.clone(), tokens[split..].to_vec()))
        })
    }

    /// Run one line of operator input. Never fails: every outcome is a
    /// display string.
    pub fn dispatch(&self, line: &str) -> String {
        self.run_initializer_once();

        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let Some(first) = tokens.first() else {
            return "No command given.".to_string();
        };
        let Some((command, params)) = self.find(&tokens) else {
            return CommandError::NotFound(first.clone()).to_string();
        };

        log::debug!("dispatch `{}` with {:?}", command.full_name, params);
        match self.invoke(&command, &params) {
            Ok(Some(output)) => output,
            Ok(None) => "Done.".to_string(),
            Err(CommandError::Usage(usage)) => usage,
            Err(err) => {
                log::debug!("`{}` failed: {err}", command.full_name);
                format!("Error: {err}")
            }
        }
    }

    fn invoke(&self, command: &Command, params: &[String]) -> Result<Option<String>, CommandError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &command.action {
            Action::Custom(handler) => {
                handler(&self.env, params).map_err(|err| match err.downcast::<CommandError>() {
                    Ok(err) => err,
                    Err(err) => CommandError::HandlerExecution(err),
                })
            }
            Action::Generated => generated::run(command, &self.env, params),
        }));
        outcome.unwrap_or_else(|payload| Err(CommandError::HandlerPanicked(panic_message(payload))))
    }

    fn run_initializer_once(&self) {
        if self.initialized.replace(true) {
            return;
        }
        let Some(initializer) = self.initializer.borrow_mut().take() else {
            return;
        };
        let spawned = thread::Builder::new()
            .name("lever-init".to_string())
            .spawn(move || {
                if let Err(err) = initializer() {
                    log::warn!("console initializer failed: {err:#}");
                }
            });
        if let Err(err) = spawned {
            log::warn!("could not spawn initializer thread: {err}");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Map;

    fn console() -> Console {
        let host = Rc::new(HostLink::with_root(Map::new()));
        Console::new(host, Rc::new(PathResolver::new()), ConsoleOptions::default())
            .expect("console")
    }

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn unknown_command_names_first_token() {
        let console = console();
        assert_eq!(console.dispatch("zzz"), "zzz is not a valid option.");
        assert_eq!(console.dispatch("zzz yyy"), "zzz is not a valid option.");
        assert_eq!(console.dispatch("   "), "No command given.");
    }

    #[test]
    fn longest_prefix_wins() {
        let console = console();
        console.register_command(CommandSpec::new("a", "A").handler(|_, _| Ok(None)));
        console.register_command(
            CommandSpec::new("a", "A").subcommand(CommandSpec::new("b", "B")),
        );

        let (command, params) = console.find(&tokens("a b c")).expect("match");
        assert_eq!(command.full_name, "a b");
        assert_eq!(params, vec!["c".to_string()]);

        let (command, params) = console.find(&tokens("a x")).expect("match");
        assert_eq!(command.full_name, "a");
        assert_eq!(params, vec!["x".to_string()]);
    }

    #[test]
    fn handler_errors_and_panics_are_rendered() {
        let console = console();
        console.register_command(
            CommandSpec::new("fail", "Fails").handler(|_, _| anyhow::bail!("no luck")),
        );
        console.register_command(
            CommandSpec::new("boom", "Panics").handler(|_, _| panic!("kaboom")),
        );
        console.register_command(CommandSpec::new("quiet", "Quiet").handler(|_, _| Ok(None)));

        assert_eq!(console.dispatch("fail"), "Error: no luck");
        assert_eq!(console.dispatch("boom"), "Error: handler panicked: kaboom");
        assert_eq!(console.dispatch("quiet"), "Done.");
    }
}
