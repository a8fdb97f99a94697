//! Hierarchical console commands.
//!
//! Collaborators describe commands with [`CommandSpec`]; the [`Console`]
//! registers them, mirrors their hierarchy in a [`StateTree`] and dispatches
//! operator input with longest-prefix matching.

pub mod builtin;
mod config;
mod dispatcher;
mod generated;
mod registry;
mod state_tree;
mod transform;

pub use config::{ConfigOverlay, ConfigValue};
pub use dispatcher::{Console, ConsoleOptions, Initializer};
pub use registry::{Action, Command, CommandSpec, Registry, DEFAULT_CATEGORY};
pub use state_tree::{StateTree, ALL_SUFFIX};
pub use transform::{parse_value, ParsedValue, Transform, TransformEngine, TransformError, PROBE_INPUT};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::host::{HostLink, Value};
use crate::path::{PathError, PathResolver};

/// Custom command body. Receives the parameters left after the command's own
/// name; `Ok(None)` renders as `Done.`.
pub type Handler = Rc<dyn Fn(&CommandEnv, &[String]) -> anyhow::Result<Option<String>>>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0} is not a valid option.")]
    NotFound(String),
    #[error("invalid value for `{command}`: {source}")]
    InvalidParameterFormat {
        command: String,
        #[source]
        source: TransformError,
    },
    #[error("{0:#}")]
    HandlerExecution(anyhow::Error),
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("{0}")]
    Usage(String),
    #[error("path writes are disabled (start with --allow-path-writes)")]
    PathWritesDisabled,
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Everything a handler may touch.
pub struct CommandEnv {
    pub registry: Rc<RefCell<Registry>>,
    pub state: Rc<RefCell<StateTree>>,
    pub config: Rc<RefCell<ConfigOverlay>>,
    pub host: Rc<HostLink>,
    pub resolver: Rc<PathResolver>,
    pub transforms: TransformEngine,
    pub options: ConsoleOptions,
    /// Deep copies taken by the `snapshot` built-in.
    pub snapshots: RefCell<BTreeMap<String, Value>>,
}

impl CommandEnv {
    /// Host root, failing while the host has not signalled readiness.
    pub fn root(&self) -> Result<Value, PathError> {
        self.host.root().ok_or(PathError::HostNotReady)
    }

    /// Value at `path`; a path naming only the root (or a root alias) yields
    /// the aliased node itself.
    pub fn lookup(&self, path: &str) -> Result<Value, PathError> {
        let root = self.root()?;
        let segments = self.resolver.segments(path)?;
        if segments.is_empty() {
            return Ok(root);
        }
        self.resolver.read(&root, path)
    }
}
