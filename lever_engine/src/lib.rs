//! Live introspection and patching console for a host process's object graph.
//!
//! The crate has three cooperating parts: a hierarchical command console
//! ([`commands`]), non-destructive property interception on the host graph
//! ([`host`]), and a value monitor that streams watched paths to a remote
//! listener ([`monitor`]). Everything runs on the host thread and is driven
//! by [`commands::Console::dispatch`] and [`monitor::Monitor::pump`].

pub mod cli;
pub mod cloner;
pub mod commands;
pub mod demo;
pub mod host;
pub mod monitor;
pub mod path;
pub mod settings;
pub mod walk;

pub use commands::{CommandError, CommandSpec, Console, ConsoleOptions};
pub use host::{Behavior, HostLink, List, Map, NativeObject, Value};
pub use monitor::{Monitor, MonitorSettings};
pub use path::{PathError, PathResolver};
pub use settings::Settings;
