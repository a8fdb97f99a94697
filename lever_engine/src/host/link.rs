use std::cell::{Cell, RefCell};

use super::Value;

/// The collaborator-facing handle on the live host graph.
///
/// The host integration layer owns the graph; the console and the monitor
/// only hold this link. When the host reloads its own state it calls
/// [`HostLink::repoint`] and every consumer follows on its next access.
#[derive(Default)]
pub struct HostLink {
    root: RefCell<Option<Value>>,
    ready: Cell<bool>,
    generation: Cell<u64>,
}

impl HostLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link that is already pointed at `root` and ready.
    pub fn with_root(root: impl Into<Value>) -> Self {
        let link = Self::new();
        link.repoint(root);
        link.mark_ready();
        link
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get() && self.root.borrow().is_some()
    }

    pub fn mark_ready(&self) {
        self.ready.set(true);
    }

    /// Root of the graph, or `None` until the host has signalled readiness.
    pub fn root(&self) -> Option<Value> {
        if !self.ready.get() {
            return None;
        }
        self.root.borrow().clone()
    }

    pub fn repoint(&self, root: impl Into<Value>) {
        *self.root.borrow_mut() = Some(root.into());
        self.generation.set(self.generation.get() + 1);
        log::debug!("host graph repointed (generation {})", self.generation.get());
    }

    /// Bumped on every [`HostLink::repoint`].
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }
}
