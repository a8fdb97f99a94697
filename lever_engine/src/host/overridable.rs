use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use thiserror::Error;

pub type Getter<T> = Rc<dyn Fn(&T) -> T>;
pub type Setter<T> = Rc<dyn Fn(T, &mut T)>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterceptError {
    #[error("an interception is already installed on this field")]
    AlreadyInstalled,
    #[error("field `{0}` is already intercepted; restore it before installing another behavior")]
    AlreadyIntercepted(String),
}

/// Custom read/write logic layered over a field.
///
/// `Getter` only overrides reads and turns writes into no-ops. `Accessors`
/// controls both sides independently; a missing side passes the backing value
/// through untouched.
pub enum Behavior<T> {
    Getter(Getter<T>),
    Accessors {
        get: Option<Getter<T>>,
        set: Option<Setter<T>>,
    },
}

impl<T> Clone for Behavior<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Getter(get) => Self::Getter(Rc::clone(get)),
            Self::Accessors { get, set } => Self::Accessors {
                get: get.clone(),
                set: set.clone(),
            },
        }
    }
}

impl<T> Behavior<T> {
    pub fn getter(get: impl Fn(&T) -> T + 'static) -> Self {
        Self::Getter(Rc::new(get))
    }

    /// Pass-through accessors, to be refined with [`Behavior::with_get`] and
    /// [`Behavior::with_set`].
    pub fn accessors() -> Self {
        Self::Accessors {
            get: None,
            set: None,
        }
    }

    pub fn with_get(self, get: impl Fn(&T) -> T + 'static) -> Self {
        match self {
            Self::Getter(_) => Self::Getter(Rc::new(get)),
            Self::Accessors { set, .. } => Self::Accessors {
                get: Some(Rc::new(get)),
                set,
            },
        }
    }

    pub fn with_set(self, set: impl Fn(T, &mut T) + 'static) -> Self {
        let get = match self {
            Self::Getter(get) => Some(get),
            Self::Accessors { get, .. } => get,
        };
        Self::Accessors {
            get,
            set: Some(Rc::new(set)),
        }
    }

    fn read_hook(&self) -> Option<Getter<T>> {
        match self {
            Self::Getter(get) => Some(Rc::clone(get)),
            Self::Accessors { get, .. } => get.clone(),
        }
    }
}

enum WritePath<T> {
    Ignore,
    Through,
    Custom(Setter<T>),
}

/// A field whose reads and writes can be overridden without losing the
/// original value.
///
/// The backing slot always holds the "true" value; [`Overridable::reset`]
/// drops the behavior and exposes it again.
pub struct Overridable<T> {
    backing: RefCell<T>,
    behavior: RefCell<Option<Behavior<T>>>,
}

impl<T: Clone> Overridable<T> {
    pub fn new(value: T) -> Self {
        Self {
            backing: RefCell::new(value),
            behavior: RefCell::new(None),
        }
    }

    /// Install `behavior`. A field accepts a single behavior at a time so the
    /// backing value is never replaced by an already-overridden one.
    pub fn install(&self, behavior: Behavior<T>) -> Result<(), InterceptError> {
        let mut slot = self.behavior.borrow_mut();
        if slot.is_some() {
            return Err(InterceptError::AlreadyInstalled);
        }
        *slot = Some(behavior);
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.behavior.borrow().is_some()
    }

    /// Observable value. A panicking getter falls back to the original.
    pub fn read(&self) -> T {
        let hook = self.behavior.borrow().as_ref().and_then(Behavior::read_hook);
        let original = self.backing.borrow().clone();
        let Some(get) = hook else {
            return original;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| get(&original))) {
            Ok(value) => value,
            Err(_) => {
                log::warn!("interception getter panicked; returning the original value");
                original
            }
        }
    }

    pub fn write(&self, value: T) {
        let path = match self.behavior.borrow().as_ref() {
            None => WritePath::Through,
            Some(Behavior::Getter(_)) => WritePath::Ignore,
            Some(Behavior::Accessors { set: None, .. }) => WritePath::Through,
            Some(Behavior::Accessors { set: Some(set), .. }) => WritePath::Custom(Rc::clone(set)),
        };
        match path {
            WritePath::Ignore => log::trace!("write ignored by read-only interception"),
            WritePath::Through => *self.backing.borrow_mut() = value,
            WritePath::Custom(set) => {
                // The setter may read this field again, so it works on a copy.
                let mut backing = self.backing.borrow().clone();
                set(value, &mut backing);
                *self.backing.borrow_mut() = backing;
            }
        }
    }

    /// Remove the behavior. Returns whether one was installed.
    pub fn reset(&self) -> bool {
        self.behavior.borrow_mut().take().is_some()
    }

    /// The backing value, bypassing any behavior.
    pub fn original(&self) -> T {
        self.backing.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn getter_doubles_and_ignores_writes() {
        let field = Overridable::new(5i64);
        field
            .install(Behavior::getter(|original| original * 2))
            .expect("first install");

        assert_eq!(field.read(), 10);
        field.write(99);
        assert_eq!(field.read(), 10);
        assert_eq!(field.original(), 5);
    }

    #[test]
    fn accessors_without_set_write_through() {
        let field = Overridable::new(1.0f64);
        field
            .install(Behavior::accessors().with_get(|original| original + 0.5))
            .expect("install");

        field.write(4.0);
        assert_eq!(field.original(), 4.0);
        assert_eq!(field.read(), 4.5);
    }

    #[test]
    fn custom_setter_receives_backing_slot() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let field = Overridable::new(10i64);
        field
            .install(Behavior::accessors().with_set(move |value: i64, backing: &mut i64| {
                seen.set(seen.get() + 1);
                *backing = value.clamp(0, 50);
            }))
            .expect("install");

        field.write(80);
        assert_eq!(field.read(), 50);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn second_install_is_rejected_until_reset() {
        let field = Overridable::new(3i64);
        field
            .install(Behavior::getter(|v| v + 1))
            .expect("first install");
        assert_eq!(
            field.install(Behavior::getter(|v| v * 100)),
            Err(InterceptError::AlreadyInstalled)
        );
        assert_eq!(field.read(), 4);

        assert!(field.reset());
        assert_eq!(field.read(), 3);
        field
            .install(Behavior::getter(|v| v * 100))
            .expect("install after reset");
        assert_eq!(field.read(), 300);
    }

    #[test]
    fn panicking_getter_falls_back_to_original() {
        let field = Overridable::new(7i64);
        field
            .install(Behavior::getter(|_| panic!("broken override")))
            .expect("install");
        assert_eq!(field.read(), 7);
    }
}
