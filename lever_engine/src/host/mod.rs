//! Dynamic model of the host's object graph.
//!
//! Lists and maps are shared handles with reference identity, so the graph
//! can contain cycles and several paths may reach the same node. Everything
//! runs on the host thread; nothing here is `Send`.

mod link;
mod overridable;

pub use link::HostLink;
pub use overridable::{Behavior, Getter, InterceptError, Overridable, Setter};

use std::cell::{BorrowError, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map as JsonMap, Number, Value as Json};
use thiserror::Error;

/// Opaque host object that is not a plain list or map.
pub trait NativeObject {
    fn type_name(&self) -> &str;

    /// JSON form used for snapshots; objects that cannot be serialized return
    /// an error and are then shared by reference.
    fn to_json(&self) -> anyhow::Result<Json>;
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    List(List),
    Map(Map),
    Native(Rc<dyn NativeObject>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Native(_) => "native",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Lists and maps: values that own addressable children.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Address of the shared allocation for reference-typed values.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::List(list) => Some(list.identity()),
            Self::Map(map) => Some(map.identity()),
            Self::Native(obj) => Some(Rc::as_ptr(obj) as *const () as usize),
            _ => None,
        }
    }

    /// Build a fresh graph from JSON. Objects become maps, arrays lists.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Nil,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::Str(s.clone()),
            Json::Array(items) => Self::List(List::from_values(items.iter().map(Value::from_json))),
            Json::Object(fields) => {
                let map = Map::new();
                for (key, value) in fields {
                    map.set(key, Value::from_json(value));
                }
                Self::Map(map)
            }
        }
    }

    /// JSON view limited to `max_depth` levels of nesting.
    ///
    /// Cycles render as `"[Circular]"`, deeper levels as `"[…]"`, and
    /// non-finite numbers as the strings `NaN`, `Infinity` and `-Infinity`.
    pub fn to_json(&self, max_depth: usize) -> Json {
        let mut stack = HashSet::new();
        self.to_json_inner(max_depth, &mut stack)
    }

    fn to_json_inner(&self, remaining: usize, stack: &mut HashSet<usize>) -> Json {
        match self {
            Self::Nil => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Str(s) => Json::String(s.clone()),
            Self::Native(obj) => obj
                .to_json()
                .unwrap_or_else(|_| Json::String(format!("[{}]", obj.type_name()))),
            Self::List(_) | Self::Map(_) => {
                let id = self.identity().unwrap_or_default();
                if stack.contains(&id) {
                    return Json::String("[Circular]".to_string());
                }
                if remaining == 0 {
                    return Json::String("[…]".to_string());
                }
                stack.insert(id);
                let json = match self {
                    Self::List(list) => Json::Array(
                        list.items()
                            .iter()
                            .map(|item| item.to_json_inner(remaining - 1, stack))
                            .collect(),
                    ),
                    Self::Map(map) => {
                        let mut fields = JsonMap::new();
                        for (key, value) in map.entries() {
                            fields.insert(key, value.to_json_inner(remaining - 1, stack));
                        }
                        Json::Object(fields)
                    }
                    _ => Json::Null,
                };
                stack.remove(&id);
                json
            }
        }
    }
}

pub(crate) fn number_to_json(n: f64) -> Json {
    if n.is_nan() {
        return Json::String("NaN".to_string());
    }
    if n.is_infinite() {
        let label = if n > 0.0 { "Infinity" } else { "-Infinity" };
        return Json::String(label.to_string());
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Json::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
}

impl PartialEq for Value {
    /// Primitives compare by value, composites by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(list) => write!(f, "List({:#x}; {} items)", list.identity(), list.len()),
            Self::Map(map) => write!(f, "Map({:#x}; {} keys)", map.identity(), map.len()),
            Self::Native(obj) => write!(f, "Native({})", obj.type_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            _ => write!(f, "{}", self.to_json(2)),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Map(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}

#[derive(Clone)]
enum Slot {
    Plain(Value),
    Hooked(Rc<Overridable<Value>>),
}

impl Slot {
    fn read(&self) -> Value {
        match self {
            Self::Plain(value) => value.clone(),
            Self::Hooked(field) => field.read(),
        }
    }
}

/// Shared string-keyed record.
///
/// Every field can carry an interception; reads and writes through the map
/// honour it. Slots are cloned out before hooks run so a hook may freely read
/// the map it lives in.
#[derive(Clone, Default)]
pub struct Map(Rc<RefCell<BTreeMap<String, Slot>>>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Map) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    /// Observable value of `key`; missing keys read as nil.
    pub fn get(&self, key: &str) -> Value {
        let slot = self.0.borrow().get(key).cloned();
        slot.map(|slot| slot.read()).unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let hooked = match self.0.borrow().get(key) {
            Some(Slot::Hooked(field)) => Some(Rc::clone(field)),
            _ => None,
        };
        match hooked {
            Some(field) => field.write(value),
            None => {
                self.0
                    .borrow_mut()
                    .insert(key.to_string(), Slot::Plain(value));
            }
        }
    }

    /// Remove a field, interception included. Returns its observable value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let slot = self.0.borrow_mut().remove(key);
        slot.map(|slot| slot.read())
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of `(key, observable value)` pairs in key order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let slots: Vec<(String, Slot)> = self
            .0
            .borrow()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .map(|(key, slot)| {
                let value = slot.read();
                (key, value)
            })
            .collect()
    }

    /// Like [`Map::entries`] but reports a map that is mutably borrowed
    /// elsewhere instead of panicking.
    pub fn try_entries(&self) -> Result<Vec<(String, Value)>, BorrowError> {
        let slots: Vec<(String, Slot)> = self
            .0
            .try_borrow()?
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        Ok(slots
            .into_iter()
            .map(|(key, slot)| {
                let value = slot.read();
                (key, value)
            })
            .collect())
    }

    /// Overlay `behavior` on `key`, keeping the current value as the
    /// original. A missing key starts from nil.
    pub fn intercept(&self, key: &str, behavior: Behavior<Value>) -> Result<(), InterceptError> {
        let existing = self.0.borrow().get(key).cloned();
        let field = match existing {
            Some(Slot::Hooked(field)) => field,
            Some(Slot::Plain(value)) => Rc::new(Overridable::new(value)),
            None => Rc::new(Overridable::new(Value::Nil)),
        };
        field
            .install(behavior)
            .map_err(|_| InterceptError::AlreadyIntercepted(key.to_string()))?;
        self.0
            .borrow_mut()
            .insert(key.to_string(), Slot::Hooked(field));
        Ok(())
    }

    pub fn is_intercepted(&self, key: &str) -> bool {
        matches!(self.0.borrow().get(key), Some(Slot::Hooked(field)) if field.is_installed())
    }

    /// Drop the interception on `key` and expose the backing value again.
    pub fn restore(&self, key: &str) -> bool {
        let slot = self.0.borrow().get(key).cloned();
        let Some(Slot::Hooked(field)) = slot else {
            return false;
        };
        let was_installed = field.reset();
        self.0
            .borrow_mut()
            .insert(key.to_string(), Slot::Plain(field.original()));
        was_installed
    }

    /// Backing value of `key`, ignoring any interception.
    pub fn original(&self, key: &str) -> Option<Value> {
        let slot = self.0.borrow().get(key).cloned();
        slot.map(|slot| match slot {
            Slot::Plain(value) => value,
            Slot::Hooked(field) => field.original(),
        })
    }
}

/// A list write landed more than one slot past the end.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("index {index} is past the end of a list of {len}")]
pub struct IndexPastEnd {
    pub index: usize,
    pub len: usize,
}

/// Shared ordered sequence.
#[derive(Clone, Default)]
pub struct List(Rc<RefCell<Vec<Value>>>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self(Rc::new(RefCell::new(values.into_iter().collect())))
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Value {
        self.0.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Assign `index`. Writing at `len()` appends; anything further out is
    /// rejected.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), IndexPastEnd> {
        let mut items = self.0.borrow_mut();
        let len = items.len();
        match index.cmp(&len) {
            std::cmp::Ordering::Less => items[index] = value.into(),
            std::cmp::Ordering::Equal => items.push(value.into()),
            std::cmp::Ordering::Greater => return Err(IndexPastEnd { index, len }),
        }
        Ok(())
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.borrow_mut().push(value.into());
    }

    pub fn items(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn try_items(&self) -> Result<Vec<Value>, BorrowError> {
        Ok(self.0.try_borrow()?.clone())
    }
}
