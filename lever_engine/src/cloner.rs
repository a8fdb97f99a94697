use std::collections::HashMap;

use crate::host::{List, Map, Value};

/// Nesting level past which a branch is shared instead of copied.
pub const MAX_CLONE_DEPTH: usize = 256;

/// Deep copy of plain composites.
///
/// Primitives are returned as is, lists and maps are rebuilt recursively from
/// their observable values. Native objects go through a JSON round trip; when
/// that fails the original reference is kept, so callers must not assume the
/// copy is fully independent. Every composite is copied once: a node reached
/// again (through a cycle or a second parent) reuses its copy, so the clone
/// keeps the shape of the source graph. Chains deeper than
/// [`MAX_CLONE_DEPTH`] are shared from there on.
pub fn deep_clone(value: &Value) -> Value {
    Cloner::default().clone_at(value, 0)
}

/// Copies made so far, keyed by the identity of their source.
#[derive(Default)]
struct Cloner {
    copies: HashMap<usize, Value>,
}

impl Cloner {
    fn clone_at(&mut self, value: &Value, depth: usize) -> Value {
        if let Some(copy) = value.identity().and_then(|id| self.copies.get(&id)) {
            return copy.clone();
        }
        match value {
            Value::Nil | Value::Bool(_) | Value::Number(_) | Value::Str(_) => value.clone(),
            _ if depth >= MAX_CLONE_DEPTH => {
                log::warn!("clone depth limit reached; sharing {value:?} by reference");
                value.clone()
            }
            Value::List(list) => {
                let copy = List::new();
                self.copies.insert(list.identity(), Value::List(copy.clone()));
                for item in list.items() {
                    let item = self.clone_at(&item, depth + 1);
                    copy.push(item);
                }
                Value::List(copy)
            }
            Value::Map(map) => {
                let copy = Map::new();
                self.copies.insert(map.identity(), Value::Map(copy.clone()));
                for (key, field) in map.entries() {
                    let field = self.clone_at(&field, depth + 1);
                    copy.set(&key, field);
                }
                Value::Map(copy)
            }
            Value::Native(object) => {
                let copy = match object.to_json() {
                    Ok(json) => Value::from_json(&json),
                    Err(err) => {
                        log::warn!(
                            "could not clone native {}: {err:#}; keeping the original reference",
                            object.type_name()
                        );
                        value.clone()
                    }
                };
                if let Some(id) = value.identity() {
                    self.copies.insert(id, copy.clone());
                }
                copy
            }
        }
    }
}
