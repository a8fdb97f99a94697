//! Path syntax and the container-indirection rule.
//!
//! Many host objects keep their real fields one level down, under
//! [`CONTAINER_KEY`]. Every traversal (walker, resolver, console dumps) goes
//! through [`children`] and [`step_into`] so the rule is applied identically.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::host::{IndexPastEnd, Value};

/// Reserved key under which wrapper objects store their real fields.
pub const CONTAINER_KEY: &str = "_data";

/// Alias that always names the host root.
pub const ROOT_ALIAS: &str = "Root";

static SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|\.)([^.\[\]]+)|\[\s*(\d+)\s*\]|\[\s*"([^"]*)"\s*\]|\[\s*'([^']*)'\s*\]"#)
        .expect("segment regex compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn names_container(&self) -> bool {
        matches!(self, Self::Key(key) if key == CONTAINER_KEY)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("invalid path syntax near `{0}`")]
    Syntax(String),
    #[error("path `{0}` does not name a property")]
    NoProperty(String),
    #[error("`{segment}` not found under `{at}`")]
    Missing { segment: String, at: String },
    #[error("`{at}` is not a composite value")]
    NotComposite { at: String },
    #[error("host state is not ready")]
    HostNotReady,
    #[error(transparent)]
    IndexPastEnd(#[from] IndexPastEnd),
}

/// Render segments back into path syntax (`a.b[2].c`).
pub fn format_path(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "<root>".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            Segment::Index(index) => out.push_str(&format!("[{index}]")),
        }
    }
    out
}

/// Split a path on `.` and bracket indices (`[3]`, `["key"]`).
pub fn tokenize(path: &str) -> Result<Vec<Segment>, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    let mut segments = Vec::new();
    let mut cursor = 0;
    for captures in SEGMENT_RE.captures_iter(trimmed) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() != cursor {
            return Err(PathError::Syntax(trimmed[cursor..].to_string()));
        }
        cursor = whole.end();
        let segment = if let Some(key) = captures.get(1) {
            Segment::Key(key.as_str().trim().to_string())
        } else if let Some(index) = captures.get(2) {
            let index = index
                .as_str()
                .parse()
                .map_err(|_| PathError::Syntax(index.as_str().to_string()))?;
            Segment::Index(index)
        } else {
            let quoted = captures.get(3).or_else(|| captures.get(4));
            Segment::Key(quoted.map(|m| m.as_str().to_string()).unwrap_or_default())
        };
        segments.push(segment);
    }
    if cursor != trimmed.len() {
        return Err(PathError::Syntax(trimmed[cursor..].to_string()));
    }
    Ok(segments)
}

/// The node whose fields are really addressed: the inner container when the
/// node is a wrapper, otherwise the node itself.
pub fn unwrap_container(value: &Value) -> Value {
    if let Value::Map(map) = value {
        let inner = map.get(CONTAINER_KEY);
        if inner.is_composite() {
            return inner;
        }
    }
    value.clone()
}

/// Parent to look `segment` up in. Naming the container key explicitly
/// addresses the wrapper itself.
pub fn step_into(value: &Value, segment: &Segment) -> Value {
    if segment.names_container() {
        value.clone()
    } else {
        unwrap_container(value)
    }
}

/// Direct child of a composite, `None` when absent or not addressable.
pub fn child(value: &Value, segment: &Segment) -> Option<Value> {
    match (value, segment) {
        (Value::Map(map), Segment::Key(key)) => map.contains_key(key).then(|| map.get(key)),
        (Value::Map(map), Segment::Index(index)) => {
            let key = index.to_string();
            map.contains_key(&key).then(|| map.get(&key))
        }
        (Value::List(list), Segment::Index(index)) => (*index < list.len()).then(|| list.get(*index)),
        (Value::List(list), Segment::Key(key)) => {
            let index: usize = key.parse().ok()?;
            (index < list.len()).then(|| list.get(index))
        }
        _ => None,
    }
}

/// Children of `value` after container indirection. Non-composites have none.
pub fn children(value: &Value) -> Result<Vec<(Segment, Value)>, std::cell::BorrowError> {
    match unwrap_container(value) {
        Value::Map(map) => Ok(map
            .try_entries()?
            .into_iter()
            .map(|(key, value)| (Segment::Key(key), value))
            .collect()),
        Value::List(list) => Ok(list
            .try_items()?
            .into_iter()
            .enumerate()
            .map(|(index, value)| (Segment::Index(index), value))
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// A resolved path: the composite holding the property and the property.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub target: Value,
    pub prop: Segment,
}

impl Resolved {
    pub fn read(&self) -> Value {
        child(&self.target, &self.prop).unwrap_or_default()
    }

    pub fn write(&self, value: Value) -> Result<(), PathError> {
        match (&self.target, &self.prop) {
            (Value::Map(map), Segment::Key(key)) => map.set(key, value),
            (Value::Map(map), Segment::Index(index)) => map.set(&index.to_string(), value),
            (Value::List(list), Segment::Index(index)) => list.set(*index, value)?,
            (Value::List(list), Segment::Key(key)) => {
                let index = key
                    .parse()
                    .map_err(|_| PathError::Syntax(key.clone()))?;
                list.set(index, value)?;
            }
            _ => {
                return Err(PathError::NotComposite {
                    at: self.prop.to_string(),
                })
            }
        }
        Ok(())
    }
}

/// Resolves textual paths against a host root, expanding root aliases.
#[derive(Debug, Clone)]
pub struct PathResolver {
    aliases: BTreeMap<String, Vec<Segment>>,
}

impl Default for PathResolver {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(ROOT_ALIAS.to_string(), Vec::new());
        Self { aliases }
    }
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` at the start of a path stand for `target` (relative to the
    /// host root, empty for the root itself).
    pub fn add_alias(&mut self, name: &str, target: &str) -> Result<(), PathError> {
        let segments = if target.trim().is_empty() {
            Vec::new()
        } else {
            tokenize(target)?
        };
        self.aliases.insert(name.to_string(), segments);
        Ok(())
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, String)> {
        self.aliases
            .iter()
            .map(|(name, segments)| (name.as_str(), format_path(segments)))
    }

    /// Tokenize and expand a leading alias.
    pub fn segments(&self, path: &str) -> Result<Vec<Segment>, PathError> {
        let mut segments = tokenize(path)?;
        if let Some(Segment::Key(first)) = segments.first() {
            if let Some(alias) = self.aliases.get(first) {
                let mut expanded = alias.clone();
                expanded.extend(segments.drain(1..));
                segments = expanded;
            }
        }
        Ok(segments)
    }

    pub fn resolve(&self, root: &Value, path: &str) -> Result<Resolved, PathError> {
        let segments = self.segments(path)?;
        let Some((prop, parents)) = segments.split_last() else {
            return Err(PathError::NoProperty(path.trim().to_string()));
        };

        let mut current = root.clone();
        for (depth, segment) in parents.iter().enumerate() {
            let parent = step_into(&current, segment);
            if !parent.is_composite() {
                return Err(PathError::NotComposite {
                    at: format_path(&segments[..depth]),
                });
            }
            current = match child(&parent, segment) {
                Some(next) if !next.is_nil() => next,
                _ => {
                    return Err(PathError::Missing {
                        segment: segment.to_string(),
                        at: format_path(&segments[..depth]),
                    })
                }
            };
        }

        let target = step_into(&current, prop);
        if !target.is_composite() {
            return Err(PathError::NotComposite {
                at: format_path(parents),
            });
        }
        Ok(Resolved {
            target,
            prop: prop.clone(),
        })
    }

    /// Resolve and read in one step.
    pub fn read(&self, root: &Value, path: &str) -> Result<Value, PathError> {
        self.resolve(root, path).map(|resolved| resolved.read())
    }
}
