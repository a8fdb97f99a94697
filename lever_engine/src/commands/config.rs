use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as Json};

use super::transform::{ParsedValue, Transform};

#[derive(Debug, Clone)]
pub enum ConfigValue {
    Literal(Json),
    Transform(Transform),
    Group(BTreeMap<String, ConfigValue>),
}

impl From<ParsedValue> for ConfigValue {
    fn from(value: ParsedValue) -> Self {
        match value {
            ParsedValue::Literal(json) => Self::Literal(json),
            ParsedValue::Transform(transform) => Self::Transform(transform),
        }
    }
}

/// Values and transforms configured through the console, addressed by the
/// same paths as the state tree.
///
/// Behavior code installed on the host reads it (typically through
/// [`ConfigOverlay::apply`]); only configurable commands write to it.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverlay {
    root: BTreeMap<String, ConfigValue>,
}

impl ConfigOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get(&self, path: &[String]) -> Option<&ConfigValue> {
        let (last, parents) = path.split_last()?;
        let mut node = &self.root;
        for segment in parents {
            match node.get(segment)? {
                ConfigValue::Group(children) => node = children,
                _ => return None,
            }
        }
        node.get(last)
    }

    /// Store `value` at `path`, turning non-group intermediates into groups.
    pub fn set(&mut self, path: &[String], value: ConfigValue) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut node = &mut self.root;
        for segment in parents {
            let entry = node
                .entry(segment.clone())
                .or_insert_with(|| ConfigValue::Group(BTreeMap::new()));
            if !matches!(entry, ConfigValue::Group(_)) {
                *entry = ConfigValue::Group(BTreeMap::new());
            }
            node = match entry {
                ConfigValue::Group(children) => children,
                _ => unreachable!("entry was just made a group"),
            };
        }
        node.insert(last.clone(), value);
    }

    pub fn remove(&mut self, path: &[String]) -> Option<ConfigValue> {
        let (last, parents) = path.split_last()?;
        let mut node = &mut self.root;
        for segment in parents {
            match node.get_mut(segment)? {
                ConfigValue::Group(children) => node = children,
                _ => return None,
            }
        }
        node.remove(last)
    }

    /// Numeric literal at `path`.
    pub fn number(&self, path: &[String]) -> Option<f64> {
        match self.get(path)? {
            ConfigValue::Literal(json) => json.as_f64(),
            _ => None,
        }
    }

    /// Run `input` through whatever is configured at `path`: a transform is
    /// applied, a numeric literal replaces the input, anything else (or a
    /// failing transform) leaves it unchanged.
    pub fn apply(&self, path: &[String], input: f64) -> f64 {
        match self.get(path) {
            Some(ConfigValue::Transform(transform)) => match transform.apply(input) {
                Ok(output) => output,
                Err(err) => {
                    log::warn!(
                        "transform `{}` at {} failed: {err}",
                        transform.source(),
                        path.join(" ")
                    );
                    input
                }
            },
            Some(ConfigValue::Literal(json)) => json.as_f64().unwrap_or(input),
            _ => input,
        }
    }

    /// Display form; transforms render as their source text.
    pub fn to_json(&self) -> Json {
        group_to_json(&self.root)
    }
}

fn group_to_json(group: &BTreeMap<String, ConfigValue>) -> Json {
    let mut fields = JsonMap::new();
    for (key, value) in group {
        let json = match value {
            ConfigValue::Literal(json) => json.clone(),
            ConfigValue::Transform(transform) => Json::String(format!("fn: {}", transform.source())),
            ConfigValue::Group(children) => group_to_json(children),
        };
        fields.insert(key.clone(), json);
    }
    Json::Object(fields)
}
