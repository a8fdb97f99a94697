use serde_json::{Map as JsonMap, Value as Json};

/// Suffix of the sibling key holding a group's "all children enabled" flag.
pub const ALL_SUFFIX: &str = "_all";

/// Nested enabled/value tree mirroring the command hierarchy.
///
/// Groups are JSON objects, plain leaves booleans; leaves owned by custom
/// handlers may hold any JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTree {
    root: JsonMap<String, Json>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) the node for `name` under `parent`: `{}` for groups,
    /// `false` for leaves.
    pub fn init_node(&mut self, parent: &[String], name: &str, is_group: bool) {
        let initial = if is_group {
            Json::Object(JsonMap::new())
        } else {
            Json::Bool(false)
        };
        self.container_mut(parent).insert(name.to_string(), initial);
    }

    pub fn init_all_flag(&mut self, parent: &[String], name: &str) {
        self.container_mut(parent)
            .insert(all_key(name), Json::Bool(false));
    }

    pub fn get(&self, path: &[String]) -> Option<&Json> {
        let (last, parents) = path.split_last()?;
        let mut node = &self.root;
        for segment in parents {
            node = node.get(segment)?.as_object()?;
        }
        node.get(last)
    }

    /// Whether the leaf at `path` is enabled. Missing or non-boolean leaves
    /// read as disabled.
    pub fn flag(&self, path: &[String]) -> bool {
        matches!(self.get(path), Some(Json::Bool(true)))
    }

    pub fn is_group(&self, path: &[String]) -> bool {
        matches!(self.get(path), Some(Json::Object(_)))
    }

    pub fn set_flag(&mut self, path: &[String], enabled: bool) {
        self.set(path, Json::Bool(enabled));
    }

    /// Store an arbitrary value at `path`; used by custom handlers.
    pub fn set(&mut self, path: &[String], value: Json) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        self.container_mut(parents).insert(last.clone(), value);
    }

    pub fn all_flag(&self, group: &[String]) -> bool {
        let Some((name, parents)) = group.split_last() else {
            return false;
        };
        let mut sibling = parents.to_vec();
        sibling.push(all_key(name));
        self.flag(&sibling)
    }

    pub fn set_all_flag(&mut self, group: &[String], enabled: bool) {
        let Some((name, parents)) = group.split_last() else {
            return;
        };
        self.container_mut(parents)
            .insert(all_key(name), Json::Bool(enabled));
    }

    pub fn to_json(&self) -> Json {
        Json::Object(self.root.clone())
    }

    /// Object at `path`, creating (or replacing non-object nodes with) empty
    /// objects along the way.
    fn container_mut(&mut self, path: &[String]) -> &mut JsonMap<String, Json> {
        let mut node = &mut self.root;
        for segment in path {
            let entry = node
                .entry(segment.clone())
                .or_insert_with(|| Json::Object(JsonMap::new()));
            if !entry.is_object() {
                *entry = Json::Object(JsonMap::new());
            }
            node = match entry {
                Json::Object(map) => map,
                _ => unreachable!("entry was just made an object"),
            };
        }
        node
    }
}

fn all_key(name: &str) -> String {
    format!("{name}{ALL_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn init_mirrors_hierarchy() {
        let mut tree = StateTree::new();
        tree.init_node(&[], "wide", true);
        tree.init_all_flag(&[], "wide");
        tree.init_node(&path(&["wide"]), "mtx", false);
        tree.init_node(&path(&["wide"]), "post", false);

        assert_eq!(
            tree.to_json(),
            json!({ "wide": { "mtx": false, "post": false }, "wide_all": false })
        );
        assert!(tree.is_group(&path(&["wide"])));
    }

    #[test]
    fn flags_toggle_independently() {
        let mut tree = StateTree::new();
        tree.init_node(&[], "wide", true);
        tree.init_node(&path(&["wide"]), "mtx", false);

        tree.set_flag(&path(&["wide", "mtx"]), true);
        tree.set_all_flag(&path(&["wide"]), true);
        assert!(tree.flag(&path(&["wide", "mtx"])));
        assert!(tree.all_flag(&path(&["wide"])));
        assert!(!tree.flag(&path(&["wide", "missing"])));
    }

    #[test]
    fn custom_values_replace_leaves() {
        let mut tree = StateTree::new();
        tree.init_node(&[], "fov", false);
        tree.set(&path(&["fov"]), json!(90));
        assert_eq!(tree.get(&path(&["fov"])), Some(&json!(90)));
        assert!(!tree.flag(&path(&["fov"])));
    }
}
