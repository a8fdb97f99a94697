use std::collections::HashSet;

use crate::host::Value;
use crate::path::{self, Segment};

/// Counters reported by [`walk`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub visited: usize,
    pub errors: usize,
}

/// Depth-first traversal of the host graph.
///
/// `visitor` runs for every node when `target_depth` is negative, otherwise
/// only for nodes exactly `target_depth` levels below `node`; nothing deeper
/// is entered. Children are enumerated through the container-indirection
/// rule. Composites are tracked by identity, so each one is visited at most
/// once and cycles terminate. A failing visitor or an unreadable node is
/// logged and skipped; the rest of the walk continues.
pub fn walk<F>(node: &Value, target_depth: i32, mut visitor: F) -> WalkSummary
where
    F: FnMut(&Value, &[Segment], usize) -> anyhow::Result<()>,
{
    let mut visited = HashSet::new();
    if let Some(id) = node.identity() {
        visited.insert(id);
    }
    let mut path = Vec::new();
    let mut summary = WalkSummary::default();
    walk_node(
        node,
        target_depth,
        &mut visitor,
        &mut visited,
        &mut path,
        0,
        &mut summary,
    );
    summary
}

fn walk_node<F>(
    node: &Value,
    target_depth: i32,
    visitor: &mut F,
    visited: &mut HashSet<usize>,
    path: &mut Vec<Segment>,
    depth: usize,
    summary: &mut WalkSummary,
) where
    F: FnMut(&Value, &[Segment], usize) -> anyhow::Result<()>,
{
    let bounded = usize::try_from(target_depth).ok();
    if bounded.map_or(true, |target| depth == target) {
        summary.visited += 1;
        if let Err(err) = visitor(node, path, depth) {
            summary.errors += 1;
            log::debug!("walk visitor failed at {}: {err:#}", path::format_path(path));
        }
    }
    if bounded.is_some_and(|target| depth >= target) {
        return;
    }

    let kids = match path::children(node) {
        Ok(kids) => kids,
        Err(err) => {
            summary.errors += 1;
            log::debug!("walk skipped {}: {err}", path::format_path(path));
            return;
        }
    };
    for (segment, child) in kids {
        if let Some(id) = child.identity() {
            if !visited.insert(id) {
                continue;
            }
        }
        path.push(segment);
        walk_node(&child, target_depth, visitor, visited, path, depth + 1, summary);
        path.pop();
    }
}
