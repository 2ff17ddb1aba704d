//! Project data shrinking.
//!
//! [`ProjectOptimizer`] rewrites the internal identifiers of a structured
//! project to the shortest code words and strips metadata the player
//! recomputes. Block and comment identifiers share one [`IdentifierPool`];
//! variable, list and broadcast identifiers share another. Identifiers used
//! by monitors and caller-reserved identifiers are left alone.
//!
//! The transformation never fails on well-formed input. Missing fields are
//! skipped, not reported.

mod pool;

pub use pool::{ALPHABET, IdentifierPool, code_word};

use crate::packager::error::Result;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Marker identifying comments that store player configuration.
pub const CONFIG_COMMENT_MARKER: &str = "_twconfig_";

const BROADCAST_PRIMITIVE: u64 = 11;
const VARIABLE_PRIMITIVE: u64 = 12;
const LIST_PRIMITIVE: u64 = 13;

/// Deterministic identifier compaction for structured projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectOptimizer {
    reserved: HashSet<String>,
}

struct Pools {
    blocks: IdentifierPool,
    variables: IdentifierPool,
}

impl ProjectOptimizer {
    /// Creates an optimizer that never renames `reserved`.
    pub fn new(reserved: impl IntoIterator<Item = String>) -> Self {
        Self {
            reserved: reserved.into_iter().collect(),
        }
    }

    /// Optimizes serialized project JSON.
    pub fn optimize_bytes(&self, json: &[u8]) -> Result<Vec<u8>> {
        let mut project: Value = serde_json::from_slice(json)?;
        self.optimize(&mut project);
        Ok(serde_json::to_vec(&project)?)
    }

    /// Optimizes a parsed project in place.
    pub fn optimize(&self, project: &mut Value) {
        strip(project);

        let mut reserved = self.reserved.clone();
        reserved.extend(monitor_ids(project));
        let mut pools = Pools {
            blocks: IdentifierPool::new(reserved.clone()),
            variables: IdentifierPool::new(reserved),
        };

        count(project, &mut pools);
        pools.blocks.assign();
        pools.variables.assign();
        log::debug!(
            "Remapping {} block and {} variable identifiers",
            pools.blocks.len(),
            pools.variables.len()
        );
        rewrite(project, &pools);
    }
}

fn targets(project: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    project
        .get("targets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn targets_mut(project: &mut Value) -> impl Iterator<Item = &mut Map<String, Value>> {
    project
        .get_mut("targets")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object_mut)
}

fn monitor_ids(project: &Value) -> Vec<String> {
    project
        .get("monitors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| m.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn is_config_comment(comment: &Value) -> bool {
    comment
        .get("text")
        .and_then(Value::as_str)
        .is_some_and(|text| text.contains(CONFIG_COMMENT_MARKER))
}

fn strip(project: &mut Value) {
    for target in targets_mut(project) {
        let mut dropped = HashSet::new();
        if let Some(Value::Object(comments)) = target.get_mut("comments") {
            let kept: Map<String, Value> = std::mem::take(comments)
                .into_iter()
                .filter(|(id, comment)| {
                    let keep = is_config_comment(comment);
                    if !keep {
                        dropped.insert(id.clone());
                    }
                    keep
                })
                .collect();
            *comments = kept;
        }

        if let Some(Value::Object(blocks)) = target.get_mut("blocks") {
            for block in blocks.values_mut() {
                if let Value::Object(block) = block {
                    strip_block(block, &dropped);
                }
            }
        }
    }

    if let Some(Value::Array(monitors)) = project.get_mut("monitors") {
        for monitor in monitors.iter_mut().filter_map(Value::as_object_mut) {
            let is_list = monitor.get("mode").and_then(Value::as_str) == Some("list");
            if monitor.contains_key("value") {
                let neutral = if is_list { Value::Array(Vec::new()) } else { Value::String(String::new()) };
                monitor.insert("value".into(), neutral);
            }
        }
    }
}

fn strip_block(block: &mut Map<String, Value>, dropped_comments: &HashSet<String>) {
    let top_level = block.get("topLevel").and_then(Value::as_bool).unwrap_or(false);
    if !top_level {
        block.remove("x");
        block.remove("y");
        block.remove("topLevel");
    }
    if block.get("shadow") == Some(&Value::Bool(false)) {
        block.remove("shadow");
    }
    for key in ["parent", "next"] {
        if block.get(key).is_some_and(Value::is_null) {
            block.remove(key);
        }
    }
    for key in ["inputs", "fields"] {
        if block
            .get(key)
            .and_then(Value::as_object)
            .is_some_and(Map::is_empty)
        {
            block.remove(key);
        }
    }
    let comment_dropped = block
        .get("comment")
        .and_then(Value::as_str)
        .is_some_and(|id| dropped_comments.contains(id));
    if comment_dropped {
        block.remove("comment");
    }
}

/// Variable, list or broadcast identifier inside a primitive array
/// such as `[12, "name", "id"]`.
fn primitive_id(primitive: &[Value]) -> Option<&str> {
    let kind = primitive.first()?.as_u64()?;
    if matches!(kind, BROADCAST_PRIMITIVE | VARIABLE_PRIMITIVE | LIST_PRIMITIVE) {
        primitive.get(2)?.as_str()
    } else {
        None
    }
}

fn count(project: &Value, pools: &mut Pools) {
    for target in targets(project) {
        for section in ["variables", "lists", "broadcasts"] {
            if let Some(map) = target.get(section).and_then(Value::as_object) {
                for id in map.keys() {
                    pools.variables.reference(id);
                }
            }
        }

        if let Some(blocks) = target.get("blocks").and_then(Value::as_object) {
            for (id, block) in blocks {
                pools.blocks.reference(id);
                match block {
                    Value::Object(block) => count_block(block, pools),
                    Value::Array(primitive) => {
                        if let Some(id) = primitive_id(primitive) {
                            pools.variables.reference(id);
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(comments) = target.get("comments").and_then(Value::as_object) {
            for (id, comment) in comments {
                pools.blocks.reference(id);
                if let Some(block_id) = comment.get("blockId").and_then(Value::as_str) {
                    pools.blocks.reference(block_id);
                }
            }
        }
    }
}

fn count_block(block: &Map<String, Value>, pools: &mut Pools) {
    for key in ["next", "parent", "comment"] {
        if let Some(id) = block.get(key).and_then(Value::as_str) {
            pools.blocks.reference(id);
        }
    }
    if let Some(inputs) = block.get("inputs").and_then(Value::as_object) {
        for input in inputs.values().filter_map(Value::as_array) {
            for item in input.iter().skip(1) {
                match item {
                    Value::String(id) => pools.blocks.reference(id),
                    Value::Array(primitive) => {
                        if let Some(id) = primitive_id(primitive) {
                            pools.variables.reference(id);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    if let Some(fields) = block.get("fields").and_then(Value::as_object) {
        for field in fields.values().filter_map(Value::as_array) {
            if let Some(id) = field.get(1).and_then(Value::as_str) {
                pools.variables.reference(id);
            }
        }
    }
}

fn rename_keys(map: &mut Map<String, Value>, pool: &IdentifierPool) {
    let renamed: Map<String, Value> = std::mem::take(map)
        .into_iter()
        .map(|(id, value)| (pool.rename(&id), value))
        .collect();
    *map = renamed;
}

fn rename_string(value: &mut Value, pool: &IdentifierPool) {
    if let Value::String(id) = value {
        *id = pool.rename(id);
    }
}

fn rename_primitive(primitive: &mut [Value], pool: &IdentifierPool) {
    if primitive_id(primitive).is_none() {
        return;
    }
    if let Some(id) = primitive.get_mut(2) {
        rename_string(id, pool);
    }
}

fn rewrite(project: &mut Value, pools: &Pools) {
    for target in targets_mut(project) {
        for section in ["variables", "lists", "broadcasts"] {
            if let Some(Value::Object(map)) = target.get_mut(section) {
                rename_keys(map, &pools.variables);
            }
        }

        if let Some(Value::Object(blocks)) = target.get_mut("blocks") {
            rename_keys(blocks, &pools.blocks);
            for block in blocks.values_mut() {
                match block {
                    Value::Object(block) => rewrite_block(block, pools),
                    Value::Array(primitive) => rename_primitive(primitive, &pools.variables),
                    _ => {}
                }
            }
        }

        if let Some(Value::Object(comments)) = target.get_mut("comments") {
            rename_keys(comments, &pools.blocks);
            for comment in comments.values_mut() {
                if let Some(block_id) = comment.get_mut("blockId") {
                    rename_string(block_id, &pools.blocks);
                }
            }
        }
    }
}

fn rewrite_block(block: &mut Map<String, Value>, pools: &Pools) {
    for key in ["next", "parent", "comment"] {
        if let Some(value) = block.get_mut(key) {
            rename_string(value, &pools.blocks);
        }
    }
    if let Some(Value::Object(inputs)) = block.get_mut("inputs") {
        for input in inputs.values_mut().filter_map(Value::as_array_mut) {
            for item in input.iter_mut().skip(1) {
                match item {
                    Value::String(_) => rename_string(item, &pools.blocks),
                    Value::Array(primitive) => rename_primitive(primitive, &pools.variables),
                    _ => {}
                }
            }
        }
    }
    if let Some(Value::Object(fields)) = block.get_mut("fields") {
        for field in fields.values_mut().filter_map(Value::as_array_mut) {
            if let Some(id) = field.get_mut(1) {
                rename_string(id, &pools.variables);
            }
        }
    }
}
