//! The per-instance blackboard: a JSON document addressed by a small,
//! deliberately limited dotted-path dialect, and the patch algebra used to
//! mutate it after a successful step.
//!
//! Paths are dotted strings optionally prefixed by `$` or `$.` (both mean
//! *root*). There is no bracket syntax, no wildcards, no filters — the
//! language of workflow data references is intentionally small. Evaluation
//! never errors: any traversal through a non-object (including null or a
//! missing key) yields "undefined", modeled here as `None`.

use serde_json::{Map, Value};

/// The blackboard document. Semantically a JSON object; stored as a
/// `serde_json::Value` so it can flow through `serde` untouched on its
/// way to and from persistence.
pub type Blackboard = Value;

/// Build an empty blackboard document.
pub fn empty() -> Blackboard {
    Value::Object(Map::new())
}

/// Split a reference path into root-relative segments.
///
/// `$`, `$.`, and a bare leading segment all mean "start at the document
/// root". An empty path (after stripping the optional prefix) addresses
/// the whole document.
fn segments(path: &str) -> Vec<&str> {
    let rest = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('.').collect()
    }
}

/// Resolve a path against a blackboard, returning `None` ("undefined")
/// whenever traversal runs through a non-object, a missing key, or a
/// `null` along the way — never an error.
pub fn resolve<'a>(bb: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = bb;
    for seg in segments(path) {
        match current {
            Value::Object(map) => current = map.get(seg)?,
            _ => return None,
        }
    }
    Some(current)
}

/// One mutation to apply to a blackboard after a successful step.
///
/// Patches are applied in the order they appear in a `Vec<Patch>`;
/// application is a pure function of the starting document and the patch
/// list (see [`apply_patches`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Set the value at `path`, creating intermediate objects as needed.
    Set { path: String, value: Value },
    /// Merge `value` (must be an object) into whatever is at `path`. If
    /// the existing value at `path` is not an object, it is replaced
    /// wholesale by `value` rather than merged key-by-key.
    Merge { path: String, value: Value },
    /// Delete the key at `path`. Silently does nothing if any
    /// intermediate segment is missing.
    Del { path: String },
}

impl Patch {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Patch::Set {
            path: path.into(),
            value,
        }
    }

    pub fn merge(path: impl Into<String>, value: Value) -> Self {
        Patch::Merge {
            path: path.into(),
            value,
        }
    }

    pub fn del(path: impl Into<String>) -> Self {
        Patch::Del { path: path.into() }
    }
}

/// Apply one patch in place, returning nothing: callers fold a sequence
/// of patches with [`apply_patches`].
fn apply_one(bb: &mut Value, patch: &Patch) {
    match patch {
        Patch::Set { path, value } => set_at(bb, path, value.clone()),
        Patch::Merge { path, value } => merge_at(bb, path, value),
        Patch::Del { path } => del_at(bb, path),
    }
}

fn set_at(bb: &mut Value, path: &str, value: Value) {
    let segs = segments(path);
    if segs.is_empty() {
        *bb = value;
        return;
    }
    let mut current = bb;
    for seg in &segs[..segs.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        current = map.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    let map = current.as_object_mut().expect("just coerced to object");
    map.insert(segs[segs.len() - 1].to_string(), value);
}

fn merge_at(bb: &mut Value, path: &str, value: &Value) {
    let segs = segments(path);
    let Value::Object(incoming) = value else {
        // Merging a non-object source is treated as a plain set, since
        // there is nothing meaningful to merge key-by-key.
        set_at(bb, path, value.clone());
        return;
    };
    if segs.is_empty() {
        if bb.is_object() {
            let map = bb.as_object_mut().expect("checked is_object");
            for (k, v) in incoming {
                map.insert(k.clone(), v.clone());
            }
        } else {
            *bb = Value::Object(incoming.clone());
        }
        return;
    }
    let mut current = bb;
    for seg in &segs[..segs.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        current = map.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    let map = current.as_object_mut().expect("just coerced to object");
    let last = segs[segs.len() - 1];
    match map.get_mut(last) {
        Some(existing) if existing.is_object() => {
            let existing_map = existing.as_object_mut().expect("checked is_object");
            for (k, v) in incoming {
                existing_map.insert(k.clone(), v.clone());
            }
        }
        _ => {
            map.insert(last.to_string(), Value::Object(incoming.clone()));
        }
    }
}

fn del_at(bb: &mut Value, path: &str) {
    let segs = segments(path);
    if segs.is_empty() {
        *bb = Value::Object(Map::new());
        return;
    }
    let mut current = bb;
    for seg in &segs[..segs.len() - 1] {
        match current {
            Value::Object(map) => match map.get_mut(*seg) {
                Some(next) => current = next,
                None => return, // missing intermediate segment: silent no-op
            },
            _ => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(segs[segs.len() - 1]);
    }
}

/// Recursively resolve any `{"__ref": true, "path": ...}` markers found
/// anywhere inside `value` against `bb`, replacing each with the resolved
/// value (or `null` if the path is undefined). Non-reference scalars,
/// arrays, and plain objects are walked but otherwise left untouched.
///
/// This is what turns a leaf node's raw, possibly reference-laden props
/// into the concrete values an executor operates on; it runs once, right
/// before the executor is invoked, against the iteration-scoped
/// blackboard.
pub fn resolve_refs(value: &Value, bb: &Value) -> Value {
    if let Some(path) = crate::definition::as_reference(value) {
        return resolve(bb, path).cloned().unwrap_or(Value::Null);
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_refs(v, bb));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_refs(v, bb)).collect()),
        other => other.clone(),
    }
}

/// Apply a sequence of patches to a blackboard, in order, returning the
/// resulting document. Deterministic: depends only on `bb` and `patches`.
pub fn apply_patches(bb: &Value, patches: &[Patch]) -> Value {
    let mut out = bb.clone();
    for patch in patches {
        apply_one(&mut out, patch);
    }
    out
}
