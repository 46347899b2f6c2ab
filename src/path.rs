//! Dotted-path access over `serde_json::Value` trees.
//!
//! Paths are lists of object keys; `"a.b.c"` splits into `["a", "b", "c"]`.
//! Reads never panic, writes create missing intermediate objects.

use serde_json::{Map, Value};

/// Split a dotted path into its segments, dropping empty ones.
pub fn parse(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Outcome of resolving a path against a tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Value),
    /// The parent exists but has no such key.
    Missing,
    /// A segment tried to descend into a non-object value.
    Unresolvable,
}

/// Resolve `segments` against `root`, distinguishing a missing leaf from a
/// path that cannot be traversed at all.
pub fn lookup<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Lookup<'a> {
    let mut cur = root;
    for (i, seg) in segments.iter().enumerate() {
        match cur {
            Value::Object(m) => match m.get(seg.as_ref()) {
                Some(v) => cur = v,
                None if i + 1 == segments.len() => return Lookup::Missing,
                None => return Lookup::Unresolvable,
            },
            _ => return Lookup::Unresolvable,
        }
    }
    Lookup::Found(cur)
}

pub fn get<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    match lookup(root, segments) {
        Lookup::Found(v) => Some(v),
        _ => None,
    }
}

pub fn get_mut<'a, S: AsRef<str>>(root: &'a mut Value, segments: &[S]) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in segments {
        cur = cur.as_object_mut()?.get_mut(seg.as_ref())?;
    }
    Some(cur)
}

/// Write `value` at `segments`, replacing non-object intermediates with
/// empty objects. Returns `false` only for an empty path.
pub fn set<S: AsRef<str>>(root: &mut Value, segments: &[S], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut cur = root;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Some(obj) = cur.as_object_mut() else {
            return false;
        };
        cur = obj
            .entry(seg.as_ref().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    match cur.as_object_mut() {
        Some(obj) => {
            obj.insert(last.as_ref().to_string(), value);
            true
        }
        None => false,
    }
}
