//! Value Probe (C1): depth-first walk over a nested argument tree, yielding
//! scalar leaves with their dotted path.

use serde_json::Value;

/// Canonicalize a scalar JSON value to the string form used for regex/PII
/// matching: numbers without trailing zeros, booleans lower-case, strings
/// bare (no quoting).
#[must_use]
pub fn stringify_scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(canonical_number(n)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    let mut s = format!("{f}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// A single leaf discovered by the probe: its dotted path and its
/// canonical string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    /// Dotted/indexed path, e.g. `body.subject` or `items[2]`.
    pub path: String,
    /// Canonical string rendering of the scalar.
    pub value: String,
}

/// Depth-first, insertion/index-ordered walk of `root`, yielding every
/// scalar leaf with its dotted path. Never mutates `root`.
#[must_use]
pub fn walk(root: &Value) -> Vec<Leaf> {
    let mut out = Vec::new();
    walk_into(root, String::new(), &mut out);
    out
}

fn walk_into(v: &Value, prefix: String, out: &mut Vec<Leaf>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let path = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                walk_into(child, path, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let path = format!("{prefix}[{i}]");
                walk_into(child, path, out);
            }
        }
        scalar => {
            if let Some(value) = stringify_scalar(scalar) {
                out.push(Leaf { path: prefix, value });
            }
        }
    }
}

/// Resolve a dotted field selector (as used by `regex_block`/`regex_require`
/// field lists) against `root`, returning the first matching scalar's
/// canonical string form, if any. `*` matches any single path segment.
#[must_use]
pub fn probe_field(root: &Value, selector: &str) -> Option<String> {
    let segments: Vec<&str> = selector.split('.').collect();
    probe_segments(root, &segments)
}

fn probe_segments(v: &Value, segments: &[&str]) -> Option<String> {
    match segments {
        [] => stringify_scalar(v),
        [seg, rest @ ..] => match v {
            Value::Object(map) => {
                if *seg == "*" {
                    map.values().find_map(|child| probe_segments(child, rest))
                } else {
                    map.get(*seg).and_then(|child| probe_segments(child, rest))
                }
            }
            _ => None,
        },
    }
}

/// Enumerate every scalar leaf under `root` whose dotted path equals
/// `field`, honoring a literal `.`-joined path (no glob segments — callers
/// needing globs should use [`probe_field`] for single lookups or filter
/// [`walk`]'s output directly).
#[must_use]
pub fn leaves_at(root: &Value, field: &str) -> Vec<Leaf> {
    walk(root).into_iter().filter(|leaf| leaf.path == field).collect()
}
