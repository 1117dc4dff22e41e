//! Intentionally tiny glob matcher: a literal string, or `*` as a full
//! wildcard. No `?`, character classes, or multi-segment globbing — richer
//! patterns would change coverage semantics (the test runner reasons about
//! "which rules this tool call could exercise" in terms of this exact
//! matcher).

/// Does `pattern` match `name`? `*` matches any tool name (including the
/// empty string); any other pattern must match `name` exactly.
#[must_use]
pub fn matches(pattern: &str, name: &str) -> bool {
    pattern == "*" || pattern == name
}

/// Does any pattern in `patterns` match `name`?
#[must_use]
pub fn matches_any<'a>(patterns: impl IntoIterator<Item = &'a str>, name: &str) -> bool {
    patterns.into_iter().any(|p| matches(p, name))
}
