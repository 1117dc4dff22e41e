//! Rule Model & Compilation (C3): typed, validated representation of each
//! rule kind, compiled from a generic raw document into a
//! [`CompiledPolicy`].

use crate::pii::DetectorName;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Rule classification: deterministic rules are enforced and counted
/// toward coverage; semantic rules are tracked but never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Outcome is a pure function of the tool call; counted in coverage.
    Deterministic,
    /// Requires human/model judgement; tracked, never enforced or counted.
    Semantic,
}

impl Default for Classification {
    fn default() -> Self {
        Self::Deterministic
    }
}

/// Action a `pii_detect` rule takes when a detector fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiAction {
    /// Block the call.
    Block,
    /// Allow the call but annotate the matched paths.
    Flag,
}

/// Default disposition for an `entitlement` rule when a role is absent or
/// unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementDefault {
    /// Block unless explicitly entitled.
    Block,
    /// Allow unless explicitly blocked.
    Allow,
}

/// Closed sum of rule kinds, each carrying its own validated, compiled
/// parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Block the call if any of `fields` matches any of `patterns`.
    RegexBlock { fields: Vec<String>, patterns: Vec<Regex> },
    /// Block the call unless `field` fully matches `pattern`.
    RegexRequire { fields: Vec<String>, pattern: Regex },
    /// Scan `args` for PII using `detectors`.
    PiiDetect { detectors: Vec<DetectorName>, action: PiiAction },
    /// Consult `args.role` against per-role allowed tool sets.
    Entitlement { roles: BTreeMap<String, Vec<String>>, default: EntitlementDefault },
    /// Block if the cost scalar at `cost_field` exceeds `max_cost`.
    Budget { max_cost: f64, cost_field: String },
    /// Block unless `tool_call.name` matches `allowed_tools`.
    ToolAllowlist { allowed_tools: Vec<String> },
}

impl RuleKind {
    /// The `type` discriminant as it appears in policy documents.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RegexBlock { .. } => "regex_block",
            Self::RegexRequire { .. } => "regex_require",
            Self::PiiDetect { .. } => "pii_detect",
            Self::Entitlement { .. } => "entitlement",
            Self::Budget { .. } => "budget",
            Self::ToolAllowlist { .. } => "tool_allowlist",
        }
    }
}

/// A validation problem discovered while parsing a rule's kind-specific
/// parameters. Distinguishes which lint code applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleIssue {
    /// Unknown `type` value (W003).
    UnknownType(String),
    /// Known kind, but required params are missing or malformed (W002).
    MissingParams(String),
    /// `pii_detect` named a detector outside the fixed registry (E002).
    UnknownDetector(String),
    /// A regex source failed to compile (E001).
    InvalidRegex(String),
}

/// Non-authoritative applicability filter over tool names, split for O(1)
/// literal lookups per §4.3. The only "glob" this engine recognizes is the
/// single wildcard `*`.
#[derive(Debug, Clone)]
pub struct AppliesTo {
    literals: HashSet<String>,
    wildcard: bool,
    /// Original declaration order, preserved for diagnostics.
    pub patterns: Vec<String>,
}

impl AppliesTo {
    fn from_patterns(patterns: Vec<String>) -> Self {
        let mut literals = HashSet::new();
        let mut wildcard = false;
        for p in &patterns {
            if p == "*" {
                wildcard = true;
            } else {
                literals.insert(p.clone());
            }
        }
        Self { literals, wildcard, patterns }
    }

    /// Does this filter admit `tool_name`?
    #[must_use]
    pub fn matches(&self, tool_name: &str) -> bool {
        self.wildcard || self.literals.contains(tool_name)
    }
}

/// A rule after compilation: either a working [`RuleKind`], or a rule
/// "tainted" by a W002/W003 finding, which always blocks on evaluation
/// (fail closed) per §3 invariant 5/6.
#[derive(Debug, Clone)]
pub enum RuleBody {
    /// Fully validated, ready to evaluate.
    Kind(RuleKind),
    /// Retained but permanently blocking; `reason` is surfaced verbatim.
    Tainted(String),
}

/// One compiled rule: its identity, applicability, classification, and
/// evaluable body.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Rule name (unique within the policy, by convention; see lint E003).
    pub name: String,
    /// Applicability filter over tool names.
    pub applies_to: AppliesTo,
    /// Deterministic vs. semantic classification.
    pub classification: Classification,
    /// The rule's evaluable body.
    pub body: RuleBody,
}

/// A fully compiled policy: ordered rules ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// Free-form version string carried from the policy document.
    pub policy_version: String,
    /// Rules in declaration order.
    pub rules: Vec<CompiledRule>,
}

/// Errors that can prevent a policy from compiling for enforcement.
///
/// Per §3 invariant 3, only a regex compile failure is fatal here; every
/// other validation problem (unknown type, missing params, unknown
/// detector, duplicate names, empty `applies_to`) taints the offending
/// rule instead and is surfaced by [`crate::lint::lint`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy document could not be read from disk.
    #[error("failed to read policy file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The policy document is not valid YAML, or does not match the
    /// logical schema.
    #[error("malformed policy document: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// A rule's regex source failed to compile.
    #[error("rule '{rule}': invalid regex: {message}")]
    InvalidRegex {
        /// Name of the offending rule.
        rule: String,
        /// Compiler diagnostic.
        message: String,
    },
}

/// Raw rule as parsed directly from a policy document, before kind-specific
/// validation. Field names match §6's external schema (`name, type,
/// applies_to, params, kind?`), where the external `kind` is this rule's
/// [`Classification`] (not to be confused with [`RuleKind`]).
#[derive(Debug, Clone, Deserialize)]
pub struct RawRule {
    /// Declared rule name.
    pub name: String,
    /// Rule kind discriminant (`regex_block`, `pii_detect`, ...).
    #[serde(rename = "type")]
    pub type_: String,
    /// Tool-name globs this rule applies to.
    #[serde(default)]
    pub applies_to: Vec<String>,
    /// Deterministic/semantic classification; defaults to deterministic.
    #[serde(default, rename = "kind")]
    pub classification: Classification,
    /// Kind-specific parameters, interpreted by [`parse_kind`].
    #[serde(default)]
    pub params: Value,
}

/// Raw policy document as parsed directly from YAML/JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPolicyFile {
    /// Free-form policy version string.
    pub policy_version: String,
    /// Declarative rule list, in declaration order.
    pub rules: Vec<RawRule>,
}

/// Read and parse a policy document from a YAML file, without compiling it.
///
/// Used by the linter, which must be able to inspect a document that would
/// fail to construct an [`crate::evaluator::Engine`] (e.g. an unknown rule
/// `type`, which only taints a rule rather than raising here).
pub fn load_raw_policy<P: AsRef<std::path::Path>>(path: P) -> Result<RawPolicyFile, PolicyError> {
    let file = std::fs::File::open(&path)
        .map_err(|source| PolicyError::Io { path: path.as_ref().display().to_string(), source })?;
    Ok(serde_yaml::from_reader(std::io::BufReader::new(file))?)
}

fn str_array(v: &Value, key: &str) -> Option<Vec<String>> {
    v.get(key)?.as_array()?.iter().map(|e| e.as_str().map(str::to_string)).collect()
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)?.as_str().map(str::to_string)
}

/// Parse and validate one raw rule's kind-specific parameters.
///
/// Returns `Ok` with the fully validated kind, or `Err` describing the
/// first problem found (see [`RuleIssue`]).
pub fn parse_kind(raw: &RawRule) -> Result<RuleKind, RuleIssue> {
    match raw.type_.as_str() {
        "regex_block" => {
            let fields = str_array(&raw.params, "fields")
                .filter(|f| !f.is_empty())
                .ok_or_else(|| RuleIssue::MissingParams("'fields' must be a non-empty list of field paths".into()))?;
            let pattern_sources = str_array(&raw.params, "patterns")
                .filter(|p| !p.is_empty())
                .ok_or_else(|| RuleIssue::MissingParams("'patterns' must be a non-empty list of regex sources".into()))?;
            let mut patterns = Vec::with_capacity(pattern_sources.len());
            for src in pattern_sources {
                patterns.push(Regex::new(&src).map_err(|e| RuleIssue::InvalidRegex(format!("'{src}': {e}")))?);
            }
            Ok(RuleKind::RegexBlock { fields, patterns })
        }
        "regex_require" => {
            let fields = str_array(&raw.params, "fields")
                .filter(|f| !f.is_empty())
                .ok_or_else(|| RuleIssue::MissingParams("'fields' must be a non-empty list of field paths".into()))?;
            let pattern_src = str_field(&raw.params, "pattern")
                .ok_or_else(|| RuleIssue::MissingParams("'pattern' must be a regex source".into()))?;
            // Anchored at both ends so an unanchored alternation (e.g. `a|abc`) can't satisfy
            // the rule on a leftmost partial match; the stored pattern always matches the whole value.
            let anchored_src = format!(r"\A(?:{pattern_src})\z");
            let pattern =
                Regex::new(&anchored_src).map_err(|e| RuleIssue::InvalidRegex(format!("'{pattern_src}': {e}")))?;
            Ok(RuleKind::RegexRequire { fields, pattern })
        }
        "pii_detect" => {
            let names = str_array(&raw.params, "detectors")
                .filter(|d| !d.is_empty())
                .ok_or_else(|| RuleIssue::MissingParams("'detectors' must be a non-empty list".into()))?;
            let mut detectors = Vec::with_capacity(names.len());
            for name in names {
                detectors.push(DetectorName::parse(&name).ok_or(RuleIssue::UnknownDetector(name))?);
            }
            let action = match raw.params.get("action").and_then(Value::as_str) {
                None | Some("block") => PiiAction::Block,
                Some("flag") => PiiAction::Flag,
                Some(other) => {
                    return Err(RuleIssue::MissingParams(format!("'action' must be block or flag, got '{other}'")))
                }
            };
            Ok(RuleKind::PiiDetect { detectors, action })
        }
        "entitlement" => {
            let roles_val = raw
                .params
                .get("roles")
                .and_then(Value::as_object)
                .filter(|m| !m.is_empty())
                .ok_or_else(|| RuleIssue::MissingParams("'roles' must be a non-empty mapping".into()))?;
            let mut roles = BTreeMap::new();
            for (role, allowed) in roles_val {
                let allowed_list = allowed
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>())
                    .ok_or_else(|| RuleIssue::MissingParams(format!("role '{role}' must map to a list of tool globs")))?;
                roles.insert(role.clone(), allowed_list);
            }
            let default = match raw.params.get("default").and_then(Value::as_str) {
                None | Some("block") => EntitlementDefault::Block,
                Some("allow") => EntitlementDefault::Allow,
                Some(other) => {
                    return Err(RuleIssue::MissingParams(format!("'default' must be block or allow, got '{other}'")))
                }
            };
            Ok(RuleKind::Entitlement { roles, default })
        }
        "budget" => {
            let max_cost = raw
                .params
                .get("max_cost")
                .and_then(Value::as_f64)
                .filter(|v| *v >= 0.0)
                .ok_or_else(|| RuleIssue::MissingParams("'max_cost' must be a non-negative number".into()))?;
            let cost_field = str_field(&raw.params, "cost_field").unwrap_or_else(|| "estimated_cost".to_string());
            Ok(RuleKind::Budget { max_cost, cost_field })
        }
        "tool_allowlist" => {
            let allowed_tools = str_array(&raw.params, "allowed_tools")
                .filter(|t| !t.is_empty())
                .ok_or_else(|| RuleIssue::MissingParams("'allowed_tools' must be a non-empty list".into()))?;
            Ok(RuleKind::ToolAllowlist { allowed_tools })
        }
        other => Err(RuleIssue::UnknownType(other.to_string())),
    }
}

/// Compile a raw policy document for enforcement.
///
/// Fails only on a regex compile error (§3 invariant 3, evaluator-
/// constructor path). Every other validation problem taints the offending
/// rule so the policy still constructs; run [`crate::lint::lint`]
/// separately to surface those findings before deployment.
pub fn compile(raw: RawPolicyFile) -> Result<CompiledPolicy, PolicyError> {
    let mut rules = Vec::with_capacity(raw.rules.len());
    for r in raw.rules {
        let applies_to = AppliesTo::from_patterns(r.applies_to.clone());
        let body = match parse_kind(&r) {
            Ok(kind) => RuleBody::Kind(kind),
            Err(RuleIssue::InvalidRegex(message)) => {
                return Err(PolicyError::InvalidRegex { rule: r.name.clone(), message })
            }
            Err(RuleIssue::UnknownType(t)) => RuleBody::Tainted(format!("unknown rule type '{t}'")),
            Err(RuleIssue::MissingParams(msg)) => RuleBody::Tainted(msg),
            Err(RuleIssue::UnknownDetector(name)) => {
                RuleBody::Tainted(format!("unknown PII detector '{name}'"))
            }
        };
        rules.push(CompiledRule { name: r.name, applies_to, classification: r.classification, body });
    }
    Ok(CompiledPolicy { policy_version: raw.policy_version, rules })
}
