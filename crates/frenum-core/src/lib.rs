//! Frenum core primitives and shared types.
//!
//! This crate has no knowledge of rules, evaluation, or audit persistence —
//! it only defines the vocabulary shared across the workspace: the shape of
//! a tool call, the terminal decision an evaluation can reach, and the
//! clock/id-generator seams that make downstream components reproducible in
//! tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version of the Frenum core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that can occur while constructing core types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A tool call was constructed with an empty name.
    #[error("tool call name must be non-empty")]
    EmptyToolName,
}

/// One structured invocation an agent wants to execute.
///
/// Immutable once constructed: there is no setter for `name` or `args`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    name: String,
    args: BTreeMap<String, Value>,
}

impl ToolCall {
    /// Construct a new tool call. Fails if `name` is empty after trimming.
    pub fn new(name: impl Into<String>, args: BTreeMap<String, Value>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::EmptyToolName);
        }
        Ok(Self { name, args })
    }

    /// The tool name, e.g. `execute_sql`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tool's arguments as a nested value tree.
    #[must_use]
    pub fn args(&self) -> &BTreeMap<String, Value> {
        &self.args
    }

    /// Look up a single top-level argument by key.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// View the arguments as a single JSON object, for probing/redaction.
    #[must_use]
    pub fn args_as_value(&self) -> Value {
        Value::Object(self.args.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// Terminal verdict produced by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Permit the tool call to proceed unchanged.
    Allow,
    /// Block the tool call.
    Block,
}

impl Decision {
    /// `true` for [`Decision::Block`].
    #[must_use]
    pub fn is_block(self) -> bool {
        matches!(self, Decision::Block)
    }
}

/// A scalar that a `regex_block` pattern or PII detector matched during
/// evaluation, and the label to redact it under (a rule name for
/// `regex_block`, a detector name for `pii_detect`).
///
/// Not part of `spec.md`'s `EvaluationResult` schema; carried so the audit
/// logger (C6) can redact tool args without re-running evaluation itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionTarget {
    /// Dotted path of the matched scalar.
    pub path: String,
    /// Label to redact under, e.g. `"hk_id"` or a rule name.
    pub label: String,
}

/// Outcome of evaluating one [`ToolCall`] against a compiled policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// The overall allow/block verdict.
    pub decision: Decision,
    /// Human-readable narrative, including the offending field path for
    /// regex/PII rules.
    pub reason: String,
    /// Name of the rule that produced a `Block`, if any.
    pub blocking_rule: Option<String>,
    /// Rule names actually applied, in evaluation order, up to and
    /// including the blocking rule (if any).
    pub rules_evaluated: Vec<String>,
    /// Dotted paths where a `flag`-action PII detector matched; `None` when
    /// no flagging rule fired.
    pub matched_paths: Option<Vec<String>>,
    /// Every scalar matched by a `regex_block` pattern or PII detector
    /// during this evaluation, for the audit logger's redaction pass.
    pub redaction_targets: Vec<RedactionTarget>,
}

impl EvaluationResult {
    /// Build the canonical "no rule blocked" allow result.
    #[must_use]
    pub fn allow(rules_evaluated: Vec<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: "No rule blocked".to_string(),
            blocking_rule: None,
            rules_evaluated,
            matched_paths: None,
            redaction_targets: Vec::new(),
        }
    }

    /// Build a block result attributed to `rule_name`.
    #[must_use]
    pub fn block(rule_name: impl Into<String>, reason: impl Into<String>, rules_evaluated: Vec<String>) -> Self {
        Self {
            decision: Decision::Block,
            reason: reason.into(),
            blocking_rule: Some(rule_name.into()),
            rules_evaluated,
            matched_paths: None,
            redaction_targets: Vec::new(),
        }
    }
}

pub mod ids {
    //! Clock and id-generation seams, injectable for reproducible tests.
    //!
    //! Production code uses [`SystemClock`] and [`UuidGenerator`]; tests
    //! substitute fixed implementations so audit records and evidence
    //! hashes are byte-stable across runs.

    use chrono::{DateTime, SecondsFormat, Utc};
    use uuid::Uuid;

    /// Source of timestamps for audit records.
    pub trait Clock: Send + Sync {
        /// Current UTC time.
        fn now(&self) -> DateTime<Utc>;

        /// Current UTC time rendered as RFC3339 with millisecond precision.
        fn now_rfc3339_millis(&self) -> String {
            self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
        }
    }

    /// Source of decision ids for audit records.
    pub trait IdGenerator: Send + Sync {
        /// Generate a fresh, universally unique identifier.
        fn next_id(&self) -> String;
    }

    /// Wall-clock implementation of [`Clock`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// UUID v4 implementation of [`IdGenerator`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn next_id(&self) -> String {
            Uuid::new_v4().to_string()
        }
    }

    /// Fixed clock for deterministic tests.
    #[derive(Debug, Clone)]
    pub struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Sequential id generator for deterministic tests.
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        next: std::sync::atomic::AtomicU64,
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> String {
            let n = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            format!("00000000-0000-0000-0000-{n:012x}")
        }
    }

}
