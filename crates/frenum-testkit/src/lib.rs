//! Declarative regression test runner and guardrail coverage metric (C7).
//!
//! A test document lists `TestCase`s against an [`Engine`]; `run_tests`
//! drives each through the evaluator and `coverage` summarizes how much of
//! the deterministic rule set was actually exercised.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use frenum_core::{Decision, ToolCall};
use frenum_policy::{Classification, CompiledPolicy, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a test document.
#[derive(Debug, Error)]
pub enum TestRunError {
    /// The test document could not be read from disk.
    #[error("failed to read test document {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The test document is not valid YAML, or does not match the logical
    /// schema.
    #[error("malformed test document: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A tool call as it appears in a test document, before conversion to
/// [`frenum_core::ToolCall`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawToolCall {
    /// Tool name.
    pub name: String,
    /// Tool arguments, as a mapping; absent defaults to empty.
    #[serde(default)]
    pub args: Value,
}

/// One declarative scenario: a tool call, the expected decision, and
/// optionally which rule must produce it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTestCase {
    /// Human-readable description of the scenario.
    pub description: String,
    /// The call to evaluate.
    pub tool_call: RawToolCall,
    /// Expected overall decision.
    pub expected: Decision,
    /// When `expected` is `block`, the rule name that must have produced it.
    #[serde(default)]
    pub expected_rule: Option<String>,
}

/// Top-level test document: `tests: ordered sequence of TestCase`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTestDocument {
    /// Test cases, in declaration order.
    pub tests: Vec<RawTestCase>,
}

/// Load and parse a test document from a YAML file.
pub fn load_test_document<P: AsRef<Path>>(path: P) -> Result<RawTestDocument, TestRunError> {
    let p = path.as_ref();
    let file =
        File::open(p).map_err(|source| TestRunError::Io { path: p.to_string_lossy().into_owned(), source })?;
    Ok(serde_yaml::from_reader(BufReader::new(file))?)
}

/// Outcome of running one declarative test case against an [`Engine`].
///
/// A malformed `tool_call` (e.g. an empty name) never aborts the run: it is
/// reported here as a failing outcome with `actual_decision: None` and
/// `load_error` set, so the rest of the suite still executes.
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    /// Echoed from the source case.
    pub description: String,
    /// Echoed from the source case.
    pub expected: Decision,
    /// Echoed from the source case.
    pub expected_rule: Option<String>,
    /// The evaluator's actual decision; `None` if the case failed to load.
    pub actual_decision: Option<Decision>,
    /// The rule that actually blocked the call, if any.
    pub actual_blocking_rule: Option<String>,
    /// Rule names the evaluator actually applied, in order.
    pub rules_evaluated: Vec<String>,
    /// `true` iff `actual_decision == expected` and, when `expected_rule`
    /// is given and `expected` is `block`, `actual_blocking_rule` matches.
    pub passed: bool,
    /// Set instead of evaluating, when `tool_call` could not be built.
    pub load_error: Option<String>,
}

fn build_tool_call(raw: &RawToolCall) -> Result<ToolCall, String> {
    let args_map: BTreeMap<String, Value> = match &raw.args {
        Value::Null => BTreeMap::new(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => return Err(format!("tool_call.args must be a mapping, got {other}")),
    };
    ToolCall::new(raw.name.clone(), args_map).map_err(|e| e.to_string())
}

/// Run every case in `cases` against `engine`, in order.
#[must_use]
pub fn run_tests(engine: &Engine, cases: &[RawTestCase]) -> Vec<TestOutcome> {
    cases.iter().map(|case| run_one(engine, case)).collect()
}

fn run_one(engine: &Engine, case: &RawTestCase) -> TestOutcome {
    let tool_call = match build_tool_call(&case.tool_call) {
        Ok(tc) => tc,
        Err(message) => {
            return TestOutcome {
                description: case.description.clone(),
                expected: case.expected,
                expected_rule: case.expected_rule.clone(),
                actual_decision: None,
                actual_blocking_rule: None,
                rules_evaluated: Vec::new(),
                passed: false,
                load_error: Some(message),
            };
        }
    };

    let result = engine.evaluate(&tool_call);
    let decision_matches = result.decision == case.expected;
    let rule_matches = match (&case.expected_rule, case.expected) {
        (Some(expected_rule), Decision::Block) => result.blocking_rule.as_deref() == Some(expected_rule.as_str()),
        _ => true,
    };

    TestOutcome {
        description: case.description.clone(),
        expected: case.expected,
        expected_rule: case.expected_rule.clone(),
        actual_decision: Some(result.decision),
        actual_blocking_rule: result.blocking_rule.clone(),
        rules_evaluated: result.rules_evaluated,
        passed: decision_matches && rule_matches,
        load_error: None,
    }
}

/// Guardrail coverage over deterministic rules only; semantic rules are
/// tracked but never counted, per §4.7.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    /// Number of deterministic rules in the policy.
    pub total_deterministic: usize,
    /// Number of deterministic rules exercised by at least one test.
    pub exercised: usize,
    /// `100 * exercised / total_deterministic`, rounded to 1 decimal place;
    /// `0.0` if `total_deterministic` is zero.
    pub coverage_pct: f64,
    /// Deterministic rules never exercised, sorted by name.
    pub rules_not_exercised: Vec<String>,
    /// Semantic-classified rule names, sorted.
    pub semantic_rules: Vec<String>,
}

/// Compute guardrail coverage for `policy` given the outcomes of a test run.
#[must_use]
pub fn coverage(policy: &CompiledPolicy, outcomes: &[TestOutcome]) -> CoverageReport {
    let mut exercised_names: BTreeSet<String> = BTreeSet::new();
    for outcome in outcomes {
        exercised_names.extend(outcome.rules_evaluated.iter().cloned());
        if let Some(rule) = &outcome.actual_blocking_rule {
            exercised_names.insert(rule.clone());
        }
    }

    let mut deterministic: BTreeSet<String> = BTreeSet::new();
    let mut semantic: Vec<String> = Vec::new();
    for rule in &policy.rules {
        match rule.classification {
            Classification::Deterministic => {
                deterministic.insert(rule.name.clone());
            }
            Classification::Semantic => semantic.push(rule.name.clone()),
        }
    }
    semantic.sort();

    let exercised_deterministic = deterministic.intersection(&exercised_names).count();
    let total_deterministic = deterministic.len();
    let coverage_pct = if total_deterministic == 0 {
        0.0
    } else {
        round_1dp(100.0 * exercised_deterministic as f64 / total_deterministic as f64)
    };
    let rules_not_exercised: Vec<String> = deterministic.difference(&exercised_names).cloned().collect();

    CoverageReport {
        total_deterministic,
        exercised: exercised_deterministic,
        coverage_pct,
        rules_not_exercised,
        semantic_rules: semantic,
    }
}

fn round_1dp(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
