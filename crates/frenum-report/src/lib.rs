//! Report Synthesizer (C8): text, JSON, and HTML renderings over test
//! outcomes or the audit record stream, each carrying a SHA-256 evidence
//! hash of the underlying data.
//!
//! HTML rendering uses `tera` (spec.md: "if a templating library is
//! available use it"), with templates embedded at compile time via
//! `include_str!` and rendered against a fixed context so output is
//! byte-identical for identical inputs, same as the text and JSON formats.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use frenum_audit::AuditRecord;
use frenum_core::Decision;
use frenum_testkit::{CoverageReport, TestOutcome};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;
use tera::{Context, Tera};

const TEST_REPORT_TEMPLATE: &str = include_str!("../templates/test_report.html");
const AUDIT_REPORT_TEMPLATE: &str = include_str!("../templates/audit_report.html");

fn engine() -> &'static Tera {
    static TERA: OnceLock<Tera> = OnceLock::new();
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("test_report.html", TEST_REPORT_TEMPLATE),
            ("audit_report.html", AUDIT_REPORT_TEMPLATE),
        ])
        .expect("embedded report templates are valid");
        tera
    })
}

/// Which rendering to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Fixed-width plain text.
    Text,
    /// Pretty-printed JSON.
    Json,
    /// An HTML document rendered from an embedded `tera` template.
    Html,
}

/// SHA-256 of `bytes`, lower-case hex.
#[must_use]
pub fn evidence_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[derive(Serialize)]
struct TestReportData<'a> {
    outcomes: &'a [TestOutcome],
    coverage: &'a CoverageReport,
}

fn canonical_bytes<T: Serialize>(data: &T) -> Vec<u8> {
    serde_json::to_vec(data).expect("report data is always serializable")
}

/// Render a test-run report (C7's outcomes plus coverage) in `format`.
#[must_use]
pub fn render_test_report(outcomes: &[TestOutcome], coverage: &CoverageReport, format: ReportFormat) -> String {
    let data = TestReportData { outcomes, coverage };
    let hash = evidence_hash(&canonical_bytes(&data));

    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&data).expect("report data is always serializable"),
        ReportFormat::Text => render_test_text(outcomes, coverage, &hash),
        ReportFormat::Html => render_test_html(outcomes, coverage, &hash),
    }
}

fn render_test_text(outcomes: &[TestOutcome], coverage: &CoverageReport, hash: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FRENUM TEST REPORT");
    let _ = writeln!(out, "==================");
    for outcome in outcomes {
        let status = if outcome.passed { "PASS" } else { "FAIL" };
        let _ = write!(out, "[{status:<4}] {}", outcome.description);
        if let Some(err) = &outcome.load_error {
            let _ = writeln!(out, " — load error: {err}");
        } else if !outcome.passed {
            let _ = writeln!(
                out,
                " — expected {:?}{}, got {:?}",
                outcome.expected,
                outcome.expected_rule.as_deref().map(|r| format!(" via '{r}'")).unwrap_or_default(),
                outcome.actual_decision
            );
        } else {
            let _ = writeln!(out);
        }
    }
    let _ = writeln!(out, "------------------");
    let _ = writeln!(
        out,
        "Coverage: {:.1}% ({}/{} deterministic rules)",
        coverage.coverage_pct, coverage.exercised, coverage.total_deterministic
    );
    if !coverage.rules_not_exercised.is_empty() {
        let _ = writeln!(out, "Not exercised: {}", coverage.rules_not_exercised.join(", "));
    }
    if !coverage.semantic_rules.is_empty() {
        let _ = writeln!(out, "Semantic (untested): {}", coverage.semantic_rules.join(", "));
    }
    let _ = writeln!(out, "Evidence: {hash}");
    out
}

fn render_test_html(outcomes: &[TestOutcome], coverage: &CoverageReport, hash: &str) -> String {
    let mut ctx = Context::new();
    ctx.insert("outcomes", outcomes);
    ctx.insert("coverage", coverage);
    ctx.insert("hash", hash);
    engine().render("test_report.html", &ctx).expect("test report context matches template")
}

/// A `(name, count)` tally, sorted by count descending then name ascending.
#[derive(Debug, Clone, Serialize)]
pub struct NamedCount {
    /// The tool or rule name.
    pub name: String,
    /// How many audit records it appeared in.
    pub count: usize,
}

/// Aggregate statistics over a stream of [`AuditRecord`]s.
#[derive(Debug, Clone, Serialize)]
pub struct AuditAggregate {
    /// Total number of records.
    pub total: usize,
    /// Number of `allow` decisions.
    pub allow_count: usize,
    /// Number of `block` decisions.
    pub block_count: usize,
    /// `100 * allow_count / total` (`0.0` if `total` is zero).
    pub allow_pct: f64,
    /// `100 * block_count / total` (`0.0` if `total` is zero).
    pub block_pct: f64,
    /// Most frequently blocked tool names, most-blocked first.
    pub top_blocked_tools: Vec<NamedCount>,
    /// Most frequently triggered blocking rule names, most-frequent first.
    pub top_triggered_rules: Vec<NamedCount>,
    /// Fraction of records carrying a `human_override`.
    pub override_rate: f64,
}

fn top_n(counts: BTreeMap<String, usize>, n: usize) -> Vec<NamedCount> {
    let mut items: Vec<NamedCount> = counts.into_iter().map(|(name, count)| NamedCount { name, count }).collect();
    items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    items.truncate(n);
    items
}

/// Aggregate `records`, keeping the top `top_n` blocked tools and triggered
/// rules.
#[must_use]
pub fn aggregate_audit(records: &[AuditRecord], top_n_count: usize) -> AuditAggregate {
    let total = records.len();
    let mut allow_count = 0usize;
    let mut block_count = 0usize;
    let mut blocked_tools: BTreeMap<String, usize> = BTreeMap::new();
    let mut triggered_rules: BTreeMap<String, usize> = BTreeMap::new();
    let mut overridden = 0usize;

    for record in records {
        match record.decision {
            Decision::Allow => allow_count += 1,
            Decision::Block => {
                block_count += 1;
                *blocked_tools.entry(record.tool_name.clone()).or_insert(0) += 1;
            }
        }
        if let Some(rule) = &record.blocking_rule {
            *triggered_rules.entry(rule.clone()).or_insert(0) += 1;
        }
        if record.human_override.is_some() {
            overridden += 1;
        }
    }

    let (allow_pct, block_pct, override_rate) = if total == 0 {
        (0.0, 0.0, 0.0)
    } else {
        (
            round_1dp(100.0 * allow_count as f64 / total as f64),
            round_1dp(100.0 * block_count as f64 / total as f64),
            overridden as f64 / total as f64,
        )
    };

    AuditAggregate {
        total,
        allow_count,
        block_count,
        allow_pct,
        block_pct,
        top_blocked_tools: top_n(blocked_tools, top_n_count),
        top_triggered_rules: top_n(triggered_rules, top_n_count),
        override_rate,
    }
}

fn round_1dp(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Render an audit-aggregate report in `format`.
#[must_use]
pub fn render_audit_report(records: &[AuditRecord], top_n_count: usize, format: ReportFormat) -> String {
    let aggregate = aggregate_audit(records, top_n_count);
    let hash = evidence_hash(&canonical_bytes(&aggregate));

    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&aggregate).expect("report data is always serializable"),
        ReportFormat::Text => render_audit_text(&aggregate, &hash),
        ReportFormat::Html => render_audit_html(&aggregate, &hash),
    }
}

fn render_audit_text(aggregate: &AuditAggregate, hash: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FRENUM AUDIT REPORT");
    let _ = writeln!(out, "===================");
    let _ = writeln!(out, "Total: {}", aggregate.total);
    let _ = writeln!(out, "Allow: {} ({:.1}%)", aggregate.allow_count, aggregate.allow_pct);
    let _ = writeln!(out, "Block: {} ({:.1}%)", aggregate.block_count, aggregate.block_pct);
    let _ = writeln!(out, "Override rate: {:.3}", aggregate.override_rate);
    let _ = writeln!(out, "Top blocked tools:");
    for entry in &aggregate.top_blocked_tools {
        let _ = writeln!(out, "  {} ({})", entry.name, entry.count);
    }
    let _ = writeln!(out, "Top triggered rules:");
    for entry in &aggregate.top_triggered_rules {
        let _ = writeln!(out, "  {} ({})", entry.name, entry.count);
    }
    let _ = writeln!(out, "Evidence: {hash}");
    out
}

fn render_audit_html(aggregate: &AuditAggregate, hash: &str) -> String {
    let mut ctx = Context::new();
    ctx.insert("aggregate", aggregate);
    ctx.insert("hash", hash);
    engine().render("audit_report.html", &ctx).expect("audit report context matches template")
}

#[cfg(test)]
mod tests {
    use super::*;
    use frenum_audit::HumanOverride;
    use serde_json::json;

    fn record(tool: &str, decision: Decision, blocking_rule: Option<&str>, overridden: bool) -> AuditRecord {
        AuditRecord {
            decision_id: "id".to_string(),
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            policy_version: "v1".to_string(),
            tool_name: tool.to_string(),
            tool_args: json!({}),
            decision,
            rules_evaluated: vec![],
            blocking_rule: blocking_rule.map(str::to_string),
            human_override: overridden.then(|| HumanOverride {
                actor: "alice".to_string(),
                reason: "fp".to_string(),
                new_decision: Decision::Allow,
            }),
            trace_id: None,
        }
    }

    #[test]
    fn evidence_hash_is_stable_for_same_bytes() {
        assert_eq!(evidence_hash(b"hello"), evidence_hash(b"hello"));
        assert_ne!(evidence_hash(b"hello"), evidence_hash(b"world"));
    }

    #[test]
    fn aggregate_counts_allow_and_block() {
        let records = vec![
            record("execute_sql", Decision::Block, Some("block_ddl"), false),
            record("execute_sql", Decision::Block, Some("block_ddl"), true),
            record("read_file", Decision::Allow, None, false),
        ];
        let agg = aggregate_audit(&records, 5);
        assert_eq!(agg.total, 3);
        assert_eq!(agg.block_count, 2);
        assert_eq!(agg.allow_count, 1);
        assert_eq!(agg.top_blocked_tools[0].name, "execute_sql");
        assert_eq!(agg.top_blocked_tools[0].count, 2);
        assert_eq!(agg.top_triggered_rules[0].name, "block_ddl");
        assert!((agg.override_rate - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn aggregate_is_zero_safe_for_empty_input() {
        let agg = aggregate_audit(&[], 5);
        assert_eq!(agg.total, 0);
        assert_eq!(agg.allow_pct, 0.0);
        assert_eq!(agg.override_rate, 0.0);
    }

    #[test]
    fn top_n_truncates_and_orders_by_count_then_name() {
        let records = vec![
            record("a", Decision::Block, Some("r1"), false),
            record("b", Decision::Block, Some("r1"), false),
            record("b", Decision::Block, Some("r1"), false),
            record("c", Decision::Block, Some("r2"), false),
        ];
        let agg = aggregate_audit(&records, 2);
        assert_eq!(agg.top_blocked_tools.len(), 2);
        assert_eq!(agg.top_blocked_tools[0].name, "b");
        assert_eq!(agg.top_blocked_tools[1].name, "a");
    }

    #[test]
    fn text_and_html_renders_include_evidence_hash() {
        let outcomes: Vec<TestOutcome> = vec![];
        let coverage = frenum_testkit::CoverageReport {
            total_deterministic: 0,
            exercised: 0,
            coverage_pct: 0.0,
            rules_not_exercised: vec![],
            semantic_rules: vec![],
        };
        let text = render_test_report(&outcomes, &coverage, ReportFormat::Text);
        assert!(text.contains("Evidence:"));
        let html = render_test_report(&outcomes, &coverage, ReportFormat::Html);
        assert!(html.contains("Evidence:"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn json_render_round_trips_as_valid_json() {
        let outcomes: Vec<TestOutcome> = vec![];
        let coverage = frenum_testkit::CoverageReport {
            total_deterministic: 0,
            exercised: 0,
            coverage_pct: 0.0,
            rules_not_exercised: vec![],
            semantic_rules: vec![],
        };
        let json_text = render_test_report(&outcomes, &coverage, ReportFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&json_text).unwrap();
        assert!(parsed.get("coverage").is_some());
    }
}
