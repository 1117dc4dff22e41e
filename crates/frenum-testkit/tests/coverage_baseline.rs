//! Scenario 6 from the policy's acceptance checklist: a suite with one case
//! per rule reaches full guardrail coverage, and the resulting report hashes
//! identically across repeated runs.

use frenum_policy::{CompiledPolicy, Engine, RawPolicyFile};
use frenum_report::{render_test_report, ReportFormat};
use frenum_testkit::{coverage, run_tests, RawTestCase, RawToolCall};
use serde_json::json;

const POLICY: &str = r#"
policy_version: "1"
rules:
  - name: block_sql_injection
    type: regex_block
    applies_to: ["execute_sql"]
    params:
      fields: ["query"]
      patterns: ["(?i)(DROP|DELETE|TRUNCATE)\\s+TABLE"]
  - name: require_confirmation
    type: regex_require
    applies_to: ["send_email"]
    params:
      fields: ["confirmation_id"]
      pattern: "^CONF-[A-Z0-9]{8}$"
  - name: allow_known_tools
    type: tool_allowlist
    applies_to: ["*"]
    params:
      allowed_tools: ["execute_sql", "send_email"]
"#;

fn engine() -> Engine {
    let raw: RawPolicyFile = serde_yaml::from_str(POLICY).unwrap();
    Engine::new(raw).unwrap()
}

fn cases() -> Vec<RawTestCase> {
    vec![
        RawTestCase {
            description: "blocks DROP TABLE".to_string(),
            tool_call: RawToolCall {
                name: "execute_sql".to_string(),
                args: json!({"query": "DROP TABLE users"}),
            },
            expected: frenum_core::Decision::Block,
            expected_rule: Some("block_sql_injection".to_string()),
        },
        RawTestCase {
            description: "blocks email missing confirmation".to_string(),
            tool_call: RawToolCall { name: "send_email".to_string(), args: json!({"to": "a@b.c"}) },
            expected: frenum_core::Decision::Block,
            expected_rule: Some("require_confirmation".to_string()),
        },
        RawTestCase {
            description: "allows a known tool with a clean payload".to_string(),
            tool_call: RawToolCall {
                name: "execute_sql".to_string(),
                args: json!({"query": "SELECT 1"}),
            },
            expected: frenum_core::Decision::Allow,
            expected_rule: None,
        },
    ]
}

#[test]
fn one_case_per_rule_reaches_full_coverage() {
    let engine = engine();
    let outcomes = run_tests(&engine, &cases());
    assert!(outcomes.iter().all(|o| o.passed));

    let policy: &CompiledPolicy = &engine.compiled_policy();
    let report = coverage(policy, &outcomes);
    assert_eq!(report.total_deterministic, 3);
    assert_eq!(report.exercised, 3);
    assert_eq!(report.coverage_pct, 100.0);
    assert!(report.rules_not_exercised.is_empty());
}

#[test]
fn evidence_hash_is_stable_across_repeated_runs() {
    let engine = engine();
    let policy: &CompiledPolicy = &engine.compiled_policy();

    let outcomes_a = run_tests(&engine, &cases());
    let report_a = coverage(policy, &outcomes_a);
    let rendered_a = render_test_report(&outcomes_a, &report_a, ReportFormat::Json);

    let outcomes_b = run_tests(&engine, &cases());
    let report_b = coverage(policy, &outcomes_b);
    let rendered_b = render_test_report(&outcomes_b, &report_b, ReportFormat::Json);

    assert_eq!(rendered_a, rendered_b, "identical inputs must render byte-identical reports");

    let text_a = render_test_report(&outcomes_a, &report_a, ReportFormat::Text);
    let text_b = render_test_report(&outcomes_b, &report_b, ReportFormat::Text);
    assert_eq!(text_a, text_b);
    assert!(text_a.contains("Evidence:"));
}
