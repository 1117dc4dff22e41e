//! End-to-end scenarios against live [`Engine`] instances, one per rule kind.
//! Mirrors the literal scenarios a deployed policy is expected to satisfy
//! before it ships.

use frenum_core::{Decision, ToolCall};
use frenum_policy::{Engine, RawPolicyFile};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn engine_from(yaml: &str) -> Engine {
    let raw: RawPolicyFile = serde_yaml::from_str(yaml).expect("fixture yaml parses");
    Engine::new(raw).expect("fixture policy compiles")
}

fn call(name: &str, args: Value) -> ToolCall {
    let map: BTreeMap<String, Value> = args.as_object().cloned().unwrap_or_default().into_iter().collect();
    ToolCall::new(name, map).expect("non-empty tool name")
}

const SQL_POLICY: &str = r#"
policy_version: "1"
rules:
  - name: block_sql_injection
    type: regex_block
    applies_to: ["execute_sql"]
    params:
      fields: ["query"]
      patterns: ["(?i)(DROP|DELETE|TRUNCATE)\\s+TABLE"]
"#;

#[test]
fn drop_table_is_blocked_with_offending_field_and_pattern_in_reason() {
    let engine = engine_from(SQL_POLICY);
    let result = engine.evaluate(&call("execute_sql", json!({"query": "DROP TABLE users"})));
    assert_eq!(result.decision, Decision::Block);
    assert_eq!(result.blocking_rule.as_deref(), Some("block_sql_injection"));
    assert!(result.reason.contains("query"));
    assert!(result.reason.contains("DROP TABLE"));
}

#[test]
fn benign_query_is_allowed_and_records_the_rule_it_passed() {
    let engine = engine_from(SQL_POLICY);
    let result = engine.evaluate(&call("execute_sql", json!({"query": "SELECT 1"})));
    assert_eq!(result.decision, Decision::Allow);
    assert_eq!(result.rules_evaluated, vec!["block_sql_injection".to_string()]);
}

#[test]
fn missing_confirmation_id_blocks_send_email() {
    let engine = engine_from(
        r#"
policy_version: "1"
rules:
  - name: require_confirmation
    type: regex_require
    applies_to: ["send_email"]
    params:
      fields: ["confirmation_id"]
      pattern: "^CONF-[A-Z0-9]{8}$"
"#,
    );
    let result = engine.evaluate(&call("send_email", json!({"to": "a@b.c"})));
    assert_eq!(result.decision, Decision::Block);
    assert_eq!(result.blocking_rule.as_deref(), Some("require_confirmation"));
}

#[test]
fn hk_id_in_email_body_blocks_and_names_the_field_and_detector() {
    let engine = engine_from(
        r#"
policy_version: "1"
rules:
  - name: detect_pii
    type: pii_detect
    applies_to: ["*"]
    params:
      detectors: ["hk_id"]
      action: block
"#,
    );
    let result = engine.evaluate(&call("send_email", json!({"body": "Customer HKID is A123456(7)"})));
    assert_eq!(result.decision, Decision::Block);
    assert!(result.reason.contains("body"));
    assert!(result.reason.contains("hk_id"));
    assert_eq!(result.redaction_targets.len(), 1);
    assert_eq!(result.redaction_targets[0].path, "body");
    assert_eq!(result.redaction_targets[0].label, "hk_id");
}

#[test]
fn entitlement_blocks_analyst_and_allows_admin_for_execute_sql() {
    let engine = engine_from(
        r#"
policy_version: "1"
rules:
  - name: entitlement
    type: entitlement
    applies_to: ["*"]
    params:
      roles:
        analyst: ["search", "get_data"]
        admin: ["*"]
      default: block
"#,
    );
    let denied = engine.evaluate(&call("execute_sql", json!({"role": "analyst"})));
    assert_eq!(denied.decision, Decision::Block);
    assert_eq!(denied.blocking_rule.as_deref(), Some("entitlement"));

    let granted = engine.evaluate(&call("execute_sql", json!({"role": "admin"})));
    assert_eq!(granted.decision, Decision::Allow);
}

#[test]
fn budget_rule_blocks_over_cost_and_allows_under_cost() {
    let engine = engine_from(
        r#"
policy_version: "1"
rules:
  - name: cap_spend
    type: budget
    applies_to: ["*"]
    params:
      max_cost: 5.0
"#,
    );
    let over = engine.evaluate(&call("run_job", json!({"estimated_cost": 9.5})));
    assert_eq!(over.decision, Decision::Block);

    let under = engine.evaluate(&call("run_job", json!({"estimated_cost": 1.0})));
    assert_eq!(under.decision, Decision::Allow);

    let missing = engine.evaluate(&call("run_job", json!({})));
    assert_eq!(missing.decision, Decision::Block, "missing cost field fails closed");
}
