//! Evaluator (C5): orders and applies rules to a tool call, producing a
//! total, deterministic [`EvaluationResult`].

use crate::glob;
use crate::pii;
use crate::probe;
use crate::rule::{compile, CompiledPolicy, CompiledRule, PolicyError, RawPolicyFile, RuleBody, RuleKind};
use frenum_core::{Decision, EvaluationResult, RedactionTarget, ToolCall};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, RwLock};

enum RuleOutcome {
    Pass,
    PassWithMatches(Vec<String>),
    Block(String),
}

/// Deterministic, fail-closed tool-call evaluator.
///
/// Thread-safe for concurrent `evaluate` calls once constructed. The only
/// interior mutability is the applicability cache (§4.5); reload (§5) swaps
/// the compiled policy and invalidates the cache atomically with respect to
/// readers taking their own snapshot.
pub struct Engine {
    policy: RwLock<Arc<CompiledPolicy>>,
    applicability_cache: RwLock<HashMap<String, Arc<[usize]>>>,
}

impl Engine {
    /// Compile `raw` and construct an engine ready to evaluate.
    ///
    /// Fails only when a rule's regex source does not compile (§3
    /// invariant 3); every other validation problem taints the offending
    /// rule instead of preventing construction.
    pub fn new(raw: RawPolicyFile) -> Result<Self, PolicyError> {
        let compiled = compile(raw)?;
        Ok(Self { policy: RwLock::new(Arc::new(compiled)), applicability_cache: RwLock::new(HashMap::new()) })
    }

    /// Load and compile a policy document from a YAML file.
    pub fn load_from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let file = File::open(&path)
            .map_err(|source| PolicyError::Io { path: path.as_ref().display().to_string(), source })?;
        let raw: RawPolicyFile = serde_yaml::from_reader(BufReader::new(file))?;
        Self::new(raw)
    }

    /// Free-form policy version string from the currently active policy.
    #[must_use]
    pub fn policy_version(&self) -> String {
        self.policy.read().expect("policy lock poisoned").policy_version.clone()
    }

    /// Number of rules in the currently active policy.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.policy.read().expect("policy lock poisoned").rules.len()
    }

    /// Access the currently active compiled policy (e.g. for the linter or
    /// the test runner's coverage computation).
    #[must_use]
    pub fn compiled_policy(&self) -> Arc<CompiledPolicy> {
        self.policy.read().expect("policy lock poisoned").clone()
    }

    /// Replace the active policy with a freshly compiled one. Stop-the-
    /// world: in-flight `evaluate` calls that already hold the previous
    /// `Arc<CompiledPolicy>` snapshot continue to see it (§5).
    pub fn reload(&self, raw: RawPolicyFile) -> Result<(), PolicyError> {
        let compiled = Arc::new(compile(raw)?);
        *self.policy.write().expect("policy lock poisoned") = compiled;
        self.applicability_cache.write().expect("cache lock poisoned").clear();
        Ok(())
    }

    fn applicable_indices(&self, policy: &CompiledPolicy, tool_name: &str) -> Arc<[usize]> {
        if let Some(hit) = self.applicability_cache.read().expect("cache lock poisoned").get(tool_name) {
            return hit.clone();
        }
        let indices: Arc<[usize]> = policy
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.applies_to.matches(tool_name))
            .map(|(i, _)| i)
            .collect();
        self.applicability_cache
            .write()
            .expect("cache lock poisoned")
            .insert(tool_name.to_string(), indices.clone());
        indices
    }

    /// Evaluate one tool call against the active policy.
    ///
    /// Total: always returns an [`EvaluationResult`], never panics out of
    /// this call (per-rule panics are caught and fold to `block`, §4.5
    /// step 5).
    #[must_use]
    pub fn evaluate(&self, tool_call: &ToolCall) -> EvaluationResult {
        let policy = self.policy.read().expect("policy lock poisoned").clone();
        let indices = self.applicable_indices(&policy, tool_call.name());
        let args = tool_call.args_as_value();

        let mut rules_evaluated = Vec::with_capacity(indices.len());
        let mut matched_paths: Option<Vec<String>> = None;
        let mut redaction_targets: Vec<RedactionTarget> = Vec::new();

        for &idx in indices.iter() {
            let rule = &policy.rules[idx];
            rules_evaluated.push(rule.name.clone());

            let mut rule_redactions = Vec::new();
            let outcome =
                catch_unwind(AssertUnwindSafe(|| evaluate_rule(rule, tool_call, &args, &mut rule_redactions)))
                    .unwrap_or_else(|_| RuleOutcome::Block(format!("Rule '{}' errored: panic", rule.name)));
            redaction_targets.append(&mut rule_redactions);

            match outcome {
                RuleOutcome::Pass => {}
                RuleOutcome::PassWithMatches(paths) => {
                    matched_paths.get_or_insert_with(Vec::new).extend(paths);
                }
                RuleOutcome::Block(reason) => {
                    let mut result = EvaluationResult::block(rule.name.clone(), reason, rules_evaluated);
                    result.matched_paths = matched_paths;
                    result.redaction_targets = redaction_targets;
                    return result;
                }
            }
        }

        let mut result = EvaluationResult::allow(rules_evaluated);
        result.matched_paths = matched_paths;
        result.redaction_targets = redaction_targets;
        result
    }
}

fn evaluate_rule(
    rule: &CompiledRule,
    tool_call: &ToolCall,
    args: &Value,
    redactions: &mut Vec<RedactionTarget>,
) -> RuleOutcome {
    match &rule.body {
        RuleBody::Tainted(reason) => RuleOutcome::Block(format!("Rule misconfigured: {reason}")),
        RuleBody::Kind(kind) => match kind {
            RuleKind::RegexBlock { fields, patterns } => evaluate_regex_block(&rule.name, fields, patterns, args, redactions),
            RuleKind::RegexRequire { fields, pattern } => evaluate_regex_require(fields, pattern, args),
            RuleKind::PiiDetect { detectors, action } => evaluate_pii_detect(detectors, *action, args, redactions),
            RuleKind::Entitlement { roles, default } => evaluate_entitlement(roles, *default, tool_call, args),
            RuleKind::Budget { max_cost, cost_field } => evaluate_budget(*max_cost, cost_field, args),
            RuleKind::ToolAllowlist { allowed_tools } => evaluate_tool_allowlist(allowed_tools, tool_call),
        },
    }
}

fn evaluate_regex_block(
    rule_name: &str,
    fields: &[String],
    patterns: &[regex::Regex],
    args: &Value,
    redactions: &mut Vec<RedactionTarget>,
) -> RuleOutcome {
    for field in fields {
        let Some(value) = probe::probe_field(args, field) else { continue };
        for pattern in patterns {
            if let Some(m) = pattern.find(&value) {
                redactions.push(RedactionTarget { path: field.clone(), label: rule_name.to_string() });
                return RuleOutcome::Block(format!("Pattern matched in '{field}': {}", m.as_str()));
            }
        }
    }
    RuleOutcome::Pass
}

/// `pattern` is anchored at construction time (see `rule::parse_kind`), so a
/// plain `is_match` already requires the whole value to match.
fn fully_matches(pattern: &regex::Regex, value: &str) -> bool {
    pattern.is_match(value)
}

fn evaluate_regex_require(fields: &[String], pattern: &regex::Regex, args: &Value) -> RuleOutcome {
    for field in fields {
        match probe::probe_field(args, field) {
            Some(value) if !value.is_empty() && fully_matches(pattern, &value) => {}
            _ => return RuleOutcome::Block(format!("Required field '{field}' missing or invalid")),
        }
    }
    RuleOutcome::Pass
}

fn evaluate_pii_detect(
    detectors: &[pii::DetectorName],
    action: crate::rule::PiiAction,
    args: &Value,
    redactions: &mut Vec<RedactionTarget>,
) -> RuleOutcome {
    let mut matched_paths = Vec::new();
    let mut first: Option<(pii::DetectorName, String)> = None;
    for leaf in probe::walk(args) {
        let findings = pii::scan(&leaf.value, detectors);
        if let Some(first_finding) = findings.first() {
            if first.is_none() {
                first = Some((first_finding.detector, leaf.path.clone()));
            }
            redactions.push(RedactionTarget { path: leaf.path.clone(), label: first_finding.detector.as_str().to_string() });
            matched_paths.push(leaf.path);
        }
    }
    if matched_paths.is_empty() {
        return RuleOutcome::Pass;
    }
    match action {
        crate::rule::PiiAction::Block => {
            let (detector, path) = first.expect("matched_paths non-empty implies a first finding");
            RuleOutcome::Block(format!("PII detected ({detector}) in '{path}'"))
        }
        crate::rule::PiiAction::Flag => RuleOutcome::PassWithMatches(matched_paths),
    }
}

fn evaluate_entitlement(
    roles: &std::collections::BTreeMap<String, Vec<String>>,
    default: crate::rule::EntitlementDefault,
    tool_call: &ToolCall,
    args: &Value,
) -> RuleOutcome {
    let tool_name = tool_call.name();
    let default_pass = matches!(default, crate::rule::EntitlementDefault::Allow);
    let role = args.get("role").and_then(Value::as_str);
    let entitled = match role {
        Some(role) => match roles.get(role) {
            Some(allowed) => glob::matches_any(allowed.iter().map(String::as_str), tool_name),
            None => default_pass,
        },
        None => default_pass,
    };
    if entitled {
        RuleOutcome::Pass
    } else if let Some(role) = role {
        RuleOutcome::Block(format!("Role '{role}' not entitled to '{tool_name}'"))
    } else {
        RuleOutcome::Block(format!("No role provided for '{tool_name}'; default deny"))
    }
}

fn evaluate_budget(max_cost: f64, cost_field: &str, args: &Value) -> RuleOutcome {
    match probe::probe_field(args, cost_field).and_then(|s| s.parse::<f64>().ok()) {
        Some(cost) if cost <= max_cost => RuleOutcome::Pass,
        Some(cost) => RuleOutcome::Block(format!("Estimated cost {cost} exceeds max_cost {max_cost}")),
        None => RuleOutcome::Block(format!(
            "Estimated cost at '{cost_field}' missing or invalid; treated as exceeding max_cost {max_cost}"
        )),
    }
}

fn evaluate_tool_allowlist(allowed_tools: &[String], tool_call: &ToolCall) -> RuleOutcome {
    if glob::matches_any(allowed_tools.iter().map(String::as_str), tool_call.name()) {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Block(format!("Tool '{}' not in allowlist", tool_call.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn policy_yaml(body: &str) -> RawPolicyFile {
        serde_yaml::from_str(body).expect("valid test fixture yaml")
    }

    fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
        let map: BTreeMap<String, Value> = args.as_object().cloned().unwrap_or_default().into_iter().collect();
        ToolCall::new(name, map).expect("non-empty tool name")
    }

    #[test]
    fn sql_injection_scenario_blocks() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: block_sql_injection
    type: regex_block
    applies_to: ["execute_sql"]
    params:
      fields: ["query"]
      patterns: ["(?i)(DROP|DELETE|TRUNCATE)\\s+TABLE"]
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("execute_sql", json!({"query": "DROP TABLE users"})));
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.blocking_rule.as_deref(), Some("block_sql_injection"));
        assert!(result.reason.contains("query"));
        assert!(result.reason.contains("DROP TABLE"));
    }

    #[test]
    fn sql_injection_scenario_allows_benign_query() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: block_sql_injection
    type: regex_block
    applies_to: ["execute_sql"]
    params:
      fields: ["query"]
      patterns: ["(?i)(DROP|DELETE|TRUNCATE)\\s+TABLE"]
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("execute_sql", json!({"query": "SELECT 1"})));
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.rules_evaluated, vec!["block_sql_injection"]);
    }

    #[test]
    fn regex_require_blocks_on_missing_field() {
        let raw = policy_yaml(
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
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("send_email", json!({"to": "a@b.c"})));
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.blocking_rule.as_deref(), Some("require_confirmation"));
    }

    #[test]
    fn pii_detect_blocks_and_reports_path() {
        let raw = policy_yaml(
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
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("send_email", json!({"body": "Customer HKID is A123456(7)"})));
        assert_eq!(result.decision, Decision::Block);
        assert!(result.reason.contains("body"));
        assert!(result.reason.contains("hk_id"));
        assert_eq!(
            result.redaction_targets,
            vec![frenum_core::RedactionTarget { path: "body".to_string(), label: "hk_id".to_string() }]
        );
    }

    #[test]
    fn pii_detect_flag_action_allows_and_annotates() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: flag_pii
    type: pii_detect
    applies_to: ["*"]
    params:
      detectors: ["hk_id"]
      action: flag
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("send_email", json!({"body": "Customer HKID is A123456(7)"})));
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.matched_paths, Some(vec!["body".to_string()]));
    }

    #[test]
    fn entitlement_scenario() {
        let raw = policy_yaml(
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
        let engine = Engine::new(raw).unwrap();
        let blocked = engine.evaluate(&tool_call("execute_sql", json!({"role": "analyst"})));
        assert_eq!(blocked.decision, Decision::Block);
        let allowed = engine.evaluate(&tool_call("execute_sql", json!({"role": "admin"})));
        assert_eq!(allowed.decision, Decision::Allow);
    }

    #[test]
    fn first_block_wins_and_later_rules_are_absent_from_rules_evaluated() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: first
    type: tool_allowlist
    applies_to: ["*"]
    params:
      allowed_tools: ["other_tool"]
  - name: second
    type: tool_allowlist
    applies_to: ["*"]
    params:
      allowed_tools: ["*"]
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("execute_sql", json!({})));
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.rules_evaluated, vec!["first"]);
    }

    #[test]
    fn applicability_excludes_non_matching_tool_names() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: only_sql
    type: tool_allowlist
    applies_to: ["execute_sql"]
    params:
      allowed_tools: ["execute_sql"]
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("send_email", json!({})));
        assert!(!result.rules_evaluated.contains(&"only_sql".to_string()));
        assert_eq!(result.decision, Decision::Allow);
    }

    #[test]
    fn tainted_rule_fails_closed() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: broken
    type: regex_block
    applies_to: ["*"]
    params: {}
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let result = engine.evaluate(&tool_call("anything", json!({})));
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.blocking_rule.as_deref(), Some("broken"));
    }

    #[test]
    fn determinism_across_repeated_evaluations() {
        let raw = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: block_sql_injection
    type: regex_block
    applies_to: ["execute_sql"]
    params:
      fields: ["query"]
      patterns: ["DROP"]
"#,
        );
        let engine = Engine::new(raw).unwrap();
        let call = tool_call("execute_sql", json!({"query": "DROP TABLE users"}));
        let a = engine.evaluate(&call);
        let b = engine.evaluate(&call);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.reason, b.reason);
        assert_eq!(a.blocking_rule, b.blocking_rule);
        assert_eq!(a.rules_evaluated, b.rules_evaluated);
    }

    #[test]
    fn reload_swaps_policy_and_clears_cache() {
        let raw1 = policy_yaml(
            r#"
policy_version: "1"
rules:
  - name: allow_all
    type: tool_allowlist
    applies_to: ["*"]
    params:
      allowed_tools: ["*"]
"#,
        );
        let engine = Engine::new(raw1).unwrap();
        let _ = engine.evaluate(&tool_call("execute_sql", json!({})));
        let raw2 = policy_yaml(
            r#"
policy_version: "2"
rules:
  - name: deny_all
    type: tool_allowlist
    applies_to: ["*"]
    params:
      allowed_tools: ["nothing_matches"]
"#,
        );
        engine.reload(raw2).unwrap();
        assert_eq!(engine.policy_version(), "2");
        let result = engine.evaluate(&tool_call("execute_sql", json!({})));
        assert_eq!(result.decision, Decision::Block);
    }
}
