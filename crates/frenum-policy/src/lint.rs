//! Linter (C4): a pure function over a raw policy document producing the
//! exact diagnostics table from §3.

use crate::rule::{parse_kind, RawPolicyFile, RuleIssue};
use std::collections::HashSet;

/// Diagnostic code, one of the six codes in §3's `LintFinding` schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LintCode {
    /// A regex source failed to compile.
    E001,
    /// A `pii_detect` rule named an unknown detector.
    E002,
    /// Two rules share the same name.
    E003,
    /// `applies_to` is an empty list.
    W001,
    /// A known rule kind is missing mandatory params.
    W002,
    /// The rule's `type` is not in the closed `RuleKind` sum.
    W003,
}

impl LintCode {
    /// `error` for `E*` codes, `warning` for `W*` codes.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::E001 | Self::E002 | Self::E003 => Severity::Error,
            Self::W001 | Self::W002 | Self::W003 => Severity::Warning,
        }
    }

    /// The code as it renders in reports, e.g. `"E001"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001 => "E001",
            Self::E002 => "E002",
            Self::E003 => "E003",
            Self::W001 => "W001",
            Self::W002 => "W002",
            Self::W003 => "W003",
        }
    }
}

/// Severity of a [`LintFinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks deployment (non-zero `lint` exit code).
    Error,
    /// Informational only; never changes exit code.
    Warning,
}

/// One diagnostic produced by [`lint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFinding {
    /// Diagnostic code.
    pub code: LintCode,
    /// Derived from `code`.
    pub severity: Severity,
    /// Name of the offending rule, when attributable to one.
    pub rule_name: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

/// Lint a raw policy document, returning findings ordered by rule
/// declaration order, then code ascending, then message.
#[must_use]
pub fn lint(doc: &RawPolicyFile) -> Vec<LintFinding> {
    let mut indexed: Vec<(usize, LintFinding)> = Vec::new();
    let mut seen_names: HashSet<&str> = HashSet::new();

    for (idx, rule) in doc.rules.iter().enumerate() {
        if !seen_names.insert(rule.name.as_str()) {
            indexed.push((
                idx,
                LintFinding {
                    code: LintCode::E003,
                    severity: Severity::Error,
                    rule_name: Some(rule.name.clone()),
                    message: format!("duplicate rule name '{}'", rule.name),
                },
            ));
        }

        if rule.applies_to.is_empty() {
            indexed.push((
                idx,
                LintFinding {
                    code: LintCode::W001,
                    severity: Severity::Warning,
                    rule_name: Some(rule.name.clone()),
                    message: format!("rule '{}' has an empty applies_to list", rule.name),
                },
            ));
        }

        if let Err(issue) = parse_kind(rule) {
            let finding = match issue {
                RuleIssue::InvalidRegex(detail) => LintFinding {
                    code: LintCode::E001,
                    severity: Severity::Error,
                    rule_name: Some(rule.name.clone()),
                    message: format!("rule '{}': invalid regex: {detail}", rule.name),
                },
                RuleIssue::UnknownDetector(name) => LintFinding {
                    code: LintCode::E002,
                    severity: Severity::Error,
                    rule_name: Some(rule.name.clone()),
                    message: format!("rule '{}': unknown PII detector '{name}'", rule.name),
                },
                RuleIssue::UnknownType(type_) => LintFinding {
                    code: LintCode::W003,
                    severity: Severity::Warning,
                    rule_name: Some(rule.name.clone()),
                    message: format!("rule '{}': unknown rule type '{type_}'", rule.name),
                },
                RuleIssue::MissingParams(detail) => LintFinding {
                    code: LintCode::W002,
                    severity: Severity::Warning,
                    rule_name: Some(rule.name.clone()),
                    message: format!("rule '{}': {detail}", rule.name),
                },
            };
            indexed.push((idx, finding));
        }
    }

    indexed.sort_by(|(ia, a), (ib, b)| ia.cmp(ib).then_with(|| a.code.cmp(&b.code)).then_with(|| a.message.cmp(&b.message)));
    indexed.into_iter().map(|(_, f)| f).collect()
}

/// `true` if `findings` contains at least one error-severity finding.
#[must_use]
pub fn has_errors(findings: &[LintFinding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Classification, RawRule};
    use serde_json::json;

    fn rule(name: &str, type_: &str, applies_to: Vec<&str>, params: serde_json::Value) -> RawRule {
        RawRule {
            name: name.into(),
            type_: type_.into(),
            applies_to: applies_to.into_iter().map(String::from).collect(),
            classification: Classification::Deterministic,
            params,
        }
    }

    #[test]
    fn duplicate_name_is_e003() {
        let doc = RawPolicyFile {
            policy_version: "v1".into(),
            rules: vec![
                rule("r1", "tool_allowlist", vec!["*"], json!({"allowed_tools": ["x"]})),
                rule("r1", "tool_allowlist", vec!["*"], json!({"allowed_tools": ["x"]})),
            ],
        };
        let findings = lint(&doc);
        assert!(findings.iter().any(|f| f.code == LintCode::E003));
    }

    #[test]
    fn empty_applies_to_is_w001() {
        let doc = RawPolicyFile {
            policy_version: "v1".into(),
            rules: vec![rule("r1", "tool_allowlist", vec![], json!({"allowed_tools": ["x"]}))],
        };
        let findings = lint(&doc);
        assert!(findings.iter().any(|f| f.code == LintCode::W001));
    }

    #[test]
    fn unknown_type_is_w003_and_warning() {
        let doc =
            RawPolicyFile { policy_version: "v1".into(), rules: vec![rule("r1", "nope", vec!["*"], json!({}))] };
        let findings = lint(&doc);
        assert_eq!(findings[0].code, LintCode::W003);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(!has_errors(&findings));
    }

    #[test]
    fn invalid_regex_is_e001_and_error() {
        let doc = RawPolicyFile {
            policy_version: "v1".into(),
            rules: vec![rule(
                "r1",
                "regex_block",
                vec!["*"],
                json!({"fields": ["query"], "patterns": ["("]}),
            )],
        };
        let findings = lint(&doc);
        assert_eq!(findings[0].code, LintCode::E001);
        assert!(has_errors(&findings));
    }

    #[test]
    fn findings_are_ordered_by_declaration_then_code_then_message() {
        let doc = RawPolicyFile {
            policy_version: "v1".into(),
            rules: vec![
                rule("second", "nope", vec![], json!({})),
                rule("first", "also_nope", vec![], json!({})),
            ],
        };
        let findings = lint(&doc);
        // rule 0 ("second") findings precede rule 1 ("first") findings.
        let second_idx = findings.iter().position(|f| f.rule_name.as_deref() == Some("second")).unwrap();
        let first_idx = findings.iter().position(|f| f.rule_name.as_deref() == Some("first")).unwrap();
        assert!(second_idx < first_idx);
    }
}
