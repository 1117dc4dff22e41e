//! Append-only audit log for the Frenum tool-call policy engine.
//!
//! Every evaluated [`ToolCall`] is written as one redacted JSON object per
//! line, keys in a fixed order, terminated by `\n`. Writes are serialized
//! behind a mutex so line boundaries are never interleaved. The logger
//! accepts an injectable clock and id generator so records are reproducible
//! in tests; production code uses wall-clock UTC and a random id.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use frenum_core::ids::{Clock, IdGenerator};
use frenum_core::{Decision, EvaluationResult, RedactionTarget, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised while opening or writing to the audit log.
#[derive(Debug, Error)]
pub enum AuditLogError {
    /// The log file could not be opened or written to.
    #[error("audit log io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be serialized to JSON.
    #[error("audit log serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A manual override of an evaluator decision, recorded alongside the
/// original evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HumanOverride {
    /// Identity of the person or system performing the override.
    pub actor: String,
    /// Why the override was made.
    pub reason: String,
    /// The decision the override replaces the evaluator's verdict with.
    pub new_decision: Decision,
}

/// One line of the audit log: the full context and outcome of a single
/// evaluation, with `tool_args` redacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Universally unique identifier for this decision.
    pub decision_id: String,
    /// RFC3339 UTC timestamp with millisecond precision.
    pub timestamp: String,
    /// `policy_version` of the compiled policy in effect at evaluation time.
    pub policy_version: String,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Redacted copy of the tool call's arguments.
    pub tool_args: Value,
    /// The evaluator's verdict.
    pub decision: Decision,
    /// Rule names evaluated, in order, up to and including any blocker.
    pub rules_evaluated: Vec<String>,
    /// Name of the rule that blocked the call, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_rule: Option<String>,
    /// A manual override applied after the fact, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_override: Option<HumanOverride>,
    /// Caller-supplied trace id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Replace every scalar in `args` addressed by a [`RedactionTarget`] with
/// `"<redacted:<label>>"`. Operates over a deep copy; `args` is untouched.
#[must_use]
pub fn redact(args: &Value, targets: &[RedactionTarget]) -> Value {
    let mut out = args.clone();
    for target in targets {
        set_at_path(&mut out, &target.path, Value::String(format!("<redacted:{}>", target.label)));
    }
    out
}

/// Path segment: either an object key or an array index.
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split a dotted path like `messages[0].body` into its segments.
fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        if let Some(bracket) = rest.find('[') {
            let key = &rest[..bracket];
            if !key.is_empty() {
                out.push(Segment::Key(key));
            }
            rest = &rest[bracket..];
            while let Some(end) = rest.find(']') {
                if let Ok(idx) = rest[1..end].parse::<usize>() {
                    out.push(Segment::Index(idx));
                }
                rest = &rest[end + 1..];
            }
        } else if !rest.is_empty() {
            out.push(Segment::Key(rest));
        }
    }
    out
}

fn set_at_path(value: &mut Value, path: &str, replacement: Value) {
    let segs = segments(path);
    let mut cursor = value;
    for (i, seg) in segs.iter().enumerate() {
        let last = i + 1 == segs.len();
        cursor = match (seg, &mut *cursor) {
            (Segment::Key(k), Value::Object(map)) => match map.get_mut(*k) {
                Some(slot) => {
                    if last {
                        *slot = replacement;
                        return;
                    }
                    slot
                }
                None => return,
            },
            (Segment::Index(idx), Value::Array(arr)) => match arr.get_mut(*idx) {
                Some(slot) => {
                    if last {
                        *slot = replacement;
                        return;
                    }
                    slot
                }
                None => return,
            },
            _ => return,
        };
    }
}

/// An append-only, mutex-serialized JSON-lines audit sink.
pub struct AuditLogger {
    file: Mutex<File>,
    clock: Box<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl AuditLogger {
    /// Open (creating if absent) the log file at `path`, using `clock` and
    /// `ids` as the sources of timestamps and decision ids.
    pub fn open<P: AsRef<Path>>(
        path: P,
        clock: Box<dyn Clock>,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, AuditLogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file), clock, ids })
    }

    /// Build and append an [`AuditRecord`] for one evaluation.
    ///
    /// `tool_args` is redacted per `result.redaction_targets` before being
    /// written; the caller's `tool_call` is never mutated.
    pub fn record(
        &self,
        tool_call: &ToolCall,
        policy_version: impl Into<String>,
        result: &EvaluationResult,
        trace_id: Option<String>,
        human_override: Option<HumanOverride>,
    ) -> Result<AuditRecord, AuditLogError> {
        let record = AuditRecord {
            decision_id: self.ids.next_id(),
            timestamp: self.clock.now_rfc3339_millis(),
            policy_version: policy_version.into(),
            tool_name: tool_call.name().to_string(),
            tool_args: redact(&tool_call.args_as_value(), &result.redaction_targets),
            decision: result.decision,
            rules_evaluated: result.rules_evaluated.clone(),
            blocking_rule: result.blocking_rule.clone(),
            human_override,
            trace_id,
        };
        self.append(&record)?;
        Ok(record)
    }

    fn append(&self, record: &AuditRecord) -> Result<(), AuditLogError> {
        use std::io::Write;

        // Explicit field order wrapper: serde preserves struct declaration
        // order for a non-map type, but spelling it out here keeps the
        // on-disk schema pinned even if `AuditRecord`'s fields are reordered.
        #[derive(Serialize)]
        struct AuditRecordSer<'a> {
            decision_id: &'a str,
            timestamp: &'a str,
            policy_version: &'a str,
            tool_name: &'a str,
            tool_args: &'a Value,
            decision: Decision,
            rules_evaluated: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            blocking_rule: &'a Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            human_override: &'a Option<HumanOverride>,
            #[serde(skip_serializing_if = "Option::is_none")]
            trace_id: &'a Option<String>,
        }

        let ser = AuditRecordSer {
            decision_id: &record.decision_id,
            timestamp: &record.timestamp,
            policy_version: &record.policy_version,
            tool_name: &record.tool_name,
            tool_args: &record.tool_args,
            decision: record.decision,
            rules_evaluated: &record.rules_evaluated,
            blocking_rule: &record.blocking_rule,
            human_override: &record.human_override,
            trace_id: &record.trace_id,
        };
        let line = serde_json::to_string(&ser)?;
        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

/// Read every [`AuditRecord`] from a JSON-lines audit log.
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<AuditRecord>, AuditLogError> {
    use std::io::{BufRead, BufReader};

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
