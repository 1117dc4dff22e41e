//! Frenum Policy Engine
//!
//! This crate provides a deterministic, fail-closed tool-call policy engine:
//! a typed rule model compiled from a declarative document, a linter that
//! validates configurations before deployment, and a short-circuit evaluator
//! that enforces first-block-wins ordering.
//!
//! Decision taxonomy:
//! - `Allow` — proceed unchanged
//! - `Block` — refuse the call (fail-closed default on error/misconfig)
//!
//! Precedence and determinism:
//! 1) Build the ordered list of applicable rules (declaration order, tool
//!    name matched by literal or `*`).
//! 2) Walk rules in order; the first rule to block short-circuits
//!    evaluation.
//! 3) Any rule tainted by a lint-level misconfiguration (unknown type,
//!    missing params) always blocks (fail closed).
//! 4) If every applicable rule passes, the call is allowed.
//!
//! All evaluations are deterministic for a given policy and input.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod evaluator;
pub mod glob;
pub mod lint;
pub mod pii;
pub mod probe;
pub mod rule;

pub use evaluator::Engine;
pub use lint::{lint, has_errors, LintCode, LintFinding, Severity};
pub use pii::DetectorName;
pub use rule::{
    load_raw_policy, Classification, CompiledPolicy, CompiledRule, PolicyError, RawPolicyFile, RawRule, RuleBody,
    RuleKind,
};
