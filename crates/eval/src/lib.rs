//! riskscript evaluator -- runs threat-model risk rules against a model
//! and explains every decision it makes.
//!
//! Rules are structured data (maps, lists and scalars, usually loaded
//! from YAML). The evaluator parses them once into expression and
//! statement trees, then evaluates the `match`, `data` and `id` blocks
//! per technical asset. Every value carries its origin path and the
//! history of events that produced it, so a match reads back as
//! "confidentiality of technical asset 'web' is greater than internal".

pub mod builtin;
pub mod compare;
pub mod expression;
pub mod interpolate;
pub mod parse;
pub mod provenance;
pub mod rule;
pub mod scales;
pub mod scope;
pub mod script;
pub mod statement;
pub mod types;

pub use builtin::Registry;
pub use provenance::{Event, EventKind, History, Path, Text};
pub use rule::{GeneratedRisk, RiskReport, RiskRule, RuleError, SubjectFailure};
pub use scope::Scope;
pub use script::{RiskData, Script};
pub use types::{EvalConfig, Fault, Payload, ScriptError, Value, ValueKind};

/// Load a rule from YAML and evaluate it against a model.
///
/// This is the one-call entry point; hosts that evaluate many models
/// should keep the parsed [`RiskRule`] instead.
pub fn generate_risks(
    rule_yaml: &str,
    model: &serde_json::Value,
) -> Result<RiskReport, RuleError> {
    RiskRule::from_yaml(rule_yaml)?.generate_risks(model)
}
