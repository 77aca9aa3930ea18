//! Risk rules: a risk category plus the script that detects it.
//!
//! A rule document carries the category fields at the top level,
//! `supported-tags`, and the script under `risk`:
//!
//! ```yaml
//! id: unencrypted-asset
//! title: Unencrypted Technical Asset
//! supported-tags: []
//! risk:
//!   match:
//!     parameter: tech_asset
//!     do:
//!       return:
//!         equal:
//!           first: "{tech_asset.encryption}"
//!           second: none
//!   data:
//!     parameter: tech_asset
//!     severity: medium
//! ```

use serde::Serialize;

use crate::provenance::{History, Path};
use crate::script::Script;
use crate::types::{EvalConfig, Fault, ScriptError, Value};

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid rule document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("rule document must be a map")]
    NotAMap,

    #[error("rule has no \"risk\" script")]
    MissingScript,

    #[error("{error}\nin:\n{listing}")]
    Script { error: ScriptError, listing: String },

    #[error("{0}")]
    Binding(ScriptError),
}

/// One risk produced for one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedRisk {
    pub category: String,
    pub synthetic_id: String,
    pub most_relevant_technical_asset: String,
    /// The record computed by the `data` block.
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub risk_explanation: Vec<String>,
    pub rating_explanation: Vec<String>,
}

/// A subject whose evaluation failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectFailure {
    pub subject: String,
    pub error: String,
    /// Source fragment of the node that failed.
    pub literal: String,
}

/// Everything one rule produced against one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskReport {
    pub category: String,
    pub risks: Vec<GeneratedRisk>,
    pub failures: Vec<SubjectFailure>,
}

#[derive(Debug, Clone)]
pub struct RiskRule {
    category: serde_json::Value,
    supported_tags: Vec<String>,
    script: Script,
}

impl RiskRule {
    pub fn from_yaml(text: &str) -> Result<RiskRule, RuleError> {
        let tree: serde_json::Value = serde_yaml::from_str(text)?;
        RiskRule::from_tree(&tree)
    }

    pub fn from_tree(tree: &serde_json::Value) -> Result<RiskRule, RuleError> {
        let map = tree.as_object().ok_or(RuleError::NotAMap)?;
        let mut category = serde_json::Map::new();
        let mut supported_tags = Vec::new();
        let mut script = None;
        for (key, value) in map {
            match key.trim().to_lowercase().replace('_', "-").as_str() {
                "risk" => {
                    script = Some(Script::parse(value).map_err(|error| RuleError::Script {
                        listing: numbered(error.fragment().unwrap_or(&crate::parse::literal(value))),
                        error,
                    })?)
                }
                "supported-tags" => {
                    supported_tags = value
                        .as_array()
                        .map(|tags| {
                            tags.iter()
                                .filter_map(|t| t.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default()
                }
                _ => {
                    category.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(RiskRule {
            category: serde_json::Value::Object(category),
            supported_tags,
            script: script.ok_or(RuleError::MissingScript)?,
        })
    }

    pub fn id(&self) -> &str {
        self.category_str("id")
    }

    pub fn title(&self) -> &str {
        self.category_str("title")
    }

    pub fn category(&self) -> &serde_json::Value {
        &self.category
    }

    pub fn supported_tags(&self) -> &[String] {
        &self.supported_tags
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    fn category_str(&self, key: &str) -> &str {
        self.category
            .get(key)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }

    pub fn generate_risks<T: Serialize + ?Sized>(&self, model: &T) -> Result<RiskReport, RuleError> {
        self.generate_risks_with(model, &EvalConfig::default())
    }

    /// Evaluate the rule against every technical asset of `model`.
    /// A failing subject is recorded in the report and skipped.
    pub fn generate_risks_with<T: Serialize + ?Sized>(
        &self,
        model: &T,
        config: &EvalConfig,
    ) -> Result<RiskReport, RuleError> {
        let mut scope = self.script.new_scope().with_config(config.clone());
        scope.bind_category(&self.category).map_err(RuleError::Binding)?;
        scope.bind_model(model).map_err(RuleError::Binding)?;

        let mut report = RiskReport {
            category: self.id().to_string(),
            ..RiskReport::default()
        };
        for (asset_id, raw) in technical_assets(scope.model()) {
            let subject = Value::of(
                &raw,
                Path::root(format!("technical asset '{asset_id}'")),
                History::new(),
            );
            tracing::debug!(rule = self.id(), asset = %asset_id, "evaluating subject");
            match self.evaluate_subject(&scope, &asset_id, &subject) {
                Ok(Some(risk)) => report.risks.push(risk),
                Ok(None) => {}
                Err(fault) => {
                    tracing::warn!(rule = self.id(), asset = %asset_id, error = %fault, "subject evaluation failed");
                    report.failures.push(SubjectFailure {
                        subject: asset_id,
                        error: fault.to_string(),
                        literal: fault.literal,
                    });
                }
            }
        }
        Ok(report)
    }

    fn evaluate_subject(
        &self,
        scope: &crate::scope::Scope,
        asset_id: &str,
        subject: &Value,
    ) -> Result<Option<GeneratedRisk>, Fault> {
        let (matched, why) = self.script.evaluate_match(scope, subject)?;
        if !matched {
            return Ok(None);
        }
        let data = self.script.evaluate_data(scope, subject, &why)?;
        let mut synthetic_id = self.script.evaluate_id(scope, subject, &data.fields)?;
        if synthetic_id.is_empty() {
            synthetic_id = format!("{}@{asset_id}", self.id());
        }
        Ok(Some(GeneratedRisk {
            category: self.id().to_string(),
            synthetic_id,
            most_relevant_technical_asset: asset_id.to_string(),
            fields: data.fields,
            risk_explanation: data.risk_explanation,
            rating_explanation: data.rating_explanation,
        }))
    }
}

/// Technical assets as `(id, asset)`: a map keyed by id, or a list of
/// assets carrying their own `id`.
fn technical_assets(model: &serde_json::Value) -> Vec<(String, serde_json::Value)> {
    let assets = model
        .as_object()
        .and_then(|m| m.iter().find(|(k, _)| k.eq_ignore_ascii_case("technical_assets")))
        .map(|(_, v)| v);
    match assets {
        Some(serde_json::Value::Object(map)) => {
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(n, item)| {
                let id = item
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| format!("#{}", n + 1), str::to_string);
                (id, item.clone())
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Prefix each line with its 1-based number.
fn numbered(text: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(n, line)| format!("{:>4}: {line}", n + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
