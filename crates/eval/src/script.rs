//! Top-level rule scripts: `match`, `data`, `id` and `utils`.
//!
//! A [`Script`] is parsed once and evaluated per subject. Each entry
//! point clones the scope it is given, so subjects never observe each
//! other's variables.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::expression::{as_condition, eval_expression, eval_string};
use crate::parse::{is_statement_keyword, literal, parse_expression, parse_method, parse_methods, parse_statement};
use crate::provenance::{History, Text, INDENT};
use crate::scope::Scope;
use crate::statement::call;
use crate::types::{Expression, Fault, Method, ScriptError, Statement, StatementKind, Value};

type Map = serde_json::Map<String, serde_json::Value>;

/// Record fields that get a line in the rating explanation, with their
/// display titles.
const RATED_FIELDS: [(&str, &str); 4] = [
    ("severity", "Severity"),
    ("exploitation_likelihood", "Exploitation Likelihood"),
    ("exploitation_impact", "Exploitation Impact"),
    ("data_breach_probability", "Data Breach Probability"),
];

/// A parsed rule script.
#[derive(Debug, Clone)]
pub struct Script {
    id: Option<IdBlock>,
    data: Option<DataBlock>,
    matcher: Option<Method>,
    methods: Arc<BTreeMap<String, Arc<Method>>>,
}

#[derive(Debug, Clone)]
struct IdBlock {
    parameter: Option<String>,
    id: Option<Expression>,
}

#[derive(Debug, Clone)]
struct DataBlock {
    parameter: Option<String>,
    fields: Vec<(String, Expression)>,
}

/// Output of [`Script::evaluate_data`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskData {
    pub fields: Map,
    pub rating_explanation: Vec<String>,
    pub risk_explanation: Vec<String>,
}

impl Script {
    pub fn parse(tree: &serde_json::Value) -> Result<Script, ScriptError> {
        let map = tree
            .as_object()
            .ok_or_else(|| ScriptError::parse("script must be a map", literal(tree)))?;
        let mut script = Script {
            id: None,
            data: None,
            matcher: None,
            methods: Arc::new(BTreeMap::new()),
        };
        for (key, value) in map {
            match key.trim().to_lowercase().as_str() {
                "id" => {
                    script.id = Some(parse_id(value).map_err(|e| e.context("failed to parse \"id\""))?)
                }
                "data" => {
                    script.data =
                        Some(parse_data(value).map_err(|e| e.context("failed to parse \"data\""))?)
                }
                "match" => {
                    script.matcher =
                        Some(parse_match(value).map_err(|e| e.context("failed to parse \"match\""))?)
                }
                "utils" => {
                    script.methods = Arc::new(
                        parse_methods(value).map_err(|e| e.context("failed to parse \"utils\""))?,
                    )
                }
                _ => {
                    return Err(ScriptError::parse(
                        format!("unexpected script keyword {key:?}"),
                        literal(tree),
                    ))
                }
            }
        }
        Ok(script)
    }

    /// A scope with this script's utility methods registered.
    pub fn new_scope(&self) -> Scope {
        Scope::new().with_methods(Arc::clone(&self.methods))
    }

    pub fn methods(&self) -> &BTreeMap<String, Arc<Method>> {
        &self.methods
    }

    /// Decide whether the rule applies to `subject`, with the explanation.
    pub fn evaluate_match(&self, scope: &Scope, subject: &Value) -> Result<(bool, History), Fault> {
        let Some(matcher) = &self.matcher else {
            return Ok((false, History::new()));
        };
        let mut caller = scope.clone();
        caller.set_item(Some(subject.clone()));
        let args = if matcher.parameters.is_empty() {
            Vec::new()
        } else {
            vec![subject.clone()]
        };
        let invocation = call(matcher, &caller, args).map_err(|f| f.context("failed to evaluate match"))?;
        let outcome = match invocation.value.or(invocation.last_condition) {
            Some(value) => {
                as_condition(value).map_err(|e| Fault::new(&matcher.literal, e.context("match result")))?
            }
            None => Value::bool(false),
        };
        let matched = outcome.to_bool()?;
        tracing::debug!(subject = %subject.path(), matched, "evaluated match");
        Ok((matched, outcome.history().clone()))
    }

    /// Compute the record fields and the explanations for a matched
    /// subject.
    pub fn evaluate_data(
        &self,
        scope: &Scope,
        subject: &Value,
        match_explanation: &History,
    ) -> Result<RiskData, Fault> {
        let mut caller = scope.clone();
        caller.set_item(Some(subject.clone()));

        let mut values: BTreeMap<&str, Value> = BTreeMap::new();
        if let Some(data) = &self.data {
            if let Some(name) = &data.parameter {
                caller.set(name, subject.clone());
            }
            for (name, expr) in &data.fields {
                let value = eval_expression(expr, &mut caller)
                    .map_err(|f| f.context(format!("failed to evaluate data field {name:?}")))?;
                values.insert(name, value);
            }
        }

        let mut rating_explanation = Vec::new();
        for (field, title) in RATED_FIELDS {
            if let Some(value) = values.get(field).filter(|v| !v.is_nil()) {
                rating_explanation.extend(explanation(
                    format!("'{title}' is '{}'", value.display()),
                    value.history().text(),
                ));
            }
        }

        let title = scope
            .category()
            .get("title")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let risk_explanation = explanation(
            format!(
                "Risk '{title}' has been flagged for {}",
                subject.text().lines().join(" ")
            ),
            match_explanation.text(),
        );

        Ok(RiskData {
            fields: values
                .iter()
                .map(|(name, value)| (name.to_string(), value.plain()))
                .collect(),
            rating_explanation,
            risk_explanation,
        })
    }

    /// Build the risk's identifier. An empty string means the caller
    /// should fall back to its own default.
    pub fn evaluate_id(&self, scope: &Scope, subject: &Value, record: &Map) -> Result<String, Fault> {
        let Some(block) = &self.id else {
            return Ok(String::new());
        };
        let Some(expr) = &block.id else {
            return Ok(String::new());
        };
        let mut caller = scope.clone();
        caller.bind_risk_record(record)?;
        caller.set_item(Some(subject.clone()));
        if let Some(name) = &block.parameter {
            caller.set(name, subject.clone());
        }
        eval_string(expr, &mut caller).map_err(|f| f.context("failed to evaluate id"))
    }
}

/// `headline because` followed by the indented clauses, all but the last
/// ending in `, and`.
fn explanation(headline: String, because: Text) -> Vec<String> {
    if because.is_empty() {
        return vec![headline];
    }
    let mut lines = vec![format!("{headline} because")];
    let items = because.items();
    for (n, item) in items.iter().enumerate() {
        let mut clause = Text::new();
        clause.push(item.line.clone(), item.because.clone());
        let mut rendered = clause.lines();
        if n + 1 < items.len() {
            if let Some(last) = rendered.last_mut() {
                last.push_str(", and");
            }
        }
        lines.extend(rendered.into_iter().map(|line| format!("{INDENT}{line}")));
    }
    lines
}

fn parameter(value: &serde_json::Value) -> Result<String, ScriptError> {
    value
        .as_str()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ScriptError::parse("parameter must be a non-empty string", literal(value)))
}

fn parse_id(tree: &serde_json::Value) -> Result<IdBlock, ScriptError> {
    let map = tree
        .as_object()
        .ok_or_else(|| ScriptError::parse("id must be a map", literal(tree)))?;
    let mut block = IdBlock {
        parameter: None,
        id: None,
    };
    for (key, value) in map {
        match key.trim().to_lowercase().as_str() {
            "parameter" => block.parameter = Some(parameter(value)?),
            "id" => block.id = Some(parse_expression(value)?),
            _ => {
                return Err(ScriptError::parse(
                    format!("unexpected id keyword {key:?}"),
                    literal(tree),
                ))
            }
        }
    }
    Ok(block)
}

fn parse_data(tree: &serde_json::Value) -> Result<DataBlock, ScriptError> {
    let map = tree
        .as_object()
        .ok_or_else(|| ScriptError::parse("data must be a map", literal(tree)))?;
    let mut block = DataBlock {
        parameter: None,
        fields: Vec::new(),
    };
    for (key, value) in map {
        if key.trim().eq_ignore_ascii_case("parameter") {
            block.parameter = Some(parameter(value)?);
            continue;
        }
        let expr = parse_expression(value)
            .map_err(|e| e.context(format!("failed to parse data field {key:?}")))?;
        block.fields.push((key.trim().to_string(), expr));
    }
    Ok(block)
}

/// `match` is either a method definition or a bare statement. A bare
/// expression is shorthand for returning it.
fn parse_match(tree: &serde_json::Value) -> Result<Method, ScriptError> {
    if let Some(map) = tree.as_object() {
        let is_method = !map.is_empty()
            && map.keys().all(|k| {
                matches!(
                    k.trim().to_lowercase().as_str(),
                    "parameter" | "parameters" | "do"
                )
            });
        if is_method {
            return parse_method("match", tree);
        }
        let is_expression = map.len() == 1 && map.keys().all(|k| !is_statement_keyword(k));
        if is_expression {
            let expr = parse_expression(tree)?;
            return Ok(Method {
                literal: literal(tree),
                name: "match".to_string(),
                parameters: Vec::new(),
                body: Some(Statement {
                    literal: literal(tree),
                    kind: StatementKind::Return(Some(expr)),
                }),
            });
        }
    }
    Ok(Method {
        literal: literal(tree),
        name: "match".to_string(),
        parameters: Vec::new(),
        body: Some(parse_statement(tree)?),
    })
}
