//! Expression evaluation.
//!
//! Every expression evaluates to a [`Value`] whose history explains the
//! result. Boolean operators combine the histories of the operands that
//! decided the outcome; comparisons record a single comparison event that
//! names the original operands.

use rust_decimal::Decimal;

use crate::compare::{compare_as, is_greater, is_less, is_same};
use crate::interpolate::interpolate;
use crate::provenance::{Event, EventKind, History, Path};
use crate::scope::Scope;
use crate::types::{
    CompareOp, Comparison, Containment, Expression, ExpressionKind, Fault, Payload, Quantifier,
    QuantifierOp, ScriptError, Value, ValueKind,
};

/// Evaluate an expression to a value.
pub fn eval_expression(expr: &Expression, scope: &mut Scope) -> Result<Value, Fault> {
    eval_kind(&expr.kind, scope).map_err(|f| f.at(&expr.literal))
}

/// Evaluate an expression that must yield a truth value.
pub fn eval_condition(expr: &Expression, scope: &mut Scope) -> Result<Value, Fault> {
    let value = eval_expression(expr, scope)?;
    as_condition(value).map_err(|e| Fault::new(&expr.literal, e))
}

/// Evaluate an expression that must yield text. Nil reads as empty.
pub fn eval_string(expr: &Expression, scope: &mut Scope) -> Result<String, Fault> {
    let value = eval_expression(expr, scope)?;
    match value.raw() {
        Payload::String(s) => Ok(s.clone()),
        Payload::Decimal(_) | Payload::Bool(_) => Ok(value.display()),
        _ if value.is_nil() => Ok(String::new()),
        _ => Err(Fault::new(
            &expr.literal,
            ScriptError::TypeMismatch {
                expected: ValueKind::String,
                actual: value.kind(),
            },
        )),
    }
}

/// Coerce a value to a boolean value. Nil is false and strings are
/// parsed; a boolean read from somewhere gains a true/false event.
pub fn as_condition(value: Value) -> Result<Value, ScriptError> {
    let b = match value.raw() {
        Payload::Bool(b) => *b,
        Payload::String(s) => parse_bool(s).ok_or(ScriptError::TypeMismatch {
            expected: ValueKind::Bool,
            actual: ValueKind::String,
        })?,
        _ if value.is_nil() => false,
        _ => {
            return Err(ScriptError::TypeMismatch {
                expected: ValueKind::Bool,
                actual: value.kind(),
            })
        }
    };
    if value.path().is_empty() {
        let history = value.history().clone();
        return Ok(Value::bool(b).replace_history(history));
    }
    let event = if b {
        Event::new(EventKind::True(value))
    } else {
        Event::new(EventKind::False(value))
    };
    Ok(Value::bool(b).replace_history(History::of(event)))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "" => Some(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" | "yes" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" | "no" => Some(false),
        _ => None,
    }
}

fn eval_kind(kind: &ExpressionKind, scope: &mut Scope) -> Result<Value, Fault> {
    match kind {
        ExpressionKind::Value(raw) => eval_value(raw, scope),
        ExpressionKind::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            let mut history = History::new();
            for (n, item) in items.iter().enumerate() {
                let value = eval_expression(item, scope)
                    .map_err(|f| f.context(format!("error evaluating array item #{}", n + 1)))?;
                history.extend(value.history());
                values.push(value);
            }
            Ok(Value::array(values).replace_history(history))
        }
        ExpressionKind::And(operands) => eval_and(operands, scope),
        ExpressionKind::Or(operands) => eval_or(operands, scope),
        ExpressionKind::True(inner) => eval_condition(inner, scope),
        ExpressionKind::False(inner) => {
            let value = eval_condition(inner, scope)?;
            let b = value.to_bool()?;
            Ok(Value::bool(!b).replace_history(value.history().clone()))
        }
        ExpressionKind::Quantifier(q) => eval_quantifier(q, scope),
        ExpressionKind::Contain(c) => eval_contain(c, scope),
        ExpressionKind::Compare(c) => eval_compare(c, scope),
    }
}

fn eval_value(raw: &serde_json::Value, scope: &mut Scope) -> Result<Value, Fault> {
    match raw {
        serde_json::Value::String(s) => interpolate(s, scope),
        other => Ok(Value::of(other, Path::new(), History::new())),
    }
}

fn eval_and(operands: &[Expression], scope: &mut Scope) -> Result<Value, Fault> {
    let mut history = History::new();
    for (n, operand) in operands.iter().enumerate() {
        let value = eval_condition(operand, scope)
            .map_err(|f| f.context(format!("error evaluating and-expression #{}", n + 1)))?;
        if !value.to_bool()? {
            return Ok(value);
        }
        history.extend(value.history());
    }
    Ok(Value::bool(true).replace_history(history))
}

fn eval_or(operands: &[Expression], scope: &mut Scope) -> Result<Value, Fault> {
    let mut history = History::new();
    for (n, operand) in operands.iter().enumerate() {
        let value = eval_condition(operand, scope)
            .map_err(|f| f.context(format!("error evaluating or-expression #{}", n + 1)))?;
        if value.to_bool()? {
            return Ok(value);
        }
        history.extend(value.history());
    }
    Ok(Value::bool(false).replace_history(history))
}

// ──────────────────────────────────────────────
// Iteration
// ──────────────────────────────────────────────

/// One step of a quantifier or loop.
pub(crate) struct Entry {
    pub index: Value,
    pub item: Value,
    /// Used in error breadcrumbs: `#2` or `"key"`.
    pub label: String,
}

/// Expand a collection into iteration entries. Arrays are indexed from
/// zero, maps iterate by key, and Nil iterates as empty.
pub(crate) fn entries(collection: &Value) -> Result<Vec<Entry>, ScriptError> {
    match collection.raw() {
        Payload::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(n, item)| {
                let item = if item.path().is_empty() && !collection.path().is_empty() {
                    item.repath(
                        collection.path().child(format!("item #{}", n + 1)),
                        collection.history(),
                    )
                } else {
                    item.clone()
                };
                Entry {
                    index: Value::decimal(Decimal::from(n)),
                    item,
                    label: format!("#{}", n + 1),
                }
            })
            .collect()),
        Payload::Any(serde_json::Value::Object(map)) => Ok(map
            .iter()
            .map(|(key, raw)| Entry {
                index: Value::string(key.clone()),
                item: Value::of(
                    raw,
                    collection.path().child(format!("'{key}'")),
                    collection.history().clone(),
                ),
                label: format!("{key:?}"),
            })
            .collect()),
        _ if collection.is_nil() => Ok(Vec::new()),
        _ => Err(ScriptError::TypeMismatch {
            expected: ValueKind::Array,
            actual: collection.kind(),
        }),
    }
}

/// Make `entry` the current item and bind the optional item and index
/// names. Returns the previous current item.
pub(crate) fn enter(
    scope: &mut Scope,
    entry: &Entry,
    item: Option<&str>,
    index: Option<&str>,
) -> Option<Value> {
    if let Some(name) = item {
        scope.set(name, entry.item.clone());
    }
    if let Some(name) = index {
        scope.set(name, entry.index.clone());
    }
    scope.set_item(Some(entry.item.clone()))
}

fn eval_quantifier(q: &Quantifier, scope: &mut Scope) -> Result<Value, Fault> {
    let collection = eval_expression(&q.collection, scope)?;
    let entries = entries(&collection)?;
    let Some(predicate) = &q.predicate else {
        return Ok(match q.op {
            QuantifierOp::All => Value::bool(true),
            QuantifierOp::Any => Value::bool(!entries.is_empty()),
            QuantifierOp::Count => Value::decimal(Decimal::from(entries.len())),
        });
    };
    let name = match q.op {
        QuantifierOp::All => "all",
        QuantifierOp::Any => "any",
        QuantifierOp::Count => "count",
    };
    let mut history = History::new();
    let mut count = 0usize;
    for entry in &entries {
        let previous = enter(scope, entry, q.item.as_deref(), q.index.as_deref());
        let outcome = eval_condition(predicate, scope);
        scope.set_item(previous);
        let value = outcome.map_err(|f| {
            f.context(format!("error evaluating {name}-expression for item {}", entry.label))
        })?;
        let b = value.to_bool()?;
        match q.op {
            QuantifierOp::All if !b => return Ok(value),
            QuantifierOp::Any if b => return Ok(value),
            QuantifierOp::Count => {
                if b {
                    count += 1;
                    history.push(Event::value(value));
                }
            }
            _ => history.extend(value.history()),
        }
    }
    Ok(match q.op {
        QuantifierOp::All => Value::bool(true).replace_history(history),
        QuantifierOp::Any => Value::bool(false).replace_history(history),
        QuantifierOp::Count => Value::decimal(Decimal::from(count)).replace_history(history),
    })
}

// ──────────────────────────────────────────────
// Comparison
// ──────────────────────────────────────────────

fn eval_cast_type(as_type: Option<&Expression>, scope: &mut Scope) -> Result<Option<String>, Fault> {
    match as_type {
        Some(expr) => {
            let name = eval_string(expr, scope)?;
            Ok(Some(name).filter(|n| !n.is_empty()))
        }
        None => Ok(None),
    }
}

fn eval_contain(c: &Containment, scope: &mut Scope) -> Result<Value, Fault> {
    let item = eval_expression(&c.item, scope)?;
    let collection = eval_expression(&c.collection, scope)?;
    let as_type = eval_cast_type(c.as_type.as_deref(), scope)?;
    let elements: Vec<Value> = entries(&collection)?.into_iter().map(|e| e.item).collect();
    let mut comparisons = History::new();
    for element in &elements {
        let event = compare_as(scope.registry(), element, &item, as_type.as_deref())?;
        if is_same(&event) {
            let found = Event::contain(collection, item).because(History::of(event));
            return Ok(Value::bool(true).replace_history(History::of(found)));
        }
        comparisons.push(event);
    }
    let missing = Event::contain(collection, item).negate().because(comparisons);
    Ok(Value::bool(false).replace_history(History::of(missing)))
}

fn eval_compare(c: &Comparison, scope: &mut Scope) -> Result<Value, Fault> {
    let first = eval_expression(&c.first, scope)
        .map_err(|f| f.context(format!("failed to evaluate first of {}-expression", c.op.keyword())))?;
    let second = eval_expression(&c.second, scope)
        .map_err(|f| f.context(format!("failed to evaluate second of {}-expression", c.op.keyword())))?;
    let as_type = eval_cast_type(c.as_type.as_deref(), scope)?;
    let event = compare_as(scope.registry(), &first, &second, as_type.as_deref())
        .map_err(|e| e.context(format!("failed to evaluate {}-expression", c.op.keyword())))?;
    let (result, event) = match c.op {
        CompareOp::Equal => (is_same(&event), event),
        CompareOp::NotEqual => (!is_same(&event), event),
        CompareOp::Greater => (is_greater(&event), event),
        CompareOp::Less => (is_less(&event), event),
        CompareOp::EqualOrGreater if is_same(&event) || is_greater(&event) => {
            (true, Event::new(EventKind::GreaterOrEqual(first, second)))
        }
        CompareOp::EqualOrLess if is_same(&event) || is_less(&event) => {
            (true, Event::new(EventKind::LessOrEqual(first, second)))
        }
        CompareOp::EqualOrGreater | CompareOp::EqualOrLess => (false, event),
    };
    Ok(Value::bool(result).replace_history(History::of(event)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_expression;
    use serde_json::json;

    fn eval(tree: serde_json::Value, scope: &mut Scope) -> Value {
        let expr = parse_expression(&tree).unwrap();
        eval_expression(&expr, scope).unwrap()
    }

    fn asset_scope() -> Scope {
        let mut scope = Scope::new();
        scope.set(
            "asset",
            Value::of(
                &json!({
                    "id": "web",
                    "confidentiality": "strictly-confidential",
                    "tags": ["git", "linux"],
                    "ports": [80, 443],
                    "internet": true
                }),
                Path::root("technical asset 'web'"),
                History::new(),
            ),
        );
        scope
    }

    #[test]
    fn cast_comparison_explains_with_original_operands() {
        let mut scope = asset_scope();
        let v = eval(
            json!({"greater": {"first": "{asset.confidentiality}", "second": "internal", "as": "confidentiality"}}),
            &mut scope,
        );
        assert!(v.to_bool().unwrap());
        assert_eq!(
            v.history().text().lines(),
            vec!["confidentiality of technical asset 'web' is greater than internal"]
        );
    }

    #[test]
    fn equal_or_greater_reports_combined_event() {
        let mut scope = Scope::new();
        scope.set("n", Value::decimal(Decimal::from(2)).with_path(Path::root("n")));
        let v = eval(json!({"equal-or-greater": {"first": "{n}", "second": 2}}), &mut scope);
        assert!(v.to_bool().unwrap());
        assert_eq!(
            v.history().text().lines(),
            vec!["n is greater than or equal to 2"]
        );
        let v = eval(json!({"equal_or_less": {"first": "{n}", "second": 1}}), &mut scope);
        assert!(!v.to_bool().unwrap());
    }

    #[test]
    fn all_and_any_are_duals() {
        let mut scope = asset_scope();
        let all = eval(
            json!({"all": {"in": "{asset.ports}", "item": "p", "greater": {"first": "{p}", "second": 100}}}),
            &mut scope,
        );
        let not_any = eval(
            json!({"false": {"any": {"in": "{asset.ports}", "item": "p", "false": {"greater": {"first": "{p}", "second": 100}}}}}),
            &mut scope,
        );
        assert_eq!(all.to_bool().unwrap(), not_any.to_bool().unwrap());
        assert!(!all.to_bool().unwrap());
        assert_eq!(
            all.history().text().lines(),
            vec!["item #1 of ports of technical asset 'web' is less than 100"]
        );
    }

    #[test]
    fn empty_collections() {
        let mut scope = Scope::new();
        scope.set("none", Value::array(vec![]));
        let pred = json!({"equal": {"first": 1, "second": 1}});
        let all = eval(json!({"all": {"in": "{none}", "true": pred.clone()}}), &mut scope);
        assert!(all.to_bool().unwrap());
        let any = eval(json!({"any": {"in": "{none}", "true": pred}}), &mut scope);
        assert!(!any.to_bool().unwrap());
        let count = eval(json!({"count": {"in": "{missing}"}}), &mut scope);
        assert_eq!(count.to_decimal().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn quantifier_without_predicate() {
        let mut scope = asset_scope();
        let count = eval(json!({"count": {"in": "{asset.tags}"}}), &mut scope);
        assert_eq!(count.to_decimal().unwrap(), Decimal::from(2));
        let any = eval(json!({"any": {"in": "{asset.tags}"}}), &mut scope);
        assert!(any.to_bool().unwrap());
    }

    #[test]
    fn quantifier_binds_index_and_current_item() {
        let mut scope = asset_scope();
        let count = eval(
            json!({"count": {"in": "{asset.tags}", "index": "i", "or": [
                {"equal": {"first": "{i}", "second": 1}},
                {"equal": {"first": "{.}", "second": "git"}}
            ]}}),
            &mut scope,
        );
        assert_eq!(count.to_decimal().unwrap(), Decimal::from(2));
        assert!(scope.item().is_none());
    }

    #[test]
    fn contain_explains_the_match() {
        let mut scope = asset_scope();
        let v = eval(json!({"contains": {"item": "git", "in": "{asset.tags}"}}), &mut scope);
        assert!(v.to_bool().unwrap());
        let lines = v.history().text().lines();
        assert_eq!(lines[0], "tags of technical asset 'web' contains git because");
        let v = eval(json!({"contain": {"item": "svn", "in": "{asset.tags}"}}), &mut scope);
        assert!(!v.to_bool().unwrap());
        assert!(v.history().text().lines()[0].starts_with("tags of technical asset 'web' does not contain svn"));
    }

    #[test]
    fn literal_elements_render_as_themselves() {
        let mut scope = asset_scope();
        scope.set(
            "names",
            Value::of(&json!(["web", "db"]), Path::new(), History::new()),
        );
        let v = eval(
            json!({"any": {"in": "{names}", "item": "n", "equal": {"first": "{n}", "second": "{asset.id}"}}}),
            &mut scope,
        );
        assert!(v.to_bool().unwrap());
        assert_eq!(
            v.history().text().lines(),
            vec!["web is equal to id of technical asset 'web'"]
        );
        let v = eval(json!({"contains": {"item": "{asset.id}", "in": "{names}"}}), &mut scope);
        assert!(v.to_bool().unwrap());
        let text = v.history().text().lines().join("\n");
        assert!(text.contains("web is equal to id of technical asset 'web'"), "{text}");
        assert!(!text.contains("item #"), "{text}");
    }

    #[test]
    fn contain_with_cast() {
        let mut scope = Scope::new();
        scope.set("levels", Value::array(vec![Value::string("public"), Value::string("internal")]));
        let v = eval(
            json!({"contain": {"item": "Internal", "in": "{levels}", "as": "confidentiality"}}),
            &mut scope,
        );
        assert!(v.to_bool().unwrap());
    }

    #[test]
    fn boolean_operators_short_circuit() {
        let mut scope = asset_scope();
        // the second operand would fail: strings cannot be compared to numbers
        let bad = json!({"greater": {"first": "x", "second": 1}});
        let v = eval(json!({"or": [{"true": "{asset.internet}"}, bad.clone()]}), &mut scope);
        assert!(v.to_bool().unwrap());
        assert_eq!(
            v.history().text().lines(),
            vec!["internet of technical asset 'web' is true"]
        );
        let v = eval(json!({"and": [false, bad]}), &mut scope);
        assert!(!v.to_bool().unwrap());
    }

    #[test]
    fn false_keeps_history() {
        let mut scope = asset_scope();
        let v = eval(json!({"false": {"equal": {"first": "{asset.id}", "second": "db"}}}), &mut scope);
        assert!(v.to_bool().unwrap());
        assert_eq!(
            v.history().text().lines(),
            vec!["id of technical asset 'web' is not equal to db"]
        );
    }

    #[test]
    fn conditions_accept_strings_and_nil() {
        let mut scope = Scope::new();
        assert!(eval(json!({"true": "yes"}), &mut scope).to_bool().unwrap());
        assert!(!eval(json!({"true": ""}), &mut scope).to_bool().unwrap());
        assert!(!eval(json!({"true": "{nothing}"}), &mut scope).to_bool().unwrap());
        let expr = parse_expression(&json!({"true": "maybe"})).unwrap();
        let err = eval_expression(&expr, &mut scope).unwrap_err();
        assert_eq!(err.error.root().to_string(), "expected bool value, got string");
    }

    #[test]
    fn errors_carry_breadcrumbs_and_fragment() {
        let mut scope = Scope::new();
        let expr = parse_expression(&json!({"and": [true, {"less": {"first": "a", "second": 2}}]})).unwrap();
        let err = eval_expression(&expr, &mut scope).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("error evaluating and-expression #2"), "{message}");
        assert!(message.contains("can't compare string to decimal"), "{message}");
        assert!(err.literal.contains("less"));
    }

    #[test]
    fn arrays_collect_element_values() {
        let mut scope = asset_scope();
        let v = eval(json!({"array": ["{asset.id}", 2]}), &mut scope);
        let items = v.to_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path().to_string(), "id of technical asset 'web'");
    }
}
