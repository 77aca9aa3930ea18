//! Parse generic rule trees into expression, statement and method nodes.
//!
//! Input is a `serde_json::Value` tree as produced by any structured-data
//! loader. Map keys are matched case-insensitively; `_` and `-` are
//! interchangeable in keywords.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{
    CompareOp, Comparison, Containment, Expression, ExpressionKind, Method, Quantifier,
    QuantifierOp, ScriptError, Statement, StatementKind,
};

type Map = serde_json::Map<String, serde_json::Value>;

/// Render a tree fragment back to text for diagnostics.
pub fn literal(tree: &serde_json::Value) -> String {
    serde_yaml::to_string(tree).unwrap_or_else(|_| tree.to_string())
}

fn keyword(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn error(message: impl Into<String>, tree: &serde_json::Value) -> ScriptError {
    ScriptError::parse(message, literal(tree))
}

/// The single `(key, value)` entry of a one-key map.
fn single_entry<'a>(
    map: &'a Map,
    what: &str,
    tree: &serde_json::Value,
) -> Result<(&'a String, &'a serde_json::Value), ScriptError> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        (None, _) => Err(error(format!("empty {what}"), tree)),
        _ => Err(error(
            format!("{what} must have exactly one key, got {}", map.len()),
            tree,
        )),
    }
}

fn as_map<'a>(tree: &'a serde_json::Value, what: &str) -> Result<&'a Map, ScriptError> {
    tree.as_object()
        .ok_or_else(|| error(format!("{what} must be a map"), tree))
}

fn name(tree: &serde_json::Value, what: &str) -> Result<String, ScriptError> {
    tree.as_str()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| error(format!("{what} must be a non-empty string"), tree))
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

/// Parse an expression. Maps carry a single keyword; lists build arrays
/// (a one-element list collapses to its element); scalars are values.
pub fn parse_expression(tree: &serde_json::Value) -> Result<Expression, ScriptError> {
    let kind = match tree {
        serde_json::Value::Object(map) => {
            let (key, value) = single_entry(map, "expression", tree)?;
            parse_keyword_expression(&keyword(key), value, tree)?
        }
        serde_json::Value::Array(items) => {
            if let [only] = items.as_slice() {
                return parse_expression(only);
            }
            ExpressionKind::Array(parse_expression_list(items)?)
        }
        scalar => ExpressionKind::Value(scalar.clone()),
    };
    Ok(Expression {
        literal: literal(tree),
        kind,
    })
}

fn parse_keyword_expression(
    key: &str,
    value: &serde_json::Value,
    tree: &serde_json::Value,
) -> Result<ExpressionKind, ScriptError> {
    let kind = match key {
        "and" => ExpressionKind::And(parse_operands(value, key)?),
        "or" => ExpressionKind::Or(parse_operands(value, key)?),
        "array" => ExpressionKind::Array(parse_operands(value, key)?),
        "true" => ExpressionKind::True(Box::new(parse_nested(value, key)?)),
        "false" => ExpressionKind::False(Box::new(parse_nested(value, key)?)),
        "all" => ExpressionKind::Quantifier(parse_quantifier(QuantifierOp::All, value)?),
        "any" => ExpressionKind::Quantifier(parse_quantifier(QuantifierOp::Any, value)?),
        "count" => ExpressionKind::Quantifier(parse_quantifier(QuantifierOp::Count, value)?),
        "contain" | "contains" => ExpressionKind::Contain(parse_containment(value)?),
        "equal" => ExpressionKind::Compare(parse_comparison(CompareOp::Equal, value)?),
        "not-equal" => ExpressionKind::Compare(parse_comparison(CompareOp::NotEqual, value)?),
        "greater" => ExpressionKind::Compare(parse_comparison(CompareOp::Greater, value)?),
        "less" => ExpressionKind::Compare(parse_comparison(CompareOp::Less, value)?),
        "equal-or-greater" => {
            ExpressionKind::Compare(parse_comparison(CompareOp::EqualOrGreater, value)?)
        }
        "equal-or-less" => {
            ExpressionKind::Compare(parse_comparison(CompareOp::EqualOrLess, value)?)
        }
        other => return Err(error(format!("unexpected expression keyword {other:?}"), tree)),
    };
    Ok(kind)
}

fn parse_nested(value: &serde_json::Value, key: &str) -> Result<Expression, ScriptError> {
    parse_expression(value).map_err(|e| e.context(format!("failed to parse {key}-expression")))
}

fn parse_expression_list(items: &[serde_json::Value]) -> Result<Vec<Expression>, ScriptError> {
    items
        .iter()
        .enumerate()
        .map(|(n, item)| {
            parse_expression(item).map_err(|e| e.context(format!("failed to parse item #{}", n + 1)))
        })
        .collect()
}

/// Operands of `and`/`or`/`array`: a list, or a single operand.
fn parse_operands(value: &serde_json::Value, key: &str) -> Result<Vec<Expression>, ScriptError> {
    let operands = match value {
        serde_json::Value::Array(items) => parse_expression_list(items),
        single => parse_expression(single).map(|e| vec![e]),
    };
    operands.map_err(|e| e.context(format!("failed to parse {key}-expression")))
}

fn parse_quantifier(op: QuantifierOp, value: &serde_json::Value) -> Result<Quantifier, ScriptError> {
    let what = match op {
        QuantifierOp::All => "all-expression",
        QuantifierOp::Any => "any-expression",
        QuantifierOp::Count => "count-expression",
    };
    let map = as_map(value, what)?;
    let mut collection = None;
    let mut item = None;
    let mut index = None;
    let mut predicate: Option<Box<Expression>> = None;
    for (key, entry) in map {
        match keyword(key).as_str() {
            "in" => collection = Some(parse_expression(entry)?),
            "item" => item = Some(name(entry, "item")?),
            "index" => index = Some(name(entry, "index")?),
            _ => {
                if predicate.is_some() {
                    return Err(error(
                        format!("failed to parse {what}: additional bool expression {key:?}"),
                        value,
                    ));
                }
                let mut single = Map::new();
                single.insert(key.clone(), entry.clone());
                let expr = parse_expression(&serde_json::Value::Object(single))
                    .map_err(|e| e.context(format!("failed to parse {what}")))?;
                predicate = Some(Box::new(expr));
            }
        }
    }
    let collection =
        collection.ok_or_else(|| error(format!("failed to parse {what}: missing \"in\""), value))?;
    Ok(Quantifier {
        op,
        collection: Box::new(collection),
        item,
        index,
        predicate,
    })
}

fn parse_containment(value: &serde_json::Value) -> Result<Containment, ScriptError> {
    let map = as_map(value, "contain-expression")?;
    let mut item = None;
    let mut collection = None;
    let mut as_type = None;
    for (key, entry) in map {
        match keyword(key).as_str() {
            "item" => item = Some(parse_expression(entry)?),
            "in" => collection = Some(parse_expression(entry)?),
            "as" => as_type = Some(Box::new(parse_expression(entry)?)),
            _ => {
                return Err(error(
                    format!("failed to parse contain-expression: unexpected keyword {key:?}"),
                    value,
                ))
            }
        }
    }
    let missing = |field: &str| {
        error(
            format!("failed to parse contain-expression: missing {field:?}"),
            value,
        )
    };
    Ok(Containment {
        item: Box::new(item.ok_or_else(|| missing("item"))?),
        collection: Box::new(collection.ok_or_else(|| missing("in"))?),
        as_type,
    })
}

fn parse_comparison(op: CompareOp, value: &serde_json::Value) -> Result<Comparison, ScriptError> {
    let what = format!("{}-expression", op.keyword());
    let map = as_map(value, &what)?;
    let mut first = None;
    let mut second = None;
    let mut as_type = None;
    for (key, entry) in map {
        match keyword(key).as_str() {
            "first" => first = Some(parse_expression(entry)?),
            "second" => second = Some(parse_expression(entry)?),
            "as" => as_type = Some(Box::new(parse_expression(entry)?)),
            _ => {
                return Err(error(
                    format!("failed to parse {what}: unexpected keyword {key:?}"),
                    value,
                ))
            }
        }
    }
    let missing = |field: &str| error(format!("failed to parse {what}: missing {field:?}"), value);
    Ok(Comparison {
        op,
        first: Box::new(first.ok_or_else(|| missing("first"))?),
        second: Box::new(second.ok_or_else(|| missing("second"))?),
        as_type,
    })
}

// ──────────────────────────────────────────────
// Statements
// ──────────────────────────────────────────────

/// Parse a statement: a one-key map naming the statement, or a list of
/// statements (a one-element list collapses to its element).
pub fn parse_statement(tree: &serde_json::Value) -> Result<Statement, ScriptError> {
    let kind = match tree {
        serde_json::Value::Object(map) => {
            let (key, value) = single_entry(map, "statement", tree)?;
            parse_keyword_statement(&keyword(key), value, tree)?
        }
        serde_json::Value::Array(items) => {
            if let [only] = items.as_slice() {
                return parse_statement(only);
            }
            let statements = items
                .iter()
                .enumerate()
                .map(|(n, item)| {
                    parse_statement(item)
                        .map_err(|e| e.context(format!("failed to parse statement #{}", n + 1)))
                })
                .collect::<Result<_, _>>()?;
            StatementKind::List(statements)
        }
        _ => return Err(error("statement must be a map or a list", tree)),
    };
    Ok(Statement {
        literal: literal(tree),
        kind,
    })
}

/// True if `key` names a statement rather than an expression.
pub fn is_statement_keyword(key: &str) -> bool {
    matches!(
        keyword(key).as_str(),
        "assign" | "if" | "loop" | "return" | "defer" | "explain"
    )
}

fn parse_keyword_statement(
    key: &str,
    value: &serde_json::Value,
    tree: &serde_json::Value,
) -> Result<StatementKind, ScriptError> {
    let kind = match key {
        "assign" => parse_assign(value)?,
        "if" => parse_if(value)?,
        "loop" => parse_loop(value)?,
        "return" => match value {
            serde_json::Value::Null => StatementKind::Return(None),
            expr => StatementKind::Return(Some(
                parse_expression(expr)
                    .map_err(|e| e.context("failed to parse return-statement"))?,
            )),
        },
        "defer" => {
            let items = match value {
                serde_json::Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            let statements = items
                .iter()
                .map(|item| parse_statement(item).map(Arc::new))
                .collect::<Result<Vec<_>, ScriptError>>()
                .map_err(|e| e.context("failed to parse defer-statement"))?;
            StatementKind::Defer(statements)
        }
        "explain" => StatementKind::Explain(Arc::new(
            parse_expression(value).map_err(|e| e.context("failed to parse explain-statement"))?,
        )),
        other => return Err(error(format!("unexpected statement keyword {other:?}"), tree)),
    };
    Ok(kind)
}

fn parse_assign(value: &serde_json::Value) -> Result<StatementKind, ScriptError> {
    let maps: Vec<&serde_json::Value> = match value {
        serde_json::Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    let mut assignments = Vec::new();
    for map in maps {
        for (key, entry) in as_map(map, "assign-statement")? {
            let expr = parse_expression(entry).map_err(|e| {
                e.context(format!("failed to parse assign-statement for {key:?}"))
            })?;
            assignments.push((key.trim().to_lowercase(), expr));
        }
    }
    Ok(StatementKind::Assign(assignments))
}

fn parse_if(value: &serde_json::Value) -> Result<StatementKind, ScriptError> {
    let map = as_map(value, "if-statement")?;
    let mut condition = None;
    let mut then = None;
    let mut otherwise = None;
    for (key, entry) in map {
        match keyword(key).as_str() {
            "then" => {
                then = Some(Box::new(
                    parse_statement(entry)
                        .map_err(|e| e.context("failed to parse then-branch of if-statement"))?,
                ))
            }
            "else" => {
                otherwise = Some(Box::new(
                    parse_statement(entry)
                        .map_err(|e| e.context("failed to parse else-branch of if-statement"))?,
                ))
            }
            _ => {
                if condition.is_some() {
                    return Err(error(
                        format!("failed to parse if-statement: additional bool expression {key:?}"),
                        value,
                    ));
                }
                let mut single = Map::new();
                single.insert(key.clone(), entry.clone());
                condition = Some(
                    parse_expression(&serde_json::Value::Object(single))
                        .map_err(|e| e.context("failed to parse if-statement"))?,
                );
            }
        }
    }
    let condition = condition
        .ok_or_else(|| error("failed to parse if-statement: missing condition", value))?;
    Ok(StatementKind::If {
        condition,
        then,
        otherwise,
    })
}

fn parse_loop(value: &serde_json::Value) -> Result<StatementKind, ScriptError> {
    let map = as_map(value, "loop-statement")?;
    let mut collection = None;
    let mut item = None;
    let mut index = None;
    let mut body = None;
    for (key, entry) in map {
        match keyword(key).as_str() {
            "in" => collection = Some(parse_expression(entry)?),
            "item" => item = Some(name(entry, "item")?),
            "index" => index = Some(name(entry, "index")?),
            "do" => {
                body = Some(Box::new(parse_statement(entry).map_err(|e| {
                    e.context(format!("failed to parse {key:?} of loop-statement"))
                })?))
            }
            _ => {
                return Err(error(
                    format!("failed to parse loop-statement: unexpected keyword {key:?}"),
                    value,
                ))
            }
        }
    }
    let collection = collection
        .ok_or_else(|| error("failed to parse loop-statement: missing \"in\"", value))?;
    Ok(StatementKind::Loop {
        collection,
        item,
        index,
        body,
    })
}

// ──────────────────────────────────────────────
// Methods
// ──────────────────────────────────────────────

/// Parse a method definition: `parameter`/`parameters` plus a `do` body.
pub fn parse_method(method_name: &str, tree: &serde_json::Value) -> Result<Method, ScriptError> {
    let map = as_map(tree, "method")?;
    let mut parameters = Vec::new();
    let mut body = None;
    for (key, entry) in map {
        match keyword(key).as_str() {
            "parameter" | "parameters" => match entry {
                serde_json::Value::Array(names) => {
                    for n in names {
                        parameters.push(name(n, "parameter")?);
                    }
                }
                single => parameters.push(name(single, "parameter")?),
            },
            "do" => body = Some(parse_statement(entry)?),
            _ => {
                return Err(error(
                    format!("failed to parse method {method_name:?}: unexpected keyword {key:?}"),
                    tree,
                ))
            }
        }
    }
    Ok(Method {
        literal: literal(tree),
        name: method_name.to_lowercase(),
        parameters,
        body,
    })
}

/// Parse `utils`: a map of `name → method`, or a list of such maps.
pub fn parse_methods(tree: &serde_json::Value) -> Result<BTreeMap<String, Arc<Method>>, ScriptError> {
    let maps: Vec<&serde_json::Value> = match tree {
        serde_json::Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    let mut methods = BTreeMap::new();
    for map in maps {
        for (method_name, definition) in as_map(map, "utils")? {
            let method = parse_method(method_name, definition)
                .map_err(|e| e.context(format!("failed to parse method {method_name:?}")))?;
            if methods.contains_key(&method.name) {
                return Err(error(format!("method {:?} redefined", method.name), map));
            }
            methods.insert(method.name.clone(), Arc::new(method));
        }
    }
    Ok(methods)
}
