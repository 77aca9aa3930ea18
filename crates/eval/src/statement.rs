//! Statement execution and method invocation.

use crate::expression::{enter, entries, eval_condition, eval_expression, eval_string};
use crate::provenance::{Event, History};
use crate::scope::Scope;
use crate::types::{Fault, Method, ScriptError, Statement, StatementKind, Value};

/// Run a statement. Once the scope has returned, statements are no-ops.
pub fn run_statement(stmt: &Statement, scope: &mut Scope) -> Result<(), Fault> {
    if scope.has_returned() {
        return Ok(());
    }
    run_kind(&stmt.kind, scope).map_err(|f| f.at(&stmt.literal))
}

fn run_kind(kind: &StatementKind, scope: &mut Scope) -> Result<(), Fault> {
    match kind {
        StatementKind::List(statements) => {
            for stmt in statements {
                if scope.has_returned() {
                    break;
                }
                run_statement(stmt, scope)?;
            }
            Ok(())
        }
        StatementKind::Assign(assignments) => {
            for (name, expr) in assignments {
                let value = eval_expression(expr, scope)
                    .map_err(|f| f.context(format!("failed to assign {name:?}")))?;
                scope.set(name, value);
            }
            Ok(())
        }
        StatementKind::If {
            condition,
            then,
            otherwise,
        } => {
            let value = eval_condition(condition, scope)
                .map_err(|f| f.context("failed to evaluate if-statement condition"))?;
            let b = value.to_bool()?;
            scope.record_condition(value);
            let branch = if b { then } else { otherwise };
            match branch {
                Some(stmt) => run_statement(stmt, scope),
                None => Ok(()),
            }
        }
        StatementKind::Loop {
            collection,
            item,
            index,
            body,
        } => {
            let collection = eval_expression(collection, scope)
                .map_err(|f| f.context("failed to evaluate loop-statement collection"))?;
            let Some(body) = body else {
                return Ok(());
            };
            for entry in entries(&collection)? {
                let previous = enter(scope, &entry, item.as_deref(), index.as_deref());
                let outcome = run_statement(body, scope);
                scope.set_item(previous);
                outcome.map_err(|f| {
                    f.context(format!("failed to run loop-statement for item {}", entry.label))
                })?;
                if scope.has_returned() {
                    break;
                }
            }
            Ok(())
        }
        StatementKind::Return(expr) => {
            let value = expr
                .as_ref()
                .map(|e| eval_expression(e, scope))
                .transpose()
                .map_err(|f| f.context("failed to evaluate return-statement"))?;
            scope.set_return(value);
            Ok(())
        }
        StatementKind::Defer(statements) => {
            for stmt in statements {
                scope.defer(stmt.clone());
            }
            Ok(())
        }
        StatementKind::Explain(expr) => {
            scope.set_explain(expr.clone());
            Ok(())
        }
    }
}

/// Result of running a method body to completion.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub value: Option<Value>,
    /// The outcome of the last `if` condition evaluated in the body.
    pub last_condition: Option<Value>,
}

/// Call `method` from `caller` and return its result.
pub fn invoke(method: &Method, caller: &Scope, args: Vec<Value>) -> Result<Option<Value>, Fault> {
    Ok(call(method, caller, args)?.value)
}

/// Call `method` in a fresh call scope derived from `caller`.
///
/// Arguments bind to the parameters by position. After the body, deferred
/// statements run in registration order, then the explain hook replaces
/// the history of the return value with its own text.
pub fn call(method: &Method, caller: &Scope, args: Vec<Value>) -> Result<Invocation, Fault> {
    if method.parameters.len() != args.len() {
        return Err(Fault::new(
            &method.literal,
            ScriptError::ArityMismatch {
                name: method.name.clone(),
                expected: method.parameters.len(),
                actual: args.len(),
            },
        ));
    }
    let mut scope = caller.clone_for_call();
    let limit = scope.config().max_call_depth;
    if scope.depth() > limit {
        return Err(Fault::new(
            &method.literal,
            ScriptError::CallDepthExceeded {
                name: method.name.clone(),
                limit,
            },
        ));
    }
    tracing::debug!(method = %method.name, depth = scope.depth(), args = args.len(), "calling method");

    let mut frame = History::new();
    for (name, arg) in method.parameters.iter().zip(&args) {
        frame.extend(arg.history());
        scope.set(name, arg.clone());
    }
    scope.push_call(frame);
    scope.set_args(args);

    if let Some(body) = &method.body {
        run_statement(body, &mut scope)?;
    }
    finish(&mut scope)?;

    Ok(Invocation {
        value: scope.take_return(),
        last_condition: scope.last_condition().cloned(),
    })
}

/// Drain deferred statements, then apply the explain hook.
fn finish(scope: &mut Scope) -> Result<(), Fault> {
    loop {
        let deferred = scope.take_deferred();
        if deferred.is_empty() {
            break;
        }
        for stmt in deferred {
            scope.reset_returned();
            run_statement(&stmt, scope).map_err(|f| f.context("failed to run deferred statement"))?;
        }
    }
    let Some(explain) = scope.take_explain() else {
        return Ok(());
    };
    scope.reset_returned();
    scope.clear_call_stack();
    let text = eval_string(&explain, scope).map_err(|f| f.context("failed to evaluate explain-statement"))?;
    if let Some(value) = scope.take_return() {
        let history = scope.history(History::of(Event::explain(text)));
        scope.set_return(Some(value.replace_history(history)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_method, parse_methods, parse_statement};
    use crate::types::EvalConfig;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;

    fn run(tree: serde_json::Value, scope: &mut Scope) {
        let stmt = parse_statement(&tree).unwrap();
        run_statement(&stmt, scope).unwrap();
    }

    #[test]
    fn return_halts_the_list() {
        let mut scope = Scope::new();
        run(
            json!([
                {"assign": {"x": 1}},
                {"return": "{x}"},
                {"assign": {"x": 2}}
            ]),
            &mut scope,
        );
        assert!(scope.has_returned());
        assert_eq!(scope.return_value().unwrap().display(), "1");
        assert_eq!(scope.get("x").unwrap().display(), "1");
    }

    #[test]
    fn if_records_last_condition() {
        let mut scope = Scope::new();
        run(
            json!({"if": {"equal": {"first": 1, "second": 2}, "then": {"assign": {"r": "then"}}, "else": {"assign": {"r": "else"}}}}),
            &mut scope,
        );
        assert_eq!(scope.get("r").unwrap().to_str().unwrap(), "else");
        assert!(!scope.last_condition().unwrap().to_bool().unwrap());
    }

    #[test]
    fn loop_binds_item_and_index_and_restores_current_item() {
        let mut scope = Scope::new();
        scope.set("names", Value::array(vec![Value::string("a"), Value::string("b")]));
        run(
            json!([
                {"assign": {"joined": ""}},
                {"loop": {"in": "{names}", "item": "n", "index": "i", "do": {"assign": {"joined": "{joined}{i}{n}"}}}}
            ]),
            &mut scope,
        );
        assert_eq!(scope.get("joined").unwrap().to_str().unwrap(), "0a1b");
        assert!(scope.item().is_none());
    }

    #[test]
    fn loop_errors_name_the_item() {
        let mut scope = Scope::new();
        scope.set("values", Value::array(vec![Value::string("ok"), Value::string("bad")]));
        let stmt = parse_statement(&json!({"loop": {"in": "{values}", "item": "v", "do": {
            "if": {"true": "{v}"}
        }}}))
        .unwrap();
        let err = run_statement(&stmt, &mut scope).unwrap_err();
        assert!(err.to_string().starts_with("failed to run loop-statement for item #1"));
    }

    #[test]
    fn method_scope_is_isolated() {
        let method = parse_method(
            "touch",
            &json!({"parameter": "x", "do": [{"assign": {"x": "changed", "y": "new"}}, {"return": "{x}"}]}),
        )
        .unwrap();
        let mut caller = Scope::new();
        caller.set("x", Value::string("original"));
        let value = invoke(&method, &caller, vec![Value::string("arg")]).unwrap().unwrap();
        assert_eq!(value.to_str().unwrap(), "changed");
        assert_eq!(caller.get("x").unwrap().to_str().unwrap(), "original");
        assert!(caller.get("y").is_none());
    }

    #[test]
    fn deferred_statements_run_before_explain() {
        let method = parse_method(
            "m",
            &json!({"do": [
                {"defer": [{"assign": {"seen": "yes"}}, {"return": false}]},
                {"explain": "seen is {seen}"},
                {"return": true}
            ]}),
        )
        .unwrap();
        let value = invoke(&method, &Scope::new(), vec![]).unwrap().unwrap();
        // the deferred return overrides the body's
        assert!(!value.to_bool().unwrap());
        assert_eq!(value.history().text().lines(), vec!["seen is yes"]);
    }

    #[test]
    fn arity_is_checked() {
        let method = parse_method("m", &json!({"parameters": ["a", "b"], "do": {"return": true}})).unwrap();
        let err = invoke(&method, &Scope::new(), vec![Value::nil()]).unwrap_err();
        assert_eq!(err.to_string(), "\"m\" expected 2 parameters, got 1");
    }

    #[test]
    fn runaway_recursion_is_bounded() {
        let methods = parse_methods(&json!({"loop": {"do": {"return": "loop()"}}})).unwrap();
        let scope = Scope::new()
            .with_methods(Arc::new(methods.clone()))
            .with_config(EvalConfig { max_call_depth: 8 });
        let err = invoke(&methods["loop"], &scope, vec![]).unwrap_err();
        assert!(matches!(
            err.error.root(),
            ScriptError::CallDepthExceeded { limit: 8, .. }
        ));
    }

    #[test]
    fn method_branches_on_parameter() {
        let methods = parse_methods(&json!({
            "countdown": {"parameter": "n", "do": {
                "if": {"greater": {"first": "{n}", "second": 0}},
                "then": {"return": "more"},
                "else": {"return": "done"}
            }}
        }))
        .unwrap();
        let scope = Scope::new().with_methods(Arc::new(methods.clone()));
        let value = invoke(&methods["countdown"], &scope, vec![Value::decimal(Decimal::ZERO)]).unwrap();
        assert_eq!(value.unwrap().to_str().unwrap(), "done");
    }
}
