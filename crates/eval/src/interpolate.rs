//! String interpolation.
//!
//! A string literal may reference variables as `{name.field}` and call
//! methods or built-ins as `name(arg, ...)`. A string that is exactly one
//! reference or one call evaluates to the referenced value itself; any
//! other string has its references substituted as text. Substitution is
//! repeated until nothing changes, within a fixed pass budget, so
//! references that resolve to further references are followed.

use crate::provenance::{Event, History, Path};
use crate::scope::Scope;
use crate::statement::invoke;
use crate::types::{Fault, Payload, Value};

/// Upper bound on resolution passes for one literal.
const MAX_PASSES: usize = 64;

/// Evaluate a string literal in `scope`.
pub fn interpolate(text: &str, scope: &Scope) -> Result<Value, Fault> {
    resolve(text, scope, MAX_PASSES)
}

fn resolve(text: &str, scope: &Scope, budget: usize) -> Result<Value, Fault> {
    if budget == 0 {
        tracing::trace!(text, "interpolation pass budget exhausted");
        return Ok(Value::string(text));
    }
    if let Some(reference) = sole_reference(text) {
        return match scope.get(reference) {
            Some(value) => follow(value, scope, budget),
            None => Ok(scope.get_or_nil(reference)),
        };
    }
    if let Some((name, args)) = sole_call(text) {
        if let Some(value) = call(name, args, scope, budget)? {
            return follow(value, scope, budget);
        }
    }
    let (substituted, used) = substitute(text, scope, budget)?;
    if used.is_empty() {
        return Ok(Value::string(text));
    }
    tracing::trace!(from = text, to = %substituted, "interpolated");
    let next = resolve(&substituted, scope, budget - 1)?;
    let history = provenance(&used).concat(next.history());
    Ok(next.replace_history(history))
}

/// A resolved string may itself hold references; keep resolving it, and
/// keep the original value when that changes nothing.
fn follow(value: Value, scope: &Scope, budget: usize) -> Result<Value, Fault> {
    let Payload::String(s) = value.raw() else {
        return Ok(value);
    };
    if !s.contains('{') && !s.contains('(') {
        return Ok(value);
    }
    let resolved = resolve(s, scope, budget - 1)?;
    if resolved.history().is_empty() && resolved.raw() == value.raw() {
        return Ok(value);
    }
    let history = History::of(Event::value(value)).concat(resolved.history());
    Ok(resolved.replace_history(history))
}

/// Events describing the values substituted into a string.
fn provenance(used: &[Value]) -> History {
    let mut history = History::new();
    for value in used {
        if value.path().is_empty() {
            history.extend(value.history());
        } else {
            history.push(Event::value(value.clone()));
        }
    }
    history
}

/// One left-to-right pass replacing every resolvable `{ref}` and known
/// call with its text. Returns the new text and the values used.
fn substitute(text: &str, scope: &Scope, budget: usize) -> Result<(String, Vec<Value>), Fault> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut used = Vec::new();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'{' {
            let Some(close) = bytes[i..].iter().position(|&c| c == b'}').map(|p| p + i) else {
                break;
            };
            // innermost span: the last opening brace before the close
            let open = bytes[i..close]
                .iter()
                .rposition(|&c| c == b'{')
                .map_or(i, |p| p + i);
            let reference = text[open + 1..close].trim();
            if !reference.is_empty() {
                match scope.get(reference).filter(is_textual) {
                    Some(value) => {
                        out.push_str(&text[copied..open]);
                        out.push_str(&value.display());
                        used.push(value);
                        copied = close + 1;
                    }
                    None => tracing::trace!(reference, "reference left unresolved"),
                }
            }
            i = close + 1;
            continue;
        }
        if is_ident_start(b) && (i == 0 || !is_ident(bytes[i - 1])) {
            let name_end = ident_end(bytes, i);
            if bytes.get(name_end) == Some(&b'(') {
                if let Some(close) = matching_paren(bytes, name_end) {
                    let name = &text[i..name_end];
                    if is_callable(name, scope) {
                        if let Some(value) = call(name, &text[name_end + 1..close], scope, budget)? {
                            if is_textual(&value) {
                                out.push_str(&text[copied..i]);
                                out.push_str(&value.display());
                                used.push(value);
                                copied = close + 1;
                                i = close + 1;
                                continue;
                            }
                        }
                    }
                }
            }
            i = name_end;
            continue;
        }
        i += 1;
    }
    out.push_str(&text[copied..]);
    Ok((out, used))
}

fn is_textual(value: &Value) -> bool {
    matches!(
        value.raw(),
        Payload::String(_) | Payload::Decimal(_) | Payload::Bool(_)
    )
}

fn is_callable(name: &str, scope: &Scope) -> bool {
    scope.method(name).is_some() || scope.registry().is_builtin(name)
}

/// Evaluate `name(args)`. `None` when the name is neither a method nor a
/// built-in, in which case the text stays literal.
fn call(name: &str, args: &str, scope: &Scope, budget: usize) -> Result<Option<Value>, Fault> {
    if let Some(method) = scope.method(name) {
        let args = eval_args(args, scope, budget)?;
        let value = invoke(&method, scope, args)
            .map_err(|f| f.context(format!("failed to call method {name:?}")))?;
        return Ok(Some(value.unwrap_or_else(Value::nil)));
    }
    if scope.registry().is_builtin(name) {
        let args = eval_args(args, scope, budget)?;
        let raw = scope.registry().call_builtin(name, &args)?;
        return Ok(Some(Value::of(&raw, Path::new(), provenance(&args))));
    }
    Ok(None)
}

fn eval_args(args: &str, scope: &Scope, budget: usize) -> Result<Vec<Value>, Fault> {
    split_args(args)
        .into_iter()
        .map(|arg| match unquote(arg) {
            Some(text) => Ok(Value::string(text)),
            None => resolve(arg, scope, budget - 1),
        })
        .collect()
}

/// Split on top-level commas outside quotes, trimming each argument.
fn split_args(args: &str) -> Vec<&str> {
    if args.trim().is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '{' => depth += 1,
            ')' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(args[start..].trim());
    out
}

fn unquote(arg: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            return Some(&arg[1..arg.len() - 1]);
        }
    }
    None
}

/// `{ref}` spanning the whole text.
fn sole_reference(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    if inner.trim().is_empty() || inner.contains(['{', '}']) {
        return None;
    }
    Some(inner.trim())
}

/// `name(args)` spanning the whole text.
fn sole_call(text: &str) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    if !bytes.first().copied().is_some_and(is_ident_start) {
        return None;
    }
    let name_end = ident_end(bytes, 0);
    if bytes.get(name_end) != Some(&b'(') {
        return None;
    }
    let close = matching_paren(bytes, name_end)?;
    if close != bytes.len() - 1 {
        return None;
    }
    Some((&text[..name_end], &text[name_end + 1..close]))
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| !is_ident(b))
        .map_or(bytes.len(), |p| p + start)
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
