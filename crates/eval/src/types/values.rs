//! Runtime values and generic-tree conversion helpers.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{ScriptError, ValueKind};
use crate::provenance::{History, Path, Text, INDENT};

// ──────────────────────────────────────────────
// Runtime values
// ──────────────────────────────────────────────

/// Typed payload of a [`Value`].
/// All numeric values use `rust_decimal::Decimal`, never `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Array(Vec<Value>),
    Bool(bool),
    Decimal(Decimal),
    String(String),
    /// Opaque datum: maps, and `null` for Nil.
    Any(serde_json::Value),
}

/// The universal runtime datum: a payload, where it came from, and how
/// it was derived. Values are immutable; every transformation builds a
/// new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    payload: Payload,
    path: Path,
    history: History,
}

impl Value {
    pub fn new(payload: Payload, path: Path, history: History) -> Self {
        Value {
            payload,
            path,
            history,
        }
    }

    pub fn nil() -> Self {
        Value::from_payload(Payload::Any(serde_json::Value::Null))
    }

    pub fn bool(b: bool) -> Self {
        Value::from_payload(Payload::Bool(b))
    }

    pub fn decimal(d: Decimal) -> Self {
        Value::from_payload(Payload::Decimal(d))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::from_payload(Payload::String(s.into()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::from_payload(Payload::Array(items))
    }

    fn from_payload(payload: Payload) -> Self {
        Value::new(payload, Path::new(), History::new())
    }

    /// Wrap a raw datum, dispatching on its shape. Numbers become
    /// decimals, arrays wrap each element, maps and `null` stay opaque.
    pub fn of(raw: &serde_json::Value, path: Path, history: History) -> Self {
        let payload = match raw {
            serde_json::Value::Bool(b) => Payload::Bool(*b),
            serde_json::Value::String(s) => Payload::String(s.clone()),
            serde_json::Value::Number(n) => match number_to_decimal(n) {
                Some(d) => Payload::Decimal(d),
                None => Payload::Any(raw.clone()),
            },
            serde_json::Value::Array(items) => Payload::Array(
                items
                    .iter()
                    .map(|item| Value::of(item, Path::new(), History::new()))
                    .collect(),
            ),
            serde_json::Value::Null | serde_json::Value::Object(_) => Payload::Any(raw.clone()),
        };
        Value::new(payload, path, history)
    }

    /// Re-path: same payload, new path, own history followed by `extra`.
    pub fn repath(&self, path: Path, extra: &History) -> Self {
        Value::new(self.payload.clone(), path, self.history.concat(extra))
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    /// Append events to this value's history.
    pub fn with_history(mut self, history: History) -> Self {
        self.history.extend(&history);
        self
    }

    /// Replace this value's history.
    pub fn replace_history(mut self, history: History) -> Self {
        self.history = history;
        self
    }

    pub fn raw(&self) -> &Payload {
        &self.payload
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn kind(&self) -> ValueKind {
        match &self.payload {
            Payload::Array(_) => ValueKind::Array,
            Payload::Bool(_) => ValueKind::Bool,
            Payload::Decimal(_) => ValueKind::Decimal,
            Payload::String(_) => ValueKind::String,
            Payload::Any(serde_json::Value::Null) => ValueKind::Nil,
            Payload::Any(_) => ValueKind::Any,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.payload, Payload::Any(serde_json::Value::Null))
    }

    /// True for Nil and the empty instance of every kind.
    pub fn is_empty(&self) -> bool {
        match &self.payload {
            Payload::Array(items) => items.is_empty(),
            Payload::Bool(b) => !b,
            Payload::Decimal(d) => d.is_zero(),
            Payload::String(s) => s.is_empty(),
            Payload::Any(serde_json::Value::Null) => true,
            Payload::Any(serde_json::Value::Object(map)) => map.is_empty(),
            Payload::Any(_) => false,
        }
    }

    pub fn to_array(&self) -> Result<&[Value], ScriptError> {
        match &self.payload {
            Payload::Array(items) => Ok(items),
            _ => Err(self.mismatch(ValueKind::Array)),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ScriptError> {
        match &self.payload {
            Payload::Bool(b) => Ok(*b),
            _ => Err(self.mismatch(ValueKind::Bool)),
        }
    }

    pub fn to_decimal(&self) -> Result<Decimal, ScriptError> {
        match &self.payload {
            Payload::Decimal(d) => Ok(*d),
            _ => Err(self.mismatch(ValueKind::Decimal)),
        }
    }

    pub fn to_str(&self) -> Result<&str, ScriptError> {
        match &self.payload {
            Payload::String(s) => Ok(s),
            _ => Err(self.mismatch(ValueKind::String)),
        }
    }

    fn mismatch(&self, expected: ValueKind) -> ScriptError {
        ScriptError::TypeMismatch {
            expected,
            actual: self.kind(),
        }
    }

    /// Strip path and history, returning the raw datum.
    pub fn plain(&self) -> serde_json::Value {
        match &self.payload {
            Payload::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::plain).collect())
            }
            Payload::Bool(b) => serde_json::Value::Bool(*b),
            Payload::Decimal(d) => decimal_to_json(*d),
            Payload::String(s) => serde_json::Value::String(s.clone()),
            Payload::Any(raw) => raw.clone(),
        }
    }

    /// Short text: the path when there is one, otherwise the literal.
    pub fn text(&self) -> Text {
        if self.path.is_empty() {
            self.literal_text()
        } else {
            Text::line(self.path.to_string())
        }
    }

    /// The payload rendered as lines, ignoring the path.
    pub fn literal_text(&self) -> Text {
        let mut text = Text::new();
        for line in self.literal_lines() {
            text.push(line, Text::new());
        }
        text
    }

    /// Plain rendering used for interpolation and explanations.
    pub fn display(&self) -> String {
        match &self.payload {
            Payload::String(s) => s.clone(),
            _ => self.literal_lines().join("\n"),
        }
    }

    fn literal_lines(&self) -> Vec<String> {
        match &self.payload {
            Payload::String(s) => s.lines().map(str::to_string).collect(),
            Payload::Bool(b) => vec![b.to_string()],
            Payload::Decimal(d) => vec![d.normalize().to_string()],
            Payload::Array(items) => items
                .iter()
                .flat_map(|item| {
                    let lines = item.literal_lines();
                    let mut out = Vec::with_capacity(lines.len());
                    for (n, line) in lines.into_iter().enumerate() {
                        if n == 0 {
                            out.push(format!("- {line}"));
                        } else {
                            out.push(format!("  {line}"));
                        }
                    }
                    out
                })
                .collect(),
            Payload::Any(serde_json::Value::Null) => vec!["nil".to_string()],
            Payload::Any(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", compact(v)))
                .collect(),
            Payload::Any(other) => vec![compact(other)],
        }
    }

    /// Path plus rendered value; the full history when there is no path.
    pub fn description(&self) -> Text {
        if self.path.is_empty() {
            return self.history.text();
        }
        let path = self.path.to_string();
        let mut text = Text::new();
        match &self.payload {
            Payload::String(s) if s.is_empty() => text.push(format!("{path} is (empty)"), Text::new()),
            Payload::String(s) if !s.contains('\n') => {
                text.push(format!("{path} is \"{s}\""), Text::new())
            }
            _ if self.is_nil() || (self.kind() == ValueKind::Array && self.is_empty()) => {
                text.push(format!("{path} is (empty)"), Text::new())
            }
            Payload::Bool(_) | Payload::Decimal(_) => {
                text.push(format!("{path} is {}", self.display()), Text::new())
            }
            _ => {
                text.push(format!("{path} is:"), Text::new());
                for line in self.literal_lines() {
                    text.push(format!("{INDENT}{line}"), Text::new());
                }
            }
        }
        text
    }
}

// ──────────────────────────────────────────────
// Generic tree helpers
// ──────────────────────────────────────────────

/// Convert a tree number to a decimal through its textual form, so
/// `1.10` stays exact.
pub fn number_to_decimal(n: &serde_json::Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Convert a decimal back to a tree number. Integral values stay integers.
pub fn decimal_to_json(d: Decimal) -> serde_json::Value {
    let d = d.normalize();
    if d.scale() == 0 {
        if let Some(i) = d.to_i64() {
            return serde_json::Value::from(i);
        }
    }
    serde_json::Number::from_str(&d.to_string())
        .map(serde_json::Value::Number)
        .unwrap_or_else(|_| serde_json::Value::String(d.to_string()))
}

/// Case-insensitive field lookup: exact key first, then any key that
/// matches ignoring ASCII case.
pub fn get_field<'a>(map: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    match map {
        serde_json::Value::Object(obj) => obj.get(key).or_else(|| {
            obj.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        }),
        serde_json::Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn compact(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::Event;
    use serde_json::json;

    #[test]
    fn numbers_normalize_to_decimal() {
        let v = Value::of(&json!(3), Path::new(), History::new());
        assert_eq!(v.to_decimal().unwrap(), Decimal::from(3));
        let v = Value::of(&json!(1.25), Path::new(), History::new());
        assert_eq!(v.to_decimal().unwrap(), Decimal::from_str("1.25").unwrap());
        let v = Value::of(&json!(u64::MAX), Path::new(), History::new());
        assert_eq!(v.kind(), ValueKind::Decimal);
    }

    #[test]
    fn arrays_wrap_each_element() {
        let v = Value::of(&json!(["a", true, 2]), Path::root("tags"), History::new());
        let items = v.to_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].to_str().unwrap(), "a");
        assert!(items[1].to_bool().unwrap());
        assert_eq!(v.plain(), json!(["a", true, 2]));
    }

    #[test]
    fn maps_and_null_are_opaque() {
        let v = Value::of(&json!({"id": "x"}), Path::new(), History::new());
        assert_eq!(v.kind(), ValueKind::Any);
        let nil = Value::of(&json!(null), Path::new(), History::new());
        assert!(nil.is_nil());
        assert!(nil.is_empty());
        assert_eq!(nil.kind(), ValueKind::Nil);
    }

    #[test]
    fn conversions_report_expected_and_actual() {
        let v = Value::string("yes");
        assert_eq!(
            v.to_bool().unwrap_err(),
            ScriptError::TypeMismatch {
                expected: ValueKind::Bool,
                actual: ValueKind::String,
            }
        );
        assert!(Value::nil().to_array().is_err());
    }

    #[test]
    fn repath_concatenates_history() {
        let original = Value::string("internal")
            .with_history(History::of(Event::explain("first")));
        let extra = History::of(Event::explain("second"));
        let moved = original.repath(Path::root("confidentiality"), &extra);
        assert_eq!(moved.path().to_string(), "confidentiality");
        assert_eq!(moved.history().text().lines(), vec!["first", "second"]);
        assert_eq!(moved.plain(), json!("internal"));
    }

    #[test]
    fn text_prefers_path_over_literal() {
        let v = Value::string("public");
        assert_eq!(v.text().to_string(), "public");
        let v = v.with_path(Path::root("technical asset 'db'").child("confidentiality"));
        assert_eq!(
            v.text().to_string(),
            "confidentiality of technical asset 'db'"
        );
    }

    #[test]
    fn description_renders_by_kind() {
        let p = Path::root("x");
        assert_eq!(
            Value::string("a").with_path(p.clone()).description().to_string(),
            "x is \"a\""
        );
        assert_eq!(
            Value::string("").with_path(p.clone()).description().to_string(),
            "x is (empty)"
        );
        assert_eq!(
            Value::bool(true).with_path(p.clone()).description().to_string(),
            "x is true"
        );
        assert_eq!(
            Value::array(vec![]).with_path(p.clone()).description().to_string(),
            "x is (empty)"
        );
        let list = Value::array(vec![Value::string("a"), Value::string("b")]).with_path(p);
        assert_eq!(
            list.description().lines(),
            vec!["x is:".to_string(), format!("{INDENT}- a"), format!("{INDENT}- b")]
        );
    }

    #[test]
    fn description_without_path_is_history() {
        let v = Value::bool(true).with_history(History::of(Event::explain("reason")));
        assert_eq!(v.description().lines(), vec!["reason"]);
    }

    #[test]
    fn decimal_json_keeps_integers_integral() {
        assert_eq!(decimal_to_json(Decimal::from_str("4.00").unwrap()), json!(4));
        assert_eq!(decimal_to_json(Decimal::from_str("2.5").unwrap()), json!(2.5));
    }

    #[test]
    fn field_lookup_ignores_case() {
        let map = json!({"Confidentiality": "public", "tags": ["a", "b"]});
        assert_eq!(get_field(&map, "confidentiality"), Some(&json!("public")));
        assert_eq!(get_field(&map, "TAGS"), Some(&json!(["a", "b"])));
        let tags = get_field(&map, "tags").unwrap();
        assert_eq!(get_field(tags, "1"), Some(&json!("b")));
        assert_eq!(get_field(&map, "missing"), None);
    }
}
