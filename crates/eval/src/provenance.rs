//! Provenance: origin paths, explanation events and rendered text.
//!
//! Every [`Value`] carries a [`Path`] (where it was read from) and a
//! [`History`] (the events that explain how it was derived). Events render
//! to a [`Text`] tree, so an explanation reads as
//! "X is true because Y is greater than Z because ...".

use std::fmt;
use std::sync::Arc;

use crate::types::Value;

/// Indentation used for each nested "because" level.
pub const INDENT: &str = "    ";

// ──────────────────────────────────────────────
// Path
// ──────────────────────────────────────────────

/// Human-readable origin of a value, nearest segment first.
///
/// Renders as the segments joined with `" of "`, e.g.
/// `confidentiality of technical asset 'web'`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new() -> Self {
        Path(Vec::new())
    }

    /// A path made of a single outermost segment.
    pub fn root(segment: impl Into<String>) -> Self {
        Path(vec![segment.into()])
    }

    /// A copy of this path with `segment` added as the nearest segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(segment.into());
        segments.extend(self.0.iter().cloned());
        Path(segments)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" of "))
    }
}

// ──────────────────────────────────────────────
// Text
// ──────────────────────────────────────────────

/// One rendered line plus the lines that justify it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextItem {
    pub line: String,
    pub because: Text,
}

/// A tree of explanation lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text(Vec<TextItem>);

impl Text {
    pub fn new() -> Self {
        Text(Vec::new())
    }

    pub fn line(line: impl Into<String>) -> Self {
        let mut text = Text::new();
        text.push(line, Text::new());
        text
    }

    pub fn push(&mut self, line: impl Into<String>, because: Text) {
        self.0.push(TextItem {
            line: line.into(),
            because,
        });
    }

    pub fn append(&mut self, other: Text) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn items(&self) -> &[TextItem] {
        &self.0
    }

    /// Flatten to display lines. An item with a justification ends in
    /// `" because"` and its sub-lines follow, indented one level.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for item in &self.0 {
            render_item(item, &mut out);
        }
        out
    }
}

fn render_item(item: &TextItem, out: &mut Vec<String>) {
    if item.because.is_empty() {
        out.push(item.line.clone());
        return;
    }
    out.push(format!("{} because", item.line));
    for line in item.because.lines() {
        out.push(format!("{INDENT}{line}"));
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}

// ──────────────────────────────────────────────
// Events
// ──────────────────────────────────────────────

/// What an explanation node asserts.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Equal(Value, Value),
    NotEqual(Value, Value),
    Greater(Value, Value),
    Less(Value, Value),
    GreaterOrEqual(Value, Value),
    LessOrEqual(Value, Value),
    /// Collection, then the item found in it.
    Contain(Value, Value),
    True(Value),
    False(Value),
    /// Free text produced by an `explain` statement.
    Explain(String),
    /// Delegates to the value's description.
    Value(Value),
}

/// An explanation node.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    negated: bool,
    history: History,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Event {
            kind,
            negated: false,
            history: History::new(),
        }
    }

    pub fn equal(first: Value, second: Value) -> Self {
        Event::new(EventKind::Equal(first, second))
    }

    pub fn not_equal(first: Value, second: Value) -> Self {
        Event::new(EventKind::NotEqual(first, second))
    }

    pub fn greater(first: Value, second: Value) -> Self {
        Event::new(EventKind::Greater(first, second))
    }

    pub fn less(first: Value, second: Value) -> Self {
        Event::new(EventKind::Less(first, second))
    }

    pub fn contain(collection: Value, item: Value) -> Self {
        Event::new(EventKind::Contain(collection, item))
    }

    pub fn explain(text: impl Into<String>) -> Self {
        Event::new(EventKind::Explain(text.into()))
    }

    pub fn value(value: Value) -> Self {
        Event::new(EventKind::Value(value))
    }

    /// Attach the sub-events that justify this one.
    pub fn because(mut self, history: History) -> Self {
        self.history.extend(&history);
        self
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Sub-events justifying this event.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Toggle the displayed polarity. Explain and value events have no
    /// polarity and come back unchanged.
    pub fn negate(&self) -> Event {
        let mut event = self.clone();
        if !matches!(self.kind, EventKind::Explain(_) | EventKind::Value(_)) {
            event.negated = !event.negated;
        }
        event
    }

    pub fn text(&self) -> Text {
        let own = self.history.text();
        let mut text = match &self.kind {
            EventKind::Equal(a, b)
            | EventKind::NotEqual(a, b)
            | EventKind::Greater(a, b)
            | EventKind::Less(a, b)
            | EventKind::GreaterOrEqual(a, b)
            | EventKind::LessOrEqual(a, b)
            | EventKind::Contain(a, b) => two_value_text(a, self.verb(), b),
            EventKind::True(v) | EventKind::False(v) => one_value_text(v, self.verb()),
            EventKind::Explain(text) => {
                let mut out = Text::new();
                for line in text.lines() {
                    out.push(line, Text::new());
                }
                out
            }
            EventKind::Value(v) => v.description(),
        };
        if !own.is_empty() {
            attach(&mut text, own);
        }
        text
    }

    fn verb(&self) -> &'static str {
        let (plain, negated) = match &self.kind {
            EventKind::Equal(..) => ("is equal to", "is not equal to"),
            EventKind::NotEqual(..) => ("is not equal to", "is equal to"),
            EventKind::Greater(..) => ("is greater than", "is not greater than"),
            EventKind::Less(..) => ("is less than", "is not less than"),
            EventKind::GreaterOrEqual(..) => (
                "is greater than or equal to",
                "is not greater than or equal to",
            ),
            EventKind::LessOrEqual(..) => {
                ("is less than or equal to", "is not less than or equal to")
            }
            EventKind::Contain(..) => ("contains", "does not contain"),
            EventKind::True(_) => ("is true", "is not true"),
            EventKind::False(_) => ("is false", "is not false"),
            EventKind::Explain(_) | EventKind::Value(_) => ("", ""),
        };
        if self.negated {
            negated
        } else {
            plain
        }
    }
}

/// Hang `because` under the last line of `text`, or use it as the whole
/// text when there is no line of its own.
fn attach(text: &mut Text, because: Text) {
    match text.0.last_mut() {
        Some(last) => last.because.append(because),
        None => *text = because,
    }
}

fn is_silent(value: &Value) -> bool {
    value.path().is_empty() && value.history().is_empty()
}

fn one_value_text(value: &Value, verb: &str) -> Text {
    if is_silent(value) {
        return Text::new();
    }
    let lines = value.text().lines();
    let mut text = Text::new();
    match lines.as_slice() {
        [] => text.push(format!("(empty) {verb}"), Text::new()),
        [only] => text.push(format!("{only} {verb}"), Text::new()),
        [init @ .., last] => {
            for line in init {
                text.push(line.clone(), Text::new());
            }
            text.push(format!("{last} {verb}"), Text::new());
        }
    }
    attach(&mut text, value.history().text());
    text
}

fn two_value_text(first: &Value, verb: &str, second: &Value) -> Text {
    if is_silent(first) && is_silent(second) {
        return Text::new();
    }
    let left = value_lines(first);
    let right = value_lines(second);
    let mut text = Text::new();
    match (left.as_slice(), right.as_slice()) {
        ([l], [r]) => text.push(format!("{l} {verb} {r}"), Text::new()),
        _ => {
            let (head, tail) = left.split_at(left.len().saturating_sub(1));
            for line in head {
                text.push(line.clone(), Text::new());
            }
            let joint = tail.first().map(String::as_str).unwrap_or("(empty)");
            text.push(format!("{joint} {verb}"), Text::new());
            for line in right {
                text.push(format!("{INDENT}{line}"), Text::new());
            }
        }
    }
    let mut because = first.history().text();
    because.append(second.history().text());
    attach(&mut text, because);
    text
}

fn value_lines(value: &Value) -> Vec<String> {
    let lines = value.text().lines();
    if lines.is_empty() {
        vec!["(empty)".to_string()]
    } else {
        lines
    }
}

// ──────────────────────────────────────────────
// History
// ──────────────────────────────────────────────

/// Ordered sequence of events explaining a value or a decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History(Vec<Arc<Event>>);

impl History {
    pub fn new() -> Self {
        History(Vec::new())
    }

    pub fn of(event: Event) -> Self {
        History(vec![Arc::new(event)])
    }

    pub fn push(&mut self, event: Event) {
        self.0.push(Arc::new(event));
    }

    pub fn extend(&mut self, other: &History) {
        self.0.extend(other.0.iter().cloned());
    }

    /// This history followed by `other`.
    pub fn concat(&self, other: &History) -> History {
        let mut out = self.clone();
        out.extend(other);
        out
    }

    /// This history followed by the events of `other` it does not
    /// already share.
    pub fn merge(&self, other: &History) -> History {
        let mut out = self.clone();
        for event in &other.0 {
            if !self.0.iter().any(|e| Arc::ptr_eq(e, event)) {
                out.0.push(Arc::clone(event));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.0.iter().map(|e| e.as_ref())
    }

    /// Every event with its polarity toggled.
    pub fn negate(&self) -> History {
        History(self.iter().map(|e| Arc::new(e.negate())).collect())
    }

    pub fn text(&self) -> Text {
        let mut text = Text::new();
        for event in self.iter() {
            text.append(event.text());
        }
        text
    }
}

impl FromIterator<Event> for History {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        History(iter.into_iter().map(Arc::new).collect())
    }
}
