//! Parsed rule trees.
//!
//! Nodes are built once by [`crate::parse`] and evaluated many times.
//! Every node keeps its source fragment (`literal`) for error reporting.

use std::sync::Arc;

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub literal: String,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// Scalar data; strings are interpolated at evaluation time.
    Value(serde_json::Value),
    Array(Vec<Expression>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    True(Box<Expression>),
    False(Box<Expression>),
    Quantifier(Quantifier),
    Contain(Containment),
    Compare(Comparison),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierOp {
    All,
    Any,
    Count,
}

/// `all` / `any` / `count` over a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantifier {
    pub op: QuantifierOp,
    pub collection: Box<Expression>,
    pub item: Option<String>,
    pub index: Option<String>,
    pub predicate: Option<Box<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Containment {
    pub item: Box<Expression>,
    pub collection: Box<Expression>,
    pub as_type: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
    EqualOrGreater,
    EqualOrLess,
}

impl CompareOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            CompareOp::Equal => "equal",
            CompareOp::NotEqual => "not-equal",
            CompareOp::Greater => "greater",
            CompareOp::Less => "less",
            CompareOp::EqualOrGreater => "equal-or-greater",
            CompareOp::EqualOrLess => "equal-or-less",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub first: Box<Expression>,
    pub second: Box<Expression>,
    pub as_type: Option<Box<Expression>>,
}

// ──────────────────────────────────────────────
// Statements
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub literal: String,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    List(Vec<Statement>),
    /// Assignments in source order.
    Assign(Vec<(String, Expression)>),
    If {
        condition: Expression,
        then: Option<Box<Statement>>,
        otherwise: Option<Box<Statement>>,
    },
    Loop {
        collection: Expression,
        item: Option<String>,
        index: Option<String>,
        body: Option<Box<Statement>>,
    },
    Return(Option<Expression>),
    /// Shared with the scope's deferred queue when registered.
    Defer(Vec<Arc<Statement>>),
    Explain(Arc<Expression>),
}

/// A named, parameterized statement body.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub literal: String,
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Option<Statement>,
}
