//! Evaluation environment.
//!
//! A [`Scope`] holds the variables and control state of one evaluation,
//! plus shared read-only snapshots of the bound model and risk category.
//! Method calls run in [`Scope::clone_for_call`]: variables are copied,
//! everything bound is shared, and call-local state starts empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::builtin::Registry;
use crate::provenance::{History, Path};
use crate::types::values::get_field;
use crate::types::{EvalConfig, Expression, Method, Payload, ScriptError, Statement, Value};

/// Path prefix for the bound model.
pub const MODEL_PREFIX: &str = "$model";
/// Path prefix for the bound risk category.
pub const RISK_PREFIX: &str = "$risk";

#[derive(Debug, Clone)]
pub struct Scope {
    variables: BTreeMap<String, Value>,
    item: Option<Value>,
    args: Vec<Value>,
    call_stack: Vec<History>,
    deferred: Vec<Arc<Statement>>,
    explain: Option<Arc<Expression>>,
    return_value: Option<Value>,
    has_returned: bool,
    last_condition: Option<Value>,
    depth: usize,
    methods: Arc<BTreeMap<String, Arc<Method>>>,
    model: Arc<serde_json::Value>,
    category: Arc<serde_json::Value>,
    registry: Arc<Registry>,
    config: EvalConfig,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            variables: BTreeMap::new(),
            item: None,
            args: Vec::new(),
            call_stack: Vec::new(),
            deferred: Vec::new(),
            explain: None,
            return_value: None,
            has_returned: false,
            last_condition: None,
            depth: 0,
            methods: Arc::new(BTreeMap::new()),
            model: Arc::new(serde_json::Value::Object(Default::default())),
            category: Arc::new(serde_json::Value::Object(Default::default())),
            registry: Registry::standard(),
            config: EvalConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_methods(mut self, methods: Arc<BTreeMap<String, Arc<Method>>>) -> Self {
        self.methods = methods;
        self
    }

    // ── binding ──────────────────────────────────

    /// Flatten the domain model into the `$model.` namespace.
    pub fn bind_model<T: Serialize + ?Sized>(&mut self, model: &T) -> Result<(), ScriptError> {
        self.model = Arc::new(flatten("model", model)?);
        Ok(())
    }

    /// Flatten the risk category into the `$risk.` namespace.
    pub fn bind_category<T: Serialize + ?Sized>(&mut self, category: &T) -> Result<(), ScriptError> {
        self.category = Arc::new(flatten("risk category", category)?);
        Ok(())
    }

    /// Merge a computed risk record over the bound category.
    pub fn bind_risk_record(
        &mut self,
        record: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ScriptError> {
        let mut merged = match self.category.as_ref() {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (k, v) in record {
            merged.insert(k.clone(), v.clone());
        }
        self.category = Arc::new(serde_json::Value::Object(merged));
        Ok(())
    }

    pub fn model(&self) -> &serde_json::Value {
        &self.model
    }

    pub fn category(&self) -> &serde_json::Value {
        &self.category
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    // ── calls ────────────────────────────────────

    /// Scope for a method call: variables copied, bindings shared,
    /// call-local state reset.
    pub fn clone_for_call(&self) -> Scope {
        Scope {
            variables: self.variables.clone(),
            item: self.item.clone(),
            args: Vec::new(),
            call_stack: self.call_stack.clone(),
            deferred: Vec::new(),
            explain: None,
            return_value: None,
            has_returned: false,
            last_condition: None,
            depth: self.depth + 1,
            methods: Arc::clone(&self.methods),
            model: Arc::clone(&self.model),
            category: Arc::clone(&self.category),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }

    /// Number of method calls enclosing this scope.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(&name.to_lowercase()).cloned()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn set_args(&mut self, args: Vec<Value>) {
        self.args = args;
    }

    pub fn push_call(&mut self, history: History) {
        self.call_stack.push(history);
    }

    pub fn clear_call_stack(&mut self) {
        self.call_stack.clear();
    }

    /// The call stack flattened, followed by `extra`.
    pub fn history(&self, extra: History) -> History {
        let mut out = History::new();
        for frame in &self.call_stack {
            out.extend(frame);
        }
        out.extend(&extra);
        out
    }

    // ── control state ────────────────────────────

    pub fn defer(&mut self, statement: Arc<Statement>) {
        self.deferred.push(statement);
    }

    pub fn take_deferred(&mut self) -> Vec<Arc<Statement>> {
        std::mem::take(&mut self.deferred)
    }

    pub fn set_explain(&mut self, explain: Arc<Expression>) {
        self.explain = Some(explain);
    }

    pub fn take_explain(&mut self) -> Option<Arc<Expression>> {
        self.explain.take()
    }

    pub fn set_return(&mut self, value: Option<Value>) {
        if value.is_some() {
            self.return_value = value;
        }
        self.has_returned = true;
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    pub fn take_return(&mut self) -> Option<Value> {
        self.return_value.take()
    }

    pub fn has_returned(&self) -> bool {
        self.has_returned
    }

    pub fn reset_returned(&mut self) {
        self.has_returned = false;
    }

    pub fn record_condition(&mut self, value: Value) {
        self.last_condition = Some(value);
    }

    pub fn last_condition(&self) -> Option<&Value> {
        self.last_condition.as_ref()
    }

    // ── variables ────────────────────────────────

    pub fn set(&mut self, name: &str, value: Value) {
        self.variables.insert(name.trim().to_lowercase(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(&name.trim().to_lowercase())
    }

    pub fn item(&self) -> Option<&Value> {
        self.item.as_ref()
    }

    /// Replace the current item, returning the previous one.
    pub fn set_item(&mut self, item: Option<Value>) -> Option<Value> {
        std::mem::replace(&mut self.item, item)
    }

    /// Resolve a reference such as `x`, `x.field.sub`, `.field`,
    /// `$model.technical_assets` or `$risk.title`.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self.lookup(name) {
            Lookup::Found(value) => Some(value),
            Lookup::Missing(_) => None,
        }
    }

    /// Like [`Scope::get`], but a missing reference yields Nil carrying
    /// the path that was attempted.
    pub fn get_or_nil(&self, name: &str) -> Value {
        match self.lookup(name) {
            Lookup::Found(value) => value,
            Lookup::Missing(path) => Value::nil()
                .with_path(path)
                .with_history(self.history(History::new())),
        }
    }

    fn lookup(&self, name: &str) -> Lookup {
        let name = name.trim();
        let (head, rest) = match name.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name, None),
        };
        let head = head.to_lowercase();
        match head.as_str() {
            MODEL_PREFIX => self.walk_raw(&self.model, Path::root("threat model"), rest),
            RISK_PREFIX => self.walk_raw(&self.category, Path::root("risk category"), rest),
            "" => match &self.item {
                Some(item) => self.walk_value(item, rest),
                None => Lookup::Missing(Path::root(name)),
            },
            _ => {
                if let Some(var) = self.variables.get(&head) {
                    return self.walk_value(var, rest);
                }
                match &self.item {
                    Some(item) if has_field(item, &head) => self.walk_value(item, Some(name)),
                    _ => Lookup::Missing(Path::root(name)),
                }
            }
        }
    }

    fn walk_raw(&self, root: &serde_json::Value, path: Path, rest: Option<&str>) -> Lookup {
        let rest = rest.filter(|r| !r.is_empty());
        let Some(rest) = rest else {
            return Lookup::Found(Value::of(root, path, self.history(History::new())));
        };
        let path = path.child(rest);
        match descend(root, rest) {
            Some(raw) => Lookup::Found(Value::of(raw, path, self.history(History::new()))),
            None => Lookup::Missing(path),
        }
    }

    fn walk_value(&self, value: &Value, rest: Option<&str>) -> Lookup {
        let rest = rest.filter(|r| !r.is_empty());
        let Some(rest) = rest else {
            return Lookup::Found(value.clone());
        };
        let path = value.path().child(rest);
        let raw = match value.raw() {
            Payload::Any(raw) => descend(raw, rest).cloned(),
            Payload::Array(_) => descend(&value.plain(), rest).cloned(),
            _ => None,
        };
        match raw {
            Some(raw) => {
                let history = value.history().merge(&self.history(History::new()));
                Lookup::Found(Value::of(&raw, path, history))
            }
            None => Lookup::Missing(path),
        }
    }
}

enum Lookup {
    Found(Value),
    Missing(Path),
}

fn descend<'a>(root: &'a serde_json::Value, rest: &str) -> Option<&'a serde_json::Value> {
    rest.split('.')
        .try_fold(root, |current, segment| get_field(current, segment.trim()))
}

fn has_field(value: &Value, field: &str) -> bool {
    match value.raw() {
        Payload::Any(raw) => get_field(raw, field).is_some(),
        _ => false,
    }
}

fn flatten<T: Serialize + ?Sized>(target: &str, source: &T) -> Result<serde_json::Value, ScriptError> {
    let tree = serde_json::to_value(source).map_err(|e| ScriptError::Binding {
        target: target.to_string(),
        message: e.to_string(),
    })?;
    match tree {
        serde_json::Value::Object(_) => Ok(tree),
        other => Err(ScriptError::Binding {
            target: target.to_string(),
            message: format!("expected a map, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "map",
    }
}
