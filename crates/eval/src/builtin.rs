//! Cast and built-in function registry.
//!
//! A [`Registry`] is assembled once, before evaluation starts, and then
//! shared read-only by every scope through an `Arc`. The standard
//! registry covers the domain scales and `calculate_severity`; hosts
//! that need more start from [`Registry::with_standard`], register their
//! additions and hand the result to [`crate::Scope::with_registry`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::scales::{self, Scale};
use crate::types::{Payload, ScriptError, Value, ValueKind};

/// Coerces a value into a named type.
pub type CastFn = Arc<dyn Fn(&Value) -> Result<Value, ScriptError> + Send + Sync>;

/// A built-in function: receives the registry (for casting) and its
/// arguments, returns a plain datum.
pub type BuiltinFn =
    Arc<dyn Fn(&Registry, &[Value]) -> Result<serde_json::Value, ScriptError> + Send + Sync>;

#[derive(Clone)]
struct Builtin {
    arity: usize,
    call: BuiltinFn,
}

/// Name-keyed cast and built-in tables. Names are case-insensitive.
#[derive(Clone, Default)]
pub struct Registry {
    casts: BTreeMap<String, CastFn>,
    builtins: BTreeMap<String, Builtin>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("casts", &self.casts.keys().collect::<Vec<_>>())
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// A registry with no casts and no built-ins.
    pub fn empty() -> Self {
        Registry::default()
    }

    /// A fresh, extendable copy of the standard tables.
    pub fn with_standard() -> Self {
        let mut registry = Registry::empty();
        registry.register_scale("authentication", &scales::AUTHENTICATION);
        registry.register_scale("authorization", &scales::AUTHORIZATION);
        registry.register_scale("confidentiality", &scales::CONFIDENTIALITY);
        registry.register_scale("criticality", &scales::CRITICALITY);
        registry.register_scale("integrity", &scales::CRITICALITY);
        registry.register_scale("availability", &scales::CRITICALITY);
        registry.register_scale("probability", &scales::PROBABILITY);
        registry.register_scale("encryption", &scales::ENCRYPTION);
        registry.register_scale("quantity", &scales::QUANTITY);
        registry.register_scale("impact", &scales::IMPACT);
        registry.register_scale("likelihood", &scales::LIKELIHOOD);
        registry.register_scale("size", &scales::SIZE);
        registry.register_scale("severity", &scales::SEVERITY);
        registry.register_builtin("calculate_severity", 2, Arc::new(calculate_severity));
        registry
    }

    /// The process-wide standard registry, built on first use.
    pub fn standard() -> Arc<Registry> {
        static STANDARD: OnceLock<Arc<Registry>> = OnceLock::new();
        STANDARD
            .get_or_init(|| Arc::new(Registry::with_standard()))
            .clone()
    }

    pub fn register_cast(&mut self, name: &str, cast: CastFn) {
        self.casts.insert(name.to_lowercase(), cast);
    }

    /// Register a cast that maps enumeration names to their ordinal.
    pub fn register_scale(&mut self, name: &str, scale: &'static Scale) {
        self.register_cast(name, Arc::new(move |value: &Value| cast_to_scale(scale, value)));
    }

    pub fn register_builtin(&mut self, name: &str, arity: usize, call: BuiltinFn) {
        self.builtins
            .insert(name.to_lowercase(), Builtin { arity, call });
    }

    pub fn has_cast(&self, name: &str) -> bool {
        self.casts.contains_key(&name.to_lowercase())
    }

    /// Coerce `value` into the named type. The result keeps the
    /// value's path and history.
    pub fn cast(&self, value: &Value, type_name: &str) -> Result<Value, ScriptError> {
        let cast = self
            .casts
            .get(&type_name.to_lowercase())
            .ok_or_else(|| ScriptError::UnknownCastType {
                name: type_name.to_string(),
            })?;
        cast(value)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(&name.to_lowercase())
    }

    pub fn call_builtin(&self, name: &str, args: &[Value]) -> Result<serde_json::Value, ScriptError> {
        let builtin = self
            .builtins
            .get(&name.to_lowercase())
            .ok_or_else(|| ScriptError::Builtin {
                name: name.to_string(),
                message: "no such built-in".to_string(),
            })?;
        if builtin.arity != args.len() {
            return Err(ScriptError::ArityMismatch {
                name: name.to_string(),
                expected: builtin.arity,
                actual: args.len(),
            });
        }
        (builtin.call)(self, args)
    }
}

fn cast_to_scale(scale: &Scale, value: &Value) -> Result<Value, ScriptError> {
    let payload = match value.raw() {
        Payload::String(s) => {
            let ordinal = scale
                .ordinal(s)
                .ok_or_else(|| ScriptError::InvalidEnumValue {
                    scale: scale.name.to_string(),
                    value: s.clone(),
                })?;
            Payload::Decimal(Decimal::from(ordinal))
        }
        Payload::Decimal(d) => Payload::Decimal(*d),
        Payload::Array(items) => Payload::Array(
            items
                .iter()
                .map(|item| cast_to_scale(scale, item))
                .collect::<Result<_, _>>()?,
        ),
        Payload::Any(serde_json::Value::Null) => return Ok(value.clone()),
        _ => {
            return Err(ScriptError::TypeMismatch {
                expected: ValueKind::String,
                actual: value.kind(),
            })
        }
    };
    Ok(Value::new(payload, value.path().clone(), value.history().clone()))
}

fn calculate_severity(registry: &Registry, args: &[Value]) -> Result<serde_json::Value, ScriptError> {
    let likelihood = ordinal_arg(registry, &args[0], "likelihood")?;
    let impact = ordinal_arg(registry, &args[1], "impact")?;
    scales::calculate_severity(likelihood, impact)
        .map(|s| serde_json::Value::String(s.to_string()))
        .ok_or_else(|| ScriptError::Builtin {
            name: "calculate_severity".to_string(),
            message: format!("no severity for likelihood #{likelihood} and impact #{impact}"),
        })
}

fn ordinal_arg(registry: &Registry, arg: &Value, scale: &str) -> Result<usize, ScriptError> {
    let cast = registry
        .cast(arg, scale)
        .map_err(|e| e.context(format!("calculate_severity {scale}")))?;
    let d = cast.to_decimal()?;
    d.to_usize().ok_or_else(|| ScriptError::InvalidEnumValue {
        scale: scale.to_string(),
        value: d.to_string(),
    })
}
