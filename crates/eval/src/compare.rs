//! Type-aware comparison producing explanation events.
//!
//! Comparison dispatches on the payload kinds of the (optionally cast)
//! operands. The returned event always references the original operands
//! so explanations show what the rule author wrote, not ordinals.

use crate::builtin::Registry;
use crate::provenance::{Event, EventKind};
use crate::types::{Payload, ScriptError, Value};

/// Outcome of comparing two payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// Compare two values without casting.
pub fn compare(first: &Value, second: &Value) -> Result<Event, ScriptError> {
    let relation = relate(first, second)?;
    Ok(event_for(relation, first, second))
}

/// Compare two values, casting both to `as_type` first when given.
pub fn compare_as(
    registry: &Registry,
    first: &Value,
    second: &Value,
    as_type: Option<&str>,
) -> Result<Event, ScriptError> {
    let relation = match as_type.filter(|t| !t.is_empty()) {
        Some(type_name) => {
            let a = registry.cast(first, type_name)?;
            let b = registry.cast(second, type_name)?;
            relate(&a, &b)?
        }
        None => relate(first, second)?,
    };
    Ok(event_for(relation, first, second))
}

pub fn is_same(event: &Event) -> bool {
    matches!(event.kind(), EventKind::Equal(..))
}

pub fn is_greater(event: &Event) -> bool {
    matches!(event.kind(), EventKind::Greater(..))
}

pub fn is_less(event: &Event) -> bool {
    matches!(event.kind(), EventKind::Less(..))
}

fn event_for(relation: Relation, first: &Value, second: &Value) -> Event {
    let (a, b) = (first.clone(), second.clone());
    match relation {
        Relation::Equal => Event::equal(a, b),
        Relation::NotEqual => Event::not_equal(a, b),
        Relation::Greater => Event::greater(a, b),
        Relation::Less => Event::less(a, b),
    }
}

/// Relate two payloads. Nil equals the empty instance of any kind.
pub fn relate(first: &Value, second: &Value) -> Result<Relation, ScriptError> {
    let equal_if = |same: bool| {
        if same {
            Relation::Equal
        } else {
            Relation::NotEqual
        }
    };
    match (first.raw(), second.raw()) {
        (Payload::Array(left), Payload::Array(right)) => {
            if left.len() != right.len() {
                return Ok(Relation::NotEqual);
            }
            for (a, b) in left.iter().zip(right) {
                if relate(a, b)? != Relation::Equal {
                    return Ok(Relation::NotEqual);
                }
            }
            Ok(Relation::Equal)
        }
        (Payload::Bool(a), Payload::Bool(b)) => Ok(equal_if(a == b)),
        (Payload::String(a), Payload::String(b)) => Ok(equal_if(a == b)),
        (Payload::Decimal(a), Payload::Decimal(b)) => Ok(match a.cmp(b) {
            std::cmp::Ordering::Less => Relation::Less,
            std::cmp::Ordering::Equal => Relation::Equal,
            std::cmp::Ordering::Greater => Relation::Greater,
        }),
        _ if first.is_nil() => Ok(equal_if(second.is_empty())),
        _ if second.is_nil() => Ok(equal_if(first.is_empty())),
        (Payload::Any(a), Payload::Any(b)) => Ok(equal_if(a == b)),
        _ => Err(ScriptError::IncomparableTypes {
            left: first.kind(),
            right: second.kind(),
        }),
    }
}
