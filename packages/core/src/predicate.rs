//! Storage-agnostic query predicate AST.
//!
//! `Store::query_documents` takes a `Predicate` rather than a closure so
//! that storage backends can translate it (e.g. to SQL) instead of being
//! forced to materialize and filter in memory. Construct one with the
//! builder functions rather than the variants directly.

use serde_json::Value;

/// A field path into a document body plus a comparison value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    Le(String, Value),
    Ge(String, Value),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

/// Field equals `value`.
#[must_use]
pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Eq(field.into(), value.into())
}

/// Field is less than `value`.
#[must_use]
pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Lt(field.into(), value.into())
}

/// Field is greater than `value`.
#[must_use]
pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Gt(field.into(), value.into())
}

/// Field is less than or equal to `value`.
#[must_use]
pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Le(field.into(), value.into())
}

/// Field is greater than or equal to `value`.
#[must_use]
pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Ge(field.into(), value.into())
}

impl Predicate {
    #[must_use]
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Evaluates the predicate against a parsed JSON document body.
    ///
    /// Reference implementation for in-memory stores (e.g. `MemoryStore`);
    /// backends with a query planner may translate the AST instead of
    /// calling this.
    #[must_use]
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Predicate::Eq(field, value) => field_value(body, field).as_ref() == Some(value),
            Predicate::Lt(field, value) => compare(body, field, value) == Some(std::cmp::Ordering::Less),
            Predicate::Gt(field, value) => compare(body, field, value) == Some(std::cmp::Ordering::Greater),
            Predicate::Le(field, value) => matches!(
                compare(body, field, value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            Predicate::Ge(field, value) => matches!(
                compare(body, field, value),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            Predicate::And(a, b) => a.matches(body) && b.matches(body),
            Predicate::Or(a, b) => a.matches(body) || b.matches(body),
            Predicate::Not(p) => !p.matches(body),
        }
    }
}

fn field_value(body: &Value, field: &str) -> Option<Value> {
    body.get(field).cloned()
}

fn compare(body: &Value, field: &str, value: &Value) -> Option<std::cmp::Ordering> {
    let actual = field_value(body, field)?;
    let a = actual.as_f64()?;
    let b = value.as_f64()?;
    a.partial_cmp(&b)
}
