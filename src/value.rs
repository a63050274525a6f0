// ABOUTME: Value types representing JEXL's tagged runtime value model

use crate::object::HostObject;
use bigdecimal::BigDecimal;
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::closure::Closure;

/// A host-provided callable, invoked by name and argument vector.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, crate::error::JexlError>>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    BigInt(BigInt),
    BigDec(BigDecimal),
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Map(Rc<IndexMap<Value, Value>>),
    Set(Rc<IndexSet<Value>>),
    Object(Rc<dyn HostObject>),
    Callable(Closure),
    NativeFn(Rc<str>, HostFn),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    /// Truthiness: Null false, Bool itself, numbers nonzero,
    /// strings compare case-insensitively to "true", collections non-empty,
    /// objects always true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int64(i) => *i != 0,
            Value::Float64(f) => *f != 0.0,
            Value::BigInt(b) => !b.eq(&BigInt::from(0)),
            Value::BigDec(b) => !b.is_zero(),
            Value::Str(s) => s.eq_ignore_ascii_case("true"),
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Set(s) => !s.is_empty(),
            Value::Object(_) => true,
            Value::Callable(_) | Value::NativeFn(..) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `size`: string length, collection count, or a host
    /// `size()` dispatch (left to the uberspect layer — here only the
    /// value-native cases).
    pub fn size(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            Value::Map(m) => Some(m.len()),
            Value::Set(s) => Some(s.len()),
            Value::Null => Some(0),
            _ => None,
        }
    }

    pub fn is_empty_value(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Bool(b) => !b,
            Value::Int64(i) => *i == 0,
            Value::Float64(f) => *f == 0.0,
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int64(_) => "int",
            Value::Float64(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::BigDec(_) => "bigdecimal",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
            Value::Callable(_) => "function",
            Value::NativeFn(..) => "function",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int64(_) | Value::Float64(_) | Value::BigInt(_) | Value::BigDec(_)
        )
    }
}

/// Equality: Null == Null; Null != anything else; numbers
/// compare by mathematical value across variants; strings as code-unit
/// sequences; otherwise host identity unless the host exposes `equals`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Null, _) | (_, Null) => false,
            (Str(a), Str(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            (Object(a), Object(b)) => a.host_equals(b.as_ref()),
            (Callable(a), Callable(b)) => Rc::ptr_eq(&a.body, &b.body),
            _ if self.is_numeric() && other.is_numeric() => {
                crate::arithmetic::numeric_cmp(self, other) == Some(Ordering::Equal)
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Int64(i) => i.hash(state),
            Value::Float64(f) => f.to_bits().hash(state),
            Value::BigInt(b) => b.hash(state),
            Value::BigDec(b) => b.to_string().hash(state),
            Value::Str(s) => s.hash(state),
            _ => std::ptr::hash(self as *const Value, state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}.0", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::BigInt(b) => write!(f, "{}", b),
            Value::BigDec(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(set) => {
                write!(f, "{{")?;
                for (i, v) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
            Value::Object(o) => write!(f, "#<object {}>", o.class_name()),
            Value::Callable(_) => write!(f, "#<lambda>"),
            Value::NativeFn(name, _) => write!(f, "#<builtin {}>", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_equality() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Bool(false));
        assert_ne!(Value::Bool(false), Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Int64(0).is_truthy());
        assert!(Value::Int64(1).is_truthy());
        assert!(Value::str("TRUE").is_truthy());
        assert!(!Value::str("nope").is_truthy());
        assert!(!Value::array(vec![]).is_truthy());
        assert!(Value::array(vec![Value::Int64(1)]).is_truthy());
    }

    #[test]
    fn test_display_float_whole() {
        assert_eq!(format!("{}", Value::Float64(42.0)), "42.0");
        assert_eq!(format!("{}", Value::Float64(2.5)), "2.5");
    }

    #[test]
    fn test_display_array() {
        let v = Value::array(vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(format!("{}", v), "[1, 2]");
    }

    #[test]
    fn test_size_and_empty() {
        assert_eq!(Value::str("abc").size(), Some(3));
        assert_eq!(Value::array(vec![]).size(), Some(0));
        assert!(Value::Null.is_empty_value());
        assert!(!Value::array(vec![Value::Int64(1)]).is_empty_value());
    }
}
