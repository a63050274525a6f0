// ABOUTME: Host-object abstraction standing in for JVM reflection

use crate::value::Value;
use std::fmt;

/// Describes the shape of a host value for the introspector/uberspect
/// layer, standing in for runtime reflection: a host language's own
/// reflection API isn't portable, so this crate asks host applications
/// to implement a small pluggable adapter interface instead.
///
/// Host applications implement this for whatever native type they want
/// scripts to read/write/call into. A `HashMap`/bean-style host object
/// only needs `class_name` plus either `get_field`/`call_method` or a
/// schema-driven lookup; the default provided impls cover field-less
/// hosts that only expose methods.
pub trait HostObject: fmt::Debug {
    /// Stable name used as the introspector cache key.
    fn class_name(&self) -> &str;

    /// Public field names, sorted, for `method_names`/`field_names`
    /// style discovery.
    fn field_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Read a public field by name.
    fn get_field(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Write a public field by name; `Ok(false)` if the field exists but
    /// is readonly, `Ok(true)` on success, `None` if no such field.
    fn set_field(&self, _name: &str, _value: Value) -> Option<bool> {
        None
    }

    /// Names of applicable methods, for overload-candidate discovery.
    fn method_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Invoke the overload at `overload_index` within `signatures(name)`
    /// (or the sole overload, when a host adapter doesn't bother
    /// publishing a signature table) with pre-evaluated arguments.
    fn call_method(&self, name: &str, overload_index: usize, args: &[Value]) -> Option<Result<Value, crate::error::JexlError>> {
        let _ = (name, overload_index, args);
        None
    }

    /// Optional overload table for targets without native reflection:
    /// one entry per overload of `name`.
    /// An adapter with no overloads (the common case) can leave this as
    /// the default empty vector; the introspector then skips applicability
    /// filtering and calls overload 0 directly.
    fn signatures(&self, _name: &str) -> Vec<Signature> {
        Vec::new()
    }

    /// Optional duck-typed `get(key)`/`set(key, value)` indexed access.
    fn index_get(&self, _key: &Value) -> Option<Value> {
        None
    }

    fn index_set(&self, _key: &Value, _value: Value) -> Option<bool> {
        None
    }

    /// Host-defined equality: otherwise falls back to host-object
    /// identity unless the host object exposes `equals`. Default falls
    /// back to pointer identity of the trait object's data.
    fn host_equals(&self, other: &dyn HostObject) -> bool {
        std::ptr::eq(
            self as *const dyn HostObject as *const (),
            other as *const dyn HostObject as *const (),
        )
    }
}

/// One formal parameter type in a method `Signature`, an explicit type
/// lattice standing in for a host language's own primitive/boxed
/// subtleties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// Matches anything, including `null`.
    Object,
    /// A specific, non-widening host class name.
    Class(String),
    Number,
    Str,
    Bool,
    /// Trailing varargs component type.
    Varargs(Box<ParamType>),
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<ParamType>,
}

impl Signature {
    pub fn new(params: Vec<ParamType>) -> Self {
        Signature { params }
    }

    pub fn is_varargs(&self) -> bool {
        matches!(self.params.last(), Some(ParamType::Varargs(_)))
    }
}

/// A simple `Vec<(name, Value)>`-backed bean for tests and small embeds:
/// fields only, no methods, for hosts without native reflection.
#[derive(Debug, Clone, Default)]
pub struct SchemaObject {
    pub class: String,
    pub fields: Vec<(String, Value)>,
}

impl SchemaObject {
    pub fn new(class: impl Into<String>) -> Self {
        SchemaObject {
            class: class.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }
}

impl HostObject for SchemaObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|(n, _)| n.clone()).collect();
        names.sort();
        names
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_object_get_field() {
        let obj = SchemaObject::new("Point").with_field("x", Value::Int64(1));
        assert_eq!(obj.get_field("x"), Some(Value::Int64(1)));
        assert_eq!(obj.get_field("y"), None);
    }

    #[test]
    fn test_schema_object_field_names_sorted() {
        let obj = SchemaObject::new("Point")
            .with_field("y", Value::Int64(2))
            .with_field("x", Value::Int64(1));
        assert_eq!(obj.field_names(), vec!["x".to_string(), "y".to_string()]);
    }
}
