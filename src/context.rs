// ABOUTME: Abstract variable context hosts supply to expressions and scripts

use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;

/// The mapping expressions resolve free (non-local) names against, per
/// "Context — an abstract mapping from top-level variable names
/// to values, supplied by the host." A `get`/`set` pair behind a trait
/// so a host can back it with anything: a plain map, a database row, a
/// generated struct.
pub trait Context {
    fn has(&self, name: &str) -> bool;
    fn get(&self, name: &str) -> Option<Value>;
    /// `Err(())` signals a readonly context rejecting the write; the
    /// interpreter turns that into `JexlError::AssignmentToReadonly`.
    fn set(&self, name: &str, value: Value) -> Result<(), ()>;
}

/// The default host-supplied context: an ordered map, mutable through
/// interior mutability so `Context::set` can take `&self` (scripts hold
/// a shared reference to the context for their whole run).
#[derive(Debug, Default)]
pub struct MapContext {
    vars: RefCell<IndexMap<String, Value>>,
}

impl MapContext {
    pub fn new() -> Self {
        MapContext::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.get_mut().insert(name.into(), value);
        self
    }

    pub fn insert(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    /// Names currently bound, for `Engine::get_variables` cross-checking
    /// and for namespace/stdlib introspection.
    pub fn names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }
}

impl Context for MapContext {
    fn has(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    fn set(&self, name: &str, value: Value) -> Result<(), ()> {
        self.vars.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }
}

/// Wraps any `Context` to reject writes, for hosts that want to expose
/// read-only bindings ("readonly context" variant mentioned
/// alongside strict/lenient evaluation modes).
pub struct ReadonlyContext<'a> {
    inner: &'a dyn Context,
}

impl<'a> ReadonlyContext<'a> {
    pub fn new(inner: &'a dyn Context) -> Self {
        ReadonlyContext { inner }
    }
}

impl<'a> Context for ReadonlyContext<'a> {
    fn has(&self, name: &str) -> bool {
        self.inner.has(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.inner.get(name)
    }

    fn set(&self, _name: &str, _value: Value) -> Result<(), ()> {
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_context_get_set() {
        let ctx = MapContext::new().with("x", Value::Int64(1));
        assert_eq!(ctx.get("x"), Some(Value::Int64(1)));
        assert!(ctx.set("y", Value::Int64(2)).is_ok());
        assert_eq!(ctx.get("y"), Some(Value::Int64(2)));
    }

    #[test]
    fn test_readonly_context_rejects_write() {
        let ctx = MapContext::new().with("x", Value::Int64(1));
        let readonly = ReadonlyContext::new(&ctx);
        assert_eq!(readonly.get("x"), Some(Value::Int64(1)));
        assert!(readonly.set("x", Value::Int64(2)).is_err());
    }

    #[test]
    fn test_has_reflects_presence() {
        let ctx = MapContext::new();
        assert!(!ctx.has("z"));
        ctx.insert("z", Value::Bool(true));
        assert!(ctx.has("z"));
    }
}
