// ABOUTME: Resolution of ns:fn(args) namespace function calls

use crate::error::{JexlError, Position};
use crate::value::{HostFn, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Resolves a namespace prefix to a callable table ("small named-
/// function namespaces"): functions are registered under
/// dotted/namespaced names (`math:abs`, `str:concat`) and resolved by
/// prefix.
pub trait NamespaceResolver {
    fn resolve(&self, namespace: &str, name: &str) -> Option<HostFn>;
}

/// The default resolver: a flat table of `(namespace, name) -> HostFn`
/// populated by the host application at `Engine` construction time.
#[derive(Default)]
pub struct NamespaceRegistry {
    functions: HashMap<(String, String), HostFn>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        NamespaceRegistry::default()
    }

    pub fn register(&mut self, namespace: impl Into<String>, name: impl Into<String>, f: HostFn) {
        self.functions.insert((namespace.into(), name.into()), f);
    }
}

impl NamespaceResolver for NamespaceRegistry {
    fn resolve(&self, namespace: &str, name: &str) -> Option<HostFn> {
        self.functions.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

pub fn call(resolver: &dyn NamespaceResolver, namespace: &str, name: &str, args: &[Value], pos: Position) -> Result<Value, JexlError> {
    match resolver.resolve(namespace, name) {
        Some(f) => f(args),
        None => Err(JexlError::unknown_method(namespace, name, args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(","), pos)),
    }
}

/// Pluggable factory table for `new(className, args...)` construction,
/// the same "flat table populated by the host application" shape as
/// `NamespaceRegistry`, keyed by class name instead of `(namespace, name)`.
pub trait ConstructorRegistry {
    fn construct(&self, class_name: &str, args: &[Value]) -> Option<Result<Value, JexlError>>;
}

#[derive(Default)]
pub struct ClassRegistry {
    factories: HashMap<String, HostFn>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        ClassRegistry::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, f: HostFn) {
        self.factories.insert(class_name.into(), f);
    }
}

impl ConstructorRegistry for ClassRegistry {
    fn construct(&self, class_name: &str, args: &[Value]) -> Option<Result<Value, JexlError>> {
        self.factories.get(class_name).map(|f| f(args))
    }
}

/// A couple of always-available namespaces (`math:`, `str:`) seeded by
/// default.
pub fn default_registry() -> NamespaceRegistry {
    let mut registry = NamespaceRegistry::new();
    registry.register("math", "abs", Rc::new(|args| match args.first() {
        Some(Value::Int64(i)) => Ok(Value::Int64(i.abs())),
        Some(Value::Float64(f)) => Ok(Value::Float64(f.abs())),
        _ => Err(JexlError::Internal("math:abs expects a number".into())),
    }));
    registry.register("math", "max", Rc::new(|args| {
        args.iter()
            .cloned()
            .reduce(|a, b| if crate::arithmetic::compare(&a, &b, Position::default()).map(|o| o.is_lt()).unwrap_or(false) { b } else { a })
            .ok_or_else(|| JexlError::Internal("math:max expects at least one argument".into()))
    }));
    registry.register("str", "concat", Rc::new(|args| {
        Ok(Value::str(args.iter().map(|v| v.to_string()).collect::<String>()))
    }));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_math_abs() {
        let registry = default_registry();
        let r = call(&registry, "math", "abs", &[Value::Int64(-5)], Position::default()).unwrap();
        assert_eq!(r, Value::Int64(5));
    }

    #[test]
    fn test_unknown_namespace_function_errors() {
        let registry = default_registry();
        let r = call(&registry, "nope", "fn", &[], Position::default());
        assert!(r.is_err());
    }

    #[test]
    fn test_class_registry_construct() {
        let mut registry = ClassRegistry::new();
        registry.register(
            "Point",
            Rc::new(|args| Ok(Value::Int64(args.len() as i64))),
        );
        assert_eq!(registry.construct("Point", &[Value::Int64(1), Value::Int64(2)]), Some(Ok(Value::Int64(2))));
        assert!(registry.construct("Missing", &[]).is_none());
    }
}
