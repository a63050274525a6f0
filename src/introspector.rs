// ABOUTME: Class-keyed method/field cache with most-specific overload resolution

use crate::object::{HostObject, ParamType, Signature};
use crate::permissions::Permissions;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Actual argument type computed from a `Value` for matching against a
/// `Signature`'s `ParamType`s. `Void` marks a null actual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgType {
    Void,
    Number,
    Str,
    Bool,
    Class(String),
}

pub fn arg_type(v: &Value) -> ArgType {
    match v {
        Value::Null => ArgType::Void,
        Value::Int64(_) | Value::Float64(_) | Value::BigInt(_) | Value::BigDec(_) => ArgType::Number,
        Value::Str(_) => ArgType::Str,
        Value::Bool(_) => ArgType::Bool,
        Value::Object(o) => ArgType::Class(o.class_name().to_string()),
        _ => ArgType::Class(v.type_name().to_string()),
    }
}

/// Invocation convertibility, non-strict.
fn convertible_nonstrict(actual: &ArgType, formal: &ParamType) -> bool {
    match (actual, formal) {
        (_, ParamType::Object) => true,
        (ArgType::Void, _) => true,
        (ArgType::Number, ParamType::Number) => true,
        (ArgType::Str, ParamType::Str) => true,
        (ArgType::Bool, ParamType::Bool) => true,
        (ArgType::Class(a), ParamType::Class(b)) => a == b,
        _ => false,
    }
}

/// Strict convertibility: like non-strict, but a
/// `null` actual is not convertible to anything except `Object`, and
/// primitives only widen to primitives (the lattice here has no boxed
/// distinction to rephrase, so strict collapses to non-strict minus the
/// null-to-anything allowance).
fn convertible_strict(actual: &ArgType, formal: &ParamType) -> bool {
    match actual {
        ArgType::Void => matches!(formal, ParamType::Object),
        _ => convertible_nonstrict(actual, formal),
    }
}

fn applicable(sig: &Signature, actuals: &[ArgType]) -> bool {
    if sig.is_varargs() {
        let fixed = &sig.params[..sig.params.len() - 1];
        if actuals.len() < fixed.len() {
            return false;
        }
        if !fixed.iter().zip(actuals.iter()).all(|(f, a)| convertible_nonstrict(a, f)) {
            return false;
        }
        let vararg_component = match sig.params.last().unwrap() {
            ParamType::Varargs(inner) => inner.as_ref(),
            _ => unreachable!(),
        };
        actuals[fixed.len()..].iter().all(|a| convertible_nonstrict(a, vararg_component))
    } else {
        // (a) exact arity, all convertible, or (c) one short (vararg
        // omitted) — only applies when the signature itself is varargs,
        // handled above, so here we only need exact-arity matching.
        sig.params.len() == actuals.len()
            && sig.params.iter().zip(actuals.iter()).all(|(f, a)| convertible_nonstrict(a, f))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Specificity {
    MoreSpecific,
    LessSpecific,
    Incomparable,
}

/// Signature A is more specific than B if every A-formal is
/// strict-convertible to the corresponding B-formal and not vice versa,
/// with null/primitive tie-breaks. Varargs signatures are always less
/// specific than a fixed-arity signature of the same effective arity.
fn compare_specificity(a: &Signature, a_actuals: &[ArgType], b: &Signature, b_actuals: &[ArgType]) -> Specificity {
    if a.is_varargs() != b.is_varargs() {
        return if a.is_varargs() {
            Specificity::LessSpecific
        } else {
            Specificity::MoreSpecific
        };
    }
    let len = a.params.len().min(b.params.len());
    let mut a_to_b = true;
    let mut b_to_a = true;
    for i in 0..len {
        let (pa, pb) = (&a.params[i], &b.params[i]);
        let actual_is_null = a_actuals.get(i) == Some(&ArgType::Void) || b_actuals.get(i) == Some(&ArgType::Void);
        if actual_is_null {
            // tie-break: null actual prefers an Object formal
            match (pa, pb) {
                (ParamType::Object, ParamType::Object) => {}
                (ParamType::Object, _) => b_to_a = false,
                (_, ParamType::Object) => a_to_b = false,
                _ => {}
            }
            continue;
        }
        if !convertible_strict(&to_dummy_actual(pa), pb) {
            a_to_b = false;
        }
        if !convertible_strict(&to_dummy_actual(pb), pa) {
            b_to_a = false;
        }
    }
    match (a_to_b, b_to_a) {
        (true, false) => Specificity::MoreSpecific,
        (false, true) => Specificity::LessSpecific,
        _ => Specificity::Incomparable,
    }
}

fn to_dummy_actual(p: &ParamType) -> ArgType {
    match p {
        ParamType::Object => ArgType::Class("Object".into()),
        ParamType::Class(c) => ArgType::Class(c.clone()),
        ParamType::Number => ArgType::Number,
        ParamType::Str => ArgType::Str,
        ParamType::Bool => ArgType::Bool,
        ParamType::Varargs(inner) => to_dummy_actual(inner),
    }
}

#[derive(Debug, Clone)]
pub enum MethodLookup {
    Found { overload_index: usize },
    Ambiguous { severe: bool },
    NotFound,
}

/// (method-name, normalized actual-type-vector) cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    arg_types: Vec<String>,
}

fn key_for(name: &str, actuals: &[ArgType]) -> MethodKey {
    MethodKey {
        name: name.to_string(),
        arg_types: actuals.iter().map(|a| format!("{:?}", a)).collect(),
    }
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Hit(MethodLookup),
    Miss,
}

/// Per-class cache of method resolutions.
#[derive(Debug, Default)]
struct ClassMap {
    methods: RefCell<HashMap<MethodKey, CacheEntry>>,
    loader_version: u64,
}

/// Top-level introspector: per-class `ClassMap`s, a permission filter,
/// and a monotonic loader-version counter. The allow/deny shape
/// generalizes from filesystem path rules to (class, member) pairs; the
/// overload resolution algorithm is implemented directly from the
/// most-specific-method rules it enforces.
pub struct Introspector {
    classes: RefCell<HashMap<String, ClassMap>>,
    permissions: Permissions,
    version: AtomicU64,
}

impl Introspector {
    pub fn new(permissions: Permissions) -> Self {
        Introspector {
            classes: RefCell::new(HashMap::new()),
            permissions,
            version: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(AtomicOrdering::Acquire)
    }

    /// Replaces the effective class loader: evicts every class's cache
    /// and bumps the version counter, so Scripts snapshot-comparing
    /// against `version()` know their node-level executor caches are
    /// stale.
    pub fn set_loader(&self) {
        self.classes.borrow_mut().clear();
        self.version.fetch_add(1, AtomicOrdering::AcqRel);
    }

    fn class_map<'a>(&'a self, class_name: &str) -> std::cell::RefMut<'a, HashMap<String, ClassMap>> {
        let mut classes = self.classes.borrow_mut();
        classes.entry(class_name.to_string()).or_insert_with(|| ClassMap {
            methods: RefCell::new(HashMap::new()),
            loader_version: self.version(),
        });
        classes
    }

    /// Resolves `name(actuals)` on a host object, consulting the cache
    /// first, then the permission filter, then the overload algorithm
    ///. A negative result is cached as
    /// `CacheEntry::Miss` so repeated lookups of an absent method are
    /// O(1) after the first.
    pub fn get_method(&self, obj: &dyn HostObject, name: &str, actuals: &[Value]) -> MethodLookup {
        let class_name = obj.class_name().to_string();
        let arg_types: Vec<ArgType> = actuals.iter().map(arg_type).collect();
        let key = key_for(name, &arg_types);

        {
            let classes = self.class_map(&class_name);
            if let Some(cm) = classes.get(&class_name) {
                if let Some(entry) = cm.methods.borrow().get(&key) {
                    return match entry {
                        CacheEntry::Hit(lookup) => lookup.clone(),
                        CacheEntry::Miss => MethodLookup::NotFound,
                    };
                }
            }
        }

        let result = self.resolve_method(obj, &class_name, name, &arg_types);

        let classes = self.class_map(&class_name);
        if let Some(cm) = classes.get(&class_name) {
            let entry = match &result {
                MethodLookup::NotFound => CacheEntry::Miss,
                other => CacheEntry::Hit(other.clone()),
            };
            cm.methods.borrow_mut().insert(key, entry);
        }
        result
    }

    fn resolve_method(&self, obj: &dyn HostObject, class_name: &str, name: &str, actuals: &[ArgType]) -> MethodLookup {
        if !self.permissions.allow_class(class_name) || !self.permissions.allow_method(class_name, name) {
            return MethodLookup::NotFound;
        }
        let signatures = obj.signatures(name);
        if signatures.is_empty() {
            if obj.method_names().iter().any(|m| m == name) {
                return MethodLookup::Found { overload_index: 0 };
            }
            return MethodLookup::NotFound;
        }

        let applicable_indices: Vec<usize> = signatures
            .iter()
            .enumerate()
            .filter(|(_, sig)| applicable(sig, actuals))
            .map(|(i, _)| i)
            .collect();

        if applicable_indices.is_empty() {
            return MethodLookup::NotFound;
        }
        if applicable_indices.len() == 1 {
            return MethodLookup::Found {
                overload_index: applicable_indices[0],
            };
        }

        let mut maximals: Vec<usize> = Vec::new();
        for &idx in &applicable_indices {
            let mut dominated_others = false;
            let mut to_remove = Vec::new();
            let mut is_eclipsed = false;
            for (pos, &max_idx) in maximals.iter().enumerate() {
                match compare_specificity(&signatures[idx], actuals, &signatures[max_idx], actuals) {
                    Specificity::MoreSpecific => {
                        to_remove.push(pos);
                        dominated_others = true;
                    }
                    Specificity::LessSpecific => {
                        is_eclipsed = true;
                    }
                    Specificity::Incomparable => {}
                }
            }
            if is_eclipsed && !dominated_others {
                continue;
            }
            for pos in to_remove.into_iter().rev() {
                maximals.remove(pos);
            }
            maximals.push(idx);
        }

        if maximals.len() == 1 {
            MethodLookup::Found {
                overload_index: maximals[0],
            }
        } else {
            let severe = !actuals.iter().any(|a| *a == ArgType::Void)
                || maximals
                    .iter()
                    .filter(|&&idx| {
                        signatures[idx]
                            .params
                            .iter()
                            .zip(actuals.iter())
                            .filter(|(_, a)| **a == ArgType::Void)
                            .all(|(p, _)| matches!(p, ParamType::Object))
                    })
                    .count()
                    > 1;
            MethodLookup::Ambiguous { severe }
        }
    }

    pub fn get_field(&self, obj: &dyn HostObject, name: &str) -> Option<Value> {
        if !self.permissions.allow_field(obj.class_name(), name) {
            return None;
        }
        obj.get_field(name)
    }

    pub fn method_names(&self, obj: &dyn HostObject) -> Vec<String> {
        let mut names: Vec<String> = obj
            .method_names()
            .into_iter()
            .filter(|m| self.permissions.allow_method(obj.class_name(), m))
            .collect();
        names.sort();
        names
    }

    pub fn field_names(&self, obj: &dyn HostObject) -> Vec<String> {
        let mut names: Vec<String> = obj
            .field_names()
            .into_iter()
            .filter(|f| self.permissions.allow_field(obj.class_name(), f))
            .collect();
        names.sort();
        names
    }

    /// Permission gate for a `new(className, ...)` constructor call. The
    /// actual factory lookup lives in a `ConstructorRegistry`, kept
    /// separate since construction precedes having an instance to
    /// reflect on.
    pub fn get_constructor(&self, class_name: &str) -> bool {
        self.permissions.allow_class(class_name) && self.permissions.allow_constructor(class_name)
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SchemaObject;

    #[derive(Debug)]
    struct Overloaded;

    impl HostObject for Overloaded {
        fn class_name(&self) -> &str {
            "Overloaded"
        }

        fn method_names(&self) -> Vec<String> {
            vec!["f".to_string()]
        }

        fn signatures(&self, name: &str) -> Vec<Signature> {
            if name == "f" {
                vec![
                    Signature::new(vec![ParamType::Object, ParamType::Str]),
                    Signature::new(vec![ParamType::Str, ParamType::Object]),
                ]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn test_ambiguous_overload_is_severe() {
        let introspector = Introspector::new(Permissions::unrestricted());
        let obj = Overloaded;
        let result = introspector.get_method(&obj, "f", &[Value::str("a"), Value::str("b")]);
        match result {
            MethodLookup::Ambiguous { severe } => assert!(severe),
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_hits_on_repeat_lookup() {
        let introspector = Introspector::new(Permissions::unrestricted());
        let obj = SchemaObject::new("Point").with_field("x", Value::Int64(1));
        assert_eq!(introspector.get_field(&obj, "x"), Some(Value::Int64(1)));
        assert_eq!(introspector.get_field(&obj, "x"), Some(Value::Int64(1)));
    }

    #[test]
    fn test_set_loader_bumps_version() {
        let introspector = Introspector::new(Permissions::unrestricted());
        let v0 = introspector.version();
        introspector.set_loader();
        assert_eq!(introspector.version(), v0 + 1);
    }

    #[test]
    fn test_permission_denial_hides_method() {
        let perms = crate::permissions::parse("-Overloaded { f(); }").unwrap();
        let introspector = Introspector::new(perms);
        let obj = Overloaded;
        let result = introspector.get_method(&obj, "f", &[Value::str("a")]);
        assert!(matches!(result, MethodLookup::NotFound));
    }

    #[test]
    fn test_get_constructor_respects_permissions() {
        let open = Introspector::new(Permissions::unrestricted());
        assert!(open.get_constructor("Widget"));

        let perms = crate::permissions::parse("-Widget { new(); }").unwrap();
        let closed = Introspector::new(perms);
        assert!(!closed.get_constructor("Widget"));
    }
}
