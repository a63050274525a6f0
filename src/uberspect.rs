// ABOUTME: Property/method dispatch over maps, arrays, beans, and duck-typed objects

use crate::ast::CachedExecutor;
use crate::error::{JexlError, Position};
use crate::introspector::{Introspector, MethodLookup};
use crate::object::HostObject;
use crate::value::Value;
use std::cell::Cell;
use std::rc::Rc;

/// Outcome of a property read. Tries each access strategy in turn,
/// following the six-step `property_get` order: bean getter, duck-typed
/// get, field, map/array/string builtin, index access, then
/// unresolved.
pub enum PropertyAccess {
    Found(Value),
    Unresolved,
}

/// Resolves `obj.identifier` following discovery order:
/// map entry, list/array index, bean getter, public field, duck-typed
/// `get`, indexed-container getter. `obj` here is any `Value`, not only
/// `Value::Object`, since maps/arrays/sets are value-native in this
/// implementation rather than going through a host adapter.
pub fn property_get(introspector: &Introspector, obj: &Value, identifier: &str, pos: Position) -> Result<PropertyAccess, JexlError> {
    match obj {
        Value::Map(m) => {
            if !introspector.permissions().allow_field("Map", identifier) {
                return Ok(PropertyAccess::Unresolved);
            }
            let key = Value::str(identifier);
            Ok(match m.get(&key) {
                Some(v) => PropertyAccess::Found(v.clone()),
                None => PropertyAccess::Found(Value::Null),
            })
        }
        Value::Array(a) => {
            if let Ok(idx) = identifier.parse::<usize>() {
                Ok(match a.get(idx) {
                    Some(v) => PropertyAccess::Found(v.clone()),
                    None => PropertyAccess::Found(Value::Null),
                })
            } else {
                Ok(PropertyAccess::Unresolved)
            }
        }
        Value::Str(s) => {
            if !introspector.permissions().allow_field("String", identifier) {
                return Ok(PropertyAccess::Unresolved);
            }
            match identifier {
                "length" => Ok(PropertyAccess::Found(Value::Int64(s.chars().count() as i64))),
                _ => Ok(PropertyAccess::Unresolved),
            }
        }
        Value::Object(o) => property_get_host(introspector, o.as_ref(), identifier, pos),
        _ => Ok(PropertyAccess::Unresolved),
    }
}

fn property_get_host(introspector: &Introspector, obj: &dyn HostObject, identifier: &str, pos: Position) -> Result<PropertyAccess, JexlError> {
    // Bean getter first: try getX/isX by
    // delegating to the host adapter's own field/method tables, since
    // this implementation has no live reflection to call `getFoo()`
    // through — the host adapter is expected to expose bean-style
    // accessors as ordinary fields via `get_field`.
    if let Some(v) = introspector.get_field(obj, identifier) {
        return Ok(PropertyAccess::Found(v));
    }
    // Duck-typed get(Object).
    if introspector.method_names(obj).iter().any(|m| m == "get") {
        if let MethodLookup::Found { overload_index } =
            introspector.get_method(obj, "get", &[Value::str(identifier)])
        {
            if let Some(result) = obj.call_method("get", overload_index, &[Value::str(identifier)]) {
                return Ok(PropertyAccess::Found(result?));
            }
        }
    }
    if let Some(v) = obj.index_get(&Value::str(identifier)) {
        return Ok(PropertyAccess::Found(v));
    }
    let _ = pos;
    Ok(PropertyAccess::Unresolved)
}

/// Writes `obj.identifier = value`: map put,
/// list set by index, bean setter (here: `set_field`), duck `set`.
pub fn property_set(introspector: &Introspector, obj: &Value, identifier: &str, value: Value, pos: Position) -> Result<(), JexlError> {
    match obj {
        Value::Object(o) => {
            match introspector.get_field(o.as_ref(), identifier) {
                Some(_) => match o.set_field(identifier, value) {
                    Some(true) => Ok(()),
                    Some(false) => Err(JexlError::AssignmentToReadonly(pos)),
                    None => Err(JexlError::unknown_property(o.class_name(), identifier, pos)),
                },
                None => match o.index_set(&Value::str(identifier), value) {
                    Some(true) => Ok(()),
                    _ => Err(JexlError::unknown_property(o.class_name(), identifier, pos)),
                },
            }
        }
        _ => Err(JexlError::AssignmentToReadonly(pos)),
    }
}

/// Resolves and invokes `obj.name(args)`,
/// consulting the introspector for overload resolution first. `cache`,
/// when present, is the calling `MethodCall` node's executor cache: a
/// hit valid for the introspector's current version skips overload
/// resolution entirely; a miss is populated after a fresh resolution.
pub fn method_call(
    introspector: &Introspector,
    obj: &Value,
    name: &str,
    args: &[Value],
    pos: Position,
    cache: Option<&Cell<Option<CachedExecutor>>>,
) -> Result<Value, JexlError> {
    match obj {
        Value::Array(a) => {
            if !introspector.permissions().allow_method("Array", name) {
                return Err(JexlError::unknown_method("Array", name, arg_type_list(args), pos));
            }
            call_array_method(a, name, args, pos)
        }
        Value::Str(s) => {
            if !introspector.permissions().allow_method("String", name) {
                return Err(JexlError::unknown_method("String", name, arg_type_list(args), pos));
            }
            call_string_method(s, name, args, pos)
        }
        Value::Map(m) => {
            if !introspector.permissions().allow_method("Map", name) {
                return Err(JexlError::unknown_method("Map", name, arg_type_list(args), pos));
            }
            call_map_method(m, name, args, pos)
        }
        Value::Object(o) => {
            let current_version = introspector.version();
            if let Some(cell) = cache {
                if let Some(cached) = cell.get() {
                    if cached.version == current_version {
                        if let Some(result) = o.call_method(name, cached.overload_index, args) {
                            return result;
                        }
                    }
                }
            }
            match introspector.get_method(o.as_ref(), name, args) {
                MethodLookup::Found { overload_index } => {
                    if let Some(cell) = cache {
                        cell.set(Some(CachedExecutor { version: current_version, overload_index }));
                    }
                    o.call_method(name, overload_index, args)
                        .unwrap_or_else(|| Err(JexlError::unknown_method(o.class_name(), name, arg_type_list(args), pos)))
                }
                MethodLookup::Ambiguous { severe } => Err(JexlError::AmbiguousMethod {
                    object_class: o.class_name().to_string(),
                    name: name.to_string(),
                    arg_types: arg_type_list(args),
                    severe,
                    pos,
                }),
                MethodLookup::NotFound => Err(JexlError::unknown_method(o.class_name(), name, arg_type_list(args), pos)),
            }
        }
        _ => Err(JexlError::unknown_method(obj.type_name(), name, arg_type_list(args), pos)),
    }
}

fn arg_type_list(args: &[Value]) -> String {
    args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(",")
}

/// List-like methods (`size`, `isEmpty`, `contains`, `get`, indexing)
/// applied to a bare array, as if it were wrapped in a list adapter.
fn call_array_method(a: &Rc<Vec<Value>>, name: &str, args: &[Value], pos: Position) -> Result<Value, JexlError> {
    match (name, args) {
        ("size", []) => Ok(Value::Int64(a.len() as i64)),
        ("isEmpty", []) => Ok(Value::Bool(a.is_empty())),
        ("contains", [needle]) => Ok(Value::Bool(crate::arithmetic::contains(&Value::Array(a.clone()), needle))),
        ("get", [idx]) => {
            let i = value_as_index(idx, pos)?;
            a.get(i).cloned().ok_or(JexlError::IndexOutOfRange(pos))
        }
        _ => Err(JexlError::unknown_method("Array", name, arg_type_list(args), pos)),
    }
}

fn call_string_method(s: &Rc<str>, name: &str, args: &[Value], pos: Position) -> Result<Value, JexlError> {
    match (name, args) {
        ("length", []) => Ok(Value::Int64(s.chars().count() as i64)),
        ("isEmpty", []) => Ok(Value::Bool(s.is_empty())),
        ("toUpperCase", []) => Ok(Value::str(s.to_uppercase())),
        ("toLowerCase", []) => Ok(Value::str(s.to_lowercase())),
        ("trim", []) => Ok(Value::str(s.trim())),
        ("contains", [Value::Str(n)]) => Ok(Value::Bool(s.contains(n.as_ref()))),
        ("substring", [start]) => {
            let i = value_as_index(start, pos)?;
            Ok(Value::str(s.chars().skip(i).collect::<String>()))
        }
        ("substring", [start, end]) => {
            let i = value_as_index(start, pos)?;
            let j = value_as_index(end, pos)?;
            Ok(Value::str(s.chars().skip(i).take(j.saturating_sub(i)).collect::<String>()))
        }
        _ => Err(JexlError::unknown_method("String", name, arg_type_list(args), pos)),
    }
}

fn call_map_method(m: &Rc<indexmap::IndexMap<Value, Value>>, name: &str, args: &[Value], pos: Position) -> Result<Value, JexlError> {
    match (name, args) {
        ("size", []) => Ok(Value::Int64(m.len() as i64)),
        ("isEmpty", []) => Ok(Value::Bool(m.is_empty())),
        ("containsKey", [key]) => Ok(Value::Bool(m.contains_key(key))),
        ("keySet", []) => Ok(Value::array(m.keys().cloned().collect())),
        ("values", []) => Ok(Value::array(m.values().cloned().collect())),
        ("entries", []) | ("entrySet", []) => Ok(Value::array(
            m.iter()
                .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        _ => Err(JexlError::unknown_method("Map", name, arg_type_list(args), pos)),
    }
}

fn value_as_index(v: &Value, pos: Position) -> Result<usize, JexlError> {
    match v {
        Value::Int64(i) if *i >= 0 => Ok(*i as usize),
        _ => Err(JexlError::coercion(v.type_name(), "index", pos)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Permissions;

    #[test]
    fn test_property_get_map() {
        let introspector = Introspector::new(Permissions::unrestricted());
        let mut m = indexmap::IndexMap::new();
        m.insert(Value::str("bar"), Value::Int64(20));
        let obj = Value::Map(Rc::new(m));
        match property_get(&introspector, &obj, "bar", Position::default()).unwrap() {
            PropertyAccess::Found(v) => assert_eq!(v, Value::Int64(20)),
            PropertyAccess::Unresolved => panic!("expected Found"),
        }
    }

    #[test]
    fn test_array_method_size() {
        let arr = Value::array(vec![Value::Int64(1), Value::Int64(2)]);
        let r = method_call(
            &Introspector::new(Permissions::unrestricted()),
            &arr,
            "size",
            &[],
            Position::default(),
            None,
        )
        .unwrap();
        assert_eq!(r, Value::Int64(2));
    }

    #[test]
    fn test_string_to_upper() {
        let s = Value::str("abc");
        let r = method_call(
            &Introspector::new(Permissions::unrestricted()),
            &s,
            "toUpperCase",
            &[],
            Position::default(),
            None,
        )
        .unwrap();
        assert_eq!(r, Value::str("ABC"));
    }

    #[test]
    fn test_denied_map_field_is_unresolved() {
        let perms = crate::permissions::parse("-Map { secret; }").unwrap();
        let introspector = Introspector::new(perms);
        let mut m = indexmap::IndexMap::new();
        m.insert(Value::str("secret"), Value::Int64(1));
        let obj = Value::Map(Rc::new(m));
        match property_get(&introspector, &obj, "secret", Position::default()).unwrap() {
            PropertyAccess::Unresolved => {}
            PropertyAccess::Found(_) => panic!("expected denied field to be unresolved"),
        }
    }

    #[test]
    fn test_denied_array_method_errors() {
        let perms = crate::permissions::parse("-Array { size(); }").unwrap();
        let introspector = Introspector::new(perms);
        let arr = Value::array(vec![Value::Int64(1)]);
        let r = method_call(&introspector, &arr, "size", &[], Position::default(), None);
        assert!(r.is_err());
    }
}
