// ABOUTME: Top-level embedding surface: Engine, Expression, Script, Options

use crate::ast::{Ast, NodeId, NodeKind};
use crate::context::Context;
use crate::error::JexlError;
use crate::interpreter::{CancelFlag, Interpreter, Options};
use crate::introspector::Introspector;
use crate::namespaces::{default_registry, ClassRegistry, ConstructorRegistry, NamespaceRegistry, NamespaceResolver};
use crate::permissions::Permissions;
use crate::scope::Frame;
use crate::value::Value;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Host-facing entry point, built once and reused across evaluations:
/// construct the introspector and namespace registry once, then reuse
/// them across every `Expression`/`Script` produced from this engine.
pub struct Engine {
    introspector: Introspector,
    namespaces: NamespaceRegistry,
    constructors: ClassRegistry,
    options: Options,
}

impl Engine {
    pub fn new(permissions: Permissions, options: Options) -> Self {
        Engine {
            introspector: Introspector::new(permissions),
            namespaces: default_registry(),
            constructors: ClassRegistry::new(),
            options,
        }
    }

    pub fn with_namespaces(mut self, namespaces: NamespaceRegistry) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_constructors(mut self, constructors: ClassRegistry) -> Self {
        self.constructors = constructors;
        self
    }

    /// Host-facing counterpart of the `new(className, args…)` script
    /// syntax: permission-checked construction via the registered
    /// `ConstructorRegistry`.
    pub fn new_instance(&self, class_name: &str, args: &[Value]) -> Result<Value, JexlError> {
        if !self.introspector.get_constructor(class_name) {
            return Err(JexlError::unknown_method(class_name, "new", args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(","), crate::error::Position::default()));
        }
        match self.constructors.construct(class_name, args) {
            Some(result) => result,
            None => Err(JexlError::unknown_method(class_name, "new", args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(","), crate::error::Position::default())),
        }
    }

    pub fn introspector_version(&self) -> u64 {
        self.introspector.version()
    }

    /// Replaces the effective class loader, invalidating every cached
    /// method/field resolution.
    pub fn set_class_loader(&self) {
        self.introspector.set_loader();
    }

    pub fn create_expression(&self, source: &str) -> Result<Expression<'_>, JexlError> {
        let result = crate::parser::parse_expression_with_modes(source, self.options.lexical, self.options.lexical_shade)?;
        Ok(Expression {
            engine: self,
            ast: result.ast,
            root: result.root,
            slot_count: result.scope.borrow().slot_count(),
            version_snapshot: AtomicU64::new(self.introspector.version()),
        })
    }

    pub fn create_script(&self, source: &str) -> Result<Script<'_>, JexlError> {
        let result = crate::parser::parse_script_with_modes(source, self.options.lexical, self.options.lexical_shade)?;
        Ok(Script {
            engine: self,
            ast: result.ast,
            root: result.root,
            slot_count: result.scope.borrow().slot_count(),
            version_snapshot: AtomicU64::new(self.introspector.version()),
        })
    }

    pub fn get_property(&self, obj: &Value, path: &[&str]) -> Result<Value, JexlError> {
        let mut current = obj.clone();
        for &segment in path {
            current = match crate::uberspect::property_get(&self.introspector, &current, segment, crate::error::Position::default())? {
                crate::uberspect::PropertyAccess::Found(v) => v,
                crate::uberspect::PropertyAccess::Unresolved => Value::Null,
            };
        }
        Ok(current)
    }

    pub fn set_property(&self, obj: &Value, path: &[&str], value: Value) -> Result<(), JexlError> {
        let pos = crate::error::Position::default();
        if path.len() == 1 {
            return crate::uberspect::property_set(&self.introspector, obj, path[0], value, pos);
        }
        let parent = self.get_property(obj, &path[..path.len() - 1])?;
        crate::uberspect::property_set(&self.introspector, &parent, path[path.len() - 1], value, pos)
    }
}

/// A single-value expression bound to its own AST.
pub struct Expression<'e> {
    engine: &'e Engine,
    ast: Ast,
    root: NodeId,
    slot_count: u16,
    version_snapshot: AtomicU64,
}

impl<'e> Expression<'e> {
    pub fn evaluate(&self, context: &dyn Context) -> Result<Value, JexlError> {
        self.refresh_if_stale();
        let frame = Rc::new(Frame::new(self.slot_count));
        let interpreter = Interpreter::new(
            &self.ast,
            &self.engine.introspector,
            &self.engine.namespaces,
            &self.engine.constructors,
            context,
            self.engine.options,
            CancelFlag::new(),
            frame,
        );
        interpreter.evaluate(self.root)
    }

    /// Free-variable analysis: walks
    /// the AST collecting every `ContextRef`/unresolved `Identifier`
    /// dotted path, each returned as an ordered path-component vector.
    pub fn get_variables(&self) -> Vec<Vec<String>> {
        collect_free_variables(&self.ast, self.root)
    }

    fn refresh_if_stale(&self) {
        let current = self.engine.introspector.version();
        if self.version_snapshot.load(AtomicOrdering::Acquire) != current {
            self.version_snapshot.store(current, AtomicOrdering::Release);
        }
    }
}

/// A statement sequence, possibly a lambda when constructed with
/// parameters.
pub struct Script<'e> {
    engine: &'e Engine,
    ast: Ast,
    root: NodeId,
    slot_count: u16,
    version_snapshot: AtomicU64,
}

impl<'e> Script<'e> {
    pub fn execute(&self, context: &dyn Context) -> Result<Value, JexlError> {
        self.execute_with_cancel(context, CancelFlag::new())
    }

    /// Runs with a flag obtained from `callable()`, so another thread
    /// holding the same handle can cancel this execution in flight.
    pub fn execute_cancellable(&self, context: &dyn Context, cancel: &CancelFlag) -> Result<Value, JexlError> {
        self.execute_with_cancel(context, cancel.clone())
    }

    fn execute_with_cancel(&self, context: &dyn Context, cancel: CancelFlag) -> Result<Value, JexlError> {
        let current = self.engine.introspector.version();
        if self.version_snapshot.load(AtomicOrdering::Acquire) != current {
            self.version_snapshot.store(current, AtomicOrdering::Release);
        }
        let frame = Rc::new(Frame::new(self.slot_count));
        let interpreter = Interpreter::new(
            &self.ast,
            &self.engine.introspector,
            &self.engine.namespaces,
            &self.engine.constructors,
            context,
            self.engine.options,
            cancel,
            frame,
        );
        interpreter.execute(self.root)
    }

    /// Returns a fresh cancellation handle: pass it to
    /// `execute_cancellable` on the evaluating thread, and keep a clone
    /// on another thread to call `cancel()` mid-execution.
    pub fn callable(&self) -> CancelFlag {
        CancelFlag::new()
    }

    pub fn get_variables(&self) -> Vec<Vec<String>> {
        collect_free_variables(&self.ast, self.root)
    }
}

fn collect_free_variables(ast: &Ast, root: NodeId) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    walk_free_variables(ast, root, &mut paths);
    paths
}

fn walk_free_variables(ast: &Ast, id: NodeId, out: &mut Vec<Vec<String>>) {
    let node = ast.get(id);
    match &node.kind {
        NodeKind::ContextRef(name) => out.push(vec![name.to_string()]),
        NodeKind::Identifier(name) => out.push(name.split('.').map(|s| s.to_string()).collect()),
        NodeKind::Property { target, name, .. } => {
            if let Some(mut base_path) = leading_path(ast, *target) {
                base_path.push(name.to_string());
                out.push(base_path);
            } else {
                walk_free_variables(ast, *target, out);
            }
        }
        NodeKind::Index { target, index, .. } => {
            if let (Some(mut base_path), NodeKind::StrLit(s)) = (leading_path(ast, *target), &ast.get(*index).kind) {
                base_path.push(s.to_string());
                out.push(base_path);
            } else {
                walk_free_variables(ast, *target, out);
                walk_free_variables(ast, *index, out);
            }
        }
        NodeKind::ArrayLit(items) | NodeKind::SetLit(items) => {
            for &item in items {
                walk_free_variables(ast, item, out);
            }
        }
        NodeKind::RangeLit { start, end } => {
            walk_free_variables(ast, *start, out);
            walk_free_variables(ast, *end, out);
        }
        NodeKind::MapLit(pairs) => {
            for &(k, v) in pairs {
                walk_free_variables(ast, k, out);
                walk_free_variables(ast, v, out);
            }
        }
        NodeKind::Unary { operand, .. } => walk_free_variables(ast, *operand, out),
        NodeKind::Binary { lhs, rhs, .. } | NodeKind::Coalesce { lhs, rhs } => {
            walk_free_variables(ast, *lhs, out);
            walk_free_variables(ast, *rhs, out);
        }
        NodeKind::Ternary { cond, if_true, if_false } => {
            walk_free_variables(ast, *cond, out);
            if let Some(t) = if_true {
                walk_free_variables(ast, *t, out);
            }
            walk_free_variables(ast, *if_false, out);
        }
        NodeKind::Block(stmts) => {
            for &s in stmts {
                walk_free_variables(ast, s, out);
            }
        }
        NodeKind::VarDecl { init, .. } => {
            if let Some(i) = init {
                walk_free_variables(ast, *i, out);
            }
        }
        NodeKind::Assign { target, value } => {
            walk_free_variables(ast, *target, out);
            walk_free_variables(ast, *value, out);
        }
        NodeKind::If { cond, then_branch, else_branch } => {
            walk_free_variables(ast, *cond, out);
            walk_free_variables(ast, *then_branch, out);
            if let Some(e) = else_branch {
                walk_free_variables(ast, *e, out);
            }
        }
        NodeKind::While { cond, body } | NodeKind::DoWhile { body, cond } => {
            walk_free_variables(ast, *cond, out);
            walk_free_variables(ast, *body, out);
        }
        NodeKind::ForEach { iterable, body, .. } => {
            walk_free_variables(ast, *iterable, out);
            walk_free_variables(ast, *body, out);
        }
        NodeKind::Return(Some(v)) => walk_free_variables(ast, *v, out),
        NodeKind::TryCatch { body, catch_body, .. } => {
            walk_free_variables(ast, *body, out);
            walk_free_variables(ast, *catch_body, out);
        }
        NodeKind::MethodCall { target, args, .. } | NodeKind::FunctionCall { target, args } => {
            walk_free_variables(ast, *target, out);
            for &a in args {
                walk_free_variables(ast, a, out);
            }
        }
        NodeKind::NamespaceCall { args, .. } => {
            for &a in args {
                walk_free_variables(ast, a, out);
            }
        }
        NodeKind::ConstructorCall { class, args } => {
            walk_free_variables(ast, *class, out);
            for &a in args {
                walk_free_variables(ast, a, out);
            }
        }
        NodeKind::Lambda { body, .. } => walk_free_variables(ast, *body, out),
        _ => {}
    }
}

/// If `id` is (transitively) a `ContextRef`/`Identifier` with no further
/// computation, returns its path components so a caller can extend it
/// with one more segment (supporting `Engine.get_variables`' string-
/// literal sub-access collapsing, e.g. `a['b'].c` reads as `["a","b","c"]`).
fn leading_path(ast: &Ast, id: NodeId) -> Option<Vec<String>> {
    match &ast.get(id).kind {
        NodeKind::ContextRef(name) => Some(vec![name.to_string()]),
        NodeKind::Identifier(name) => Some(name.split('.').map(|s| s.to_string()).collect()),
        NodeKind::Property { target, name, .. } => {
            let mut base = leading_path(ast, *target)?;
            base.push(name.to_string());
            Some(base)
        }
        NodeKind::Index { target, index, .. } => {
            let mut base = leading_path(ast, *target)?;
            if let NodeKind::StrLit(s) = &ast.get(*index).kind {
                base.push(s.to_string());
                Some(base)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MapContext;

    #[test]
    fn test_evaluate_basic_arithmetic() {
        let engine = Engine::new(Permissions::unrestricted(), Options::default());
        let expr = engine.create_expression("2 + 3 * 4").unwrap();
        let ctx = MapContext::new();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Int64(14));
    }

    #[test]
    fn test_script_with_free_variable() {
        let engine = Engine::new(Permissions::unrestricted(), Options::default());
        let script = engine.create_script("a + 1;").unwrap();
        let vars = script.get_variables();
        assert_eq!(vars, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_lexical_scope_scenario() {
        let engine = Engine::new(Permissions::unrestricted(), Options::default());
        let script = engine
            .create_script("var y = 42; for (var x : [5,17,20]) { if (x > 10) return x } y;")
            .unwrap();
        let ctx = MapContext::new();
        assert_eq!(script.execute(&ctx).unwrap(), Value::Int64(17));
        assert!(script.get_variables().is_empty());
    }

    #[test]
    fn test_set_class_loader_bumps_version() {
        let engine = Engine::new(Permissions::unrestricted(), Options::default());
        let v0 = engine.introspector_version();
        engine.set_class_loader();
        assert_eq!(engine.introspector_version(), v0 + 1);
    }

    #[test]
    fn test_range_literal_materializes_array() {
        let engine = Engine::new(Permissions::unrestricted(), Options::default());
        let expr = engine.create_expression("1..5").unwrap();
        let ctx = MapContext::new();
        let r = expr.evaluate(&ctx).unwrap();
        assert_eq!(r, Value::array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3), Value::Int64(4)]));
    }

    #[test]
    fn test_new_instance_via_registered_constructor() {
        let mut constructors = ClassRegistry::new();
        constructors.register("Point", std::rc::Rc::new(|args| Ok(Value::Int64(args.len() as i64))));
        let engine = Engine::new(Permissions::unrestricted(), Options::default()).with_constructors(constructors);
        let r = engine.new_instance("Point", &[Value::Int64(1), Value::Int64(2)]).unwrap();
        assert_eq!(r, Value::Int64(2));
    }

    #[test]
    fn test_constructor_call_through_script() {
        let mut constructors = ClassRegistry::new();
        constructors.register("Point", std::rc::Rc::new(|args| Ok(Value::Int64(args.len() as i64))));
        let engine = Engine::new(Permissions::unrestricted(), Options::default()).with_constructors(constructors);
        let expr = engine.create_expression("new('Point', 1, 2)").unwrap();
        let ctx = MapContext::new();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Int64(2));
    }
}
