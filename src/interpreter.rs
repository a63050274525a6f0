// ABOUTME: Tree-walking visitor implementing control flow, dispatch, and evaluation modes

use crate::arithmetic::{self, MathConfig};
use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, UnaryOp};
use crate::closure::{clone_on_escape, Closure, Escape};
use crate::context::Context;
use crate::error::{JexlError, Position};
use crate::introspector::Introspector;
use crate::namespaces::{ConstructorRegistry, NamespaceResolver};
use crate::scope::Frame;
use crate::uberspect;
use crate::value::Value;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Evaluation-mode bits recognized by the engine builder.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub strict: bool,
    pub silent: bool,
    pub safe: bool,
    pub cancellable: bool,
    pub lexical: bool,
    pub lexical_shade: bool,
    pub antish: bool,
    /// When set, `+` never falls back to string concatenation: a string
    /// operand is coerced to a number if it parses as one, else the
    /// operation errors.
    pub strict_arithmetic: bool,
    /// Precision/rounding/scale for `/`. Left at `MathConfig::default()`,
    /// division returns `Float64`; once configured, it widens to `BigDec`.
    pub math_context: MathConfig,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            strict: true,
            silent: false,
            safe: false,
            cancellable: false,
            lexical: false,
            lexical_shade: false,
            antish: true,
            strict_arithmetic: false,
            math_context: MathConfig::default(),
        }
    }
}

/// Non-local control outcomes: exception-driven control flow rephrased
/// as tagged control outcomes the interpreter returns up the visitor
/// stack, converted to host errors only at the `Script`/`Expression`
/// boundary.
#[derive(Debug, Clone)]
pub enum Flow {
    Normal(Value),
    Break,
    Continue,
    Return(Value),
}

impl Flow {
    fn value(self) -> Value {
        match self {
            Flow::Normal(v) | Flow::Return(v) => v,
            Flow::Break | Flow::Continue => Value::Null,
        }
    }
}

/// Shared atomic cancellation flag exposed to host threads via
/// `Script::callable()`, checked at statement and loop boundaries for
/// coroutine-like cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

pub struct Interpreter<'a> {
    pub ast: &'a Ast,
    pub introspector: &'a Introspector,
    pub namespaces: &'a dyn NamespaceResolver,
    pub constructors: &'a dyn ConstructorRegistry,
    pub context: &'a dyn Context,
    pub options: Options,
    pub cancel: CancelFlag,
    frame: Rc<Frame>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        ast: &'a Ast,
        introspector: &'a Introspector,
        namespaces: &'a dyn NamespaceResolver,
        constructors: &'a dyn ConstructorRegistry,
        context: &'a dyn Context,
        options: Options,
        cancel: CancelFlag,
        frame: Rc<Frame>,
    ) -> Self {
        Interpreter {
            ast,
            introspector,
            namespaces,
            constructors,
            context,
            options,
            cancel,
            frame,
        }
    }

    /// Entry point for `Expression::evaluate`: a single value-producing
    /// node, control-flow outcomes are programmer error at this level.
    pub fn evaluate(&self, id: NodeId) -> Result<Value, JexlError> {
        log::debug!("evaluate: root node {:?}", id);
        let result = self.visit(id)?.value();
        log::trace!("evaluate: result {:?}", result);
        Ok(result)
    }

    /// Entry point for `Script::execute`: the root is a `Block`, whose
    /// last statement's value (or an early `return`) is the result.
    pub fn execute(&self, id: NodeId) -> Result<Value, JexlError> {
        log::debug!("execute: root node {:?}", id);
        match self.visit(id)? {
            Flow::Return(v) => Ok(v),
            Flow::Normal(v) => Ok(v),
            Flow::Break | Flow::Continue => Err(JexlError::Internal("break/continue outside loop".into())),
        }
    }

    fn check_cancel(&self, pos: Position) -> Result<(), JexlError> {
        if self.cancel.is_cancelled() {
            if self.options.cancellable {
                return Err(JexlError::Internal(format!("cancelled at {}", pos)));
            }
        }
        Ok(())
    }

    /// Evaluates a condition position (ternary/coalesce) with unresolved-
    /// reference errors swallowed to `Null` rather than propagated, so
    /// `foo.bar ? 1 : 2` short-circuits to the `false` branch instead of
    /// raising just because `foo` doesn't resolve.
    fn visit_protected(&self, id: NodeId) -> Result<Flow, JexlError> {
        match self.visit(id) {
            Ok(flow) => Ok(flow),
            Err(e) if is_unresolved_reference(&e) => Ok(Flow::Normal(Value::Null)),
            Err(e) => Err(e),
        }
    }

    fn visit(&self, id: NodeId) -> Result<Flow, JexlError> {
        let node = self.ast.get(id);
        let pos = node.pos;
        self.check_cancel(pos)?;
        log::trace!("visit {:?} at {}", std::mem::discriminant(&node.kind), pos);
        match &node.kind {
            NodeKind::NullLit => Ok(Flow::Normal(Value::Null)),
            NodeKind::BoolLit(b) => Ok(Flow::Normal(Value::Bool(*b))),
            NodeKind::IntLit(i) => Ok(Flow::Normal(Value::Int64(*i))),
            NodeKind::FloatLit(f) => Ok(Flow::Normal(Value::Float64(*f))),
            NodeKind::BigIntLit(b) => Ok(Flow::Normal(Value::BigInt((**b).clone()))),
            NodeKind::BigDecLit(b) => Ok(Flow::Normal(Value::BigDec((**b).clone()))),
            NodeKind::StrLit(s) => Ok(Flow::Normal(Value::Str(s.clone()))),
            NodeKind::ArrayLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for &item in items {
                    values.push(self.visit(item)?.value());
                }
                Ok(Flow::Normal(Value::array(values)))
            }
            NodeKind::MapLit(pairs) => {
                let mut map = indexmap::IndexMap::new();
                for &(k, v) in pairs {
                    let key = self.visit(k)?.value();
                    let value = self.visit(v)?.value();
                    map.insert(key, value);
                }
                Ok(Flow::Normal(Value::Map(Rc::new(map))))
            }
            NodeKind::SetLit(items) => {
                let mut set = indexmap::IndexSet::new();
                for &item in items {
                    set.insert(self.visit(item)?.value());
                }
                Ok(Flow::Normal(Value::Set(Rc::new(set))))
            }
            NodeKind::RangeLit { start, end } => {
                let s = self.visit(*start)?.value();
                let e = self.visit(*end)?.value();
                match (&s, &e) {
                    (Value::Int64(a), Value::Int64(b)) => Ok(Flow::Normal(Value::array((*a..*b).map(Value::Int64).collect()))),
                    _ => Err(JexlError::coercion(s.type_name(), "int", pos)),
                }
            }

            NodeKind::LocalRef { depth, slot, name } => {
                if self.options.lexical_shade && !self.frame.is_assigned(*depth, *slot) {
                    return Err(JexlError::unknown_variable(name.to_string(), pos));
                }
                Ok(Flow::Normal(self.frame.get(*depth, *slot)))
            }
            NodeKind::ContextRef(name) => self.resolve_context(name, pos, false),
            NodeKind::Identifier(name) => self.resolve_antish(name, pos),

            NodeKind::Property { target, name, safe } => {
                let base = self.visit(*target)?.value();
                if base.is_null() && (*safe || self.options.safe) {
                    return Ok(Flow::Normal(Value::Null));
                }
                match uberspect::property_get(self.introspector, &base, name, pos)? {
                    uberspect::PropertyAccess::Found(v) => Ok(Flow::Normal(v)),
                    uberspect::PropertyAccess::Unresolved => self.unresolved_property(&base, name, pos),
                }
            }
            NodeKind::Index { target, index, safe } => {
                let base = self.visit(*target)?.value();
                if base.is_null() && (*safe || self.options.safe) {
                    return Ok(Flow::Normal(Value::Null));
                }
                let idx = self.visit(*index)?.value();
                self.index_get(&base, &idx, pos)
            }
            NodeKind::MethodCall { target, name, args, safe } => {
                let base = self.visit(*target)?.value();
                if base.is_null() && (*safe || self.options.safe) {
                    return Ok(Flow::Normal(Value::Null));
                }
                let mut values = Vec::with_capacity(args.len());
                for &a in args {
                    values.push(self.visit(a)?.value());
                }
                match uberspect::method_call(self.introspector, &base, name, &values, pos, Some(&node.executor_cache)) {
                    Ok(v) => Ok(Flow::Normal(v)),
                    Err(e) => self.handle_lookup_error(e),
                }
            }
            NodeKind::FunctionCall { target, args } => {
                let callee = self.visit(*target)?.value();
                let mut values = Vec::with_capacity(args.len());
                for &a in args {
                    values.push(self.visit(a)?.value());
                }
                self.invoke(&callee, &values, pos)
            }
            NodeKind::NamespaceCall { namespace, name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for &a in args {
                    values.push(self.visit(a)?.value());
                }
                match crate::namespaces::call(self.namespaces, namespace, name, &values, pos) {
                    Ok(v) => Ok(Flow::Normal(v)),
                    Err(e) => self.handle_lookup_error(e),
                }
            }
            NodeKind::ConstructorCall { class, args } => {
                let class_value = self.visit(*class)?.value();
                let class_name = match &class_value {
                    Value::Str(s) => s.to_string(),
                    other => return Err(JexlError::coercion(other.type_name(), "class name", pos)),
                };
                let mut values = Vec::with_capacity(args.len());
                for &a in args {
                    values.push(self.visit(a)?.value());
                }
                if !self.introspector.get_constructor(&class_name) {
                    return self.handle_lookup_error(JexlError::unknown_method(class_name, "new", arg_type_list(&values), pos));
                }
                match self.constructors.construct(&class_name, &values) {
                    Some(result) => match result {
                        Ok(v) => Ok(Flow::Normal(v)),
                        Err(e) => self.handle_lookup_error(e),
                    },
                    None => self.handle_lookup_error(JexlError::unknown_method(class_name, "new", arg_type_list(&values), pos)),
                }
            }

            NodeKind::Unary { op, operand } => {
                let v = self.visit(*operand)?.value();
                match op {
                    UnaryOp::Not => Ok(Flow::Normal(Value::Bool(!v.is_truthy()))),
                    UnaryOp::Neg => Ok(Flow::Normal(arithmetic::neg(&v, pos)?)),
                }
            }
            NodeKind::Binary { op, lhs, rhs } => self.visit_binary(*op, *lhs, *rhs, pos),
            NodeKind::Ternary { cond, if_true, if_false } => {
                let c = self.visit_protected(*cond)?.value();
                if c.is_truthy() {
                    match if_true {
                        Some(t) => self.visit(*t),
                        None => Ok(Flow::Normal(c)),
                    }
                } else {
                    self.visit(*if_false)
                }
            }
            NodeKind::Coalesce { lhs, rhs } => {
                let l = self.visit_protected(*lhs)?.value();
                if l.is_null() {
                    self.visit(*rhs)
                } else {
                    Ok(Flow::Normal(l))
                }
            }

            NodeKind::Block(stmts) => self.visit_block(stmts),
            NodeKind::VarDecl { slot, init } => {
                let v = match init {
                    Some(e) => self.visit(*e)?.value(),
                    None => Value::Null,
                };
                self.frame.set(0, *slot, v.clone());
                Ok(Flow::Normal(v))
            }
            NodeKind::Assign { target, value } => {
                let v = self.visit(*value)?.value();
                self.assign(*target, v.clone(), pos)?;
                Ok(Flow::Normal(v))
            }
            NodeKind::If { cond, then_branch, else_branch } => {
                let c = self.visit(*cond)?.value();
                if c.is_truthy() {
                    self.visit(*then_branch)
                } else if let Some(e) = else_branch {
                    self.visit(*e)
                } else {
                    Ok(Flow::Normal(Value::Null))
                }
            }
            NodeKind::While { cond, body } => {
                let mut last = Value::Null;
                while self.visit(*cond)?.value().is_truthy() {
                    self.check_cancel(pos)?;
                    match self.visit(*body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal(_) => {}
                        r @ Flow::Return(_) => return Ok(r),
                    }
                    last = Value::Null;
                }
                Ok(Flow::Normal(last))
            }
            NodeKind::DoWhile { body, cond } => {
                loop {
                    self.check_cancel(pos)?;
                    match self.visit(*body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal(_) => {}
                        r @ Flow::Return(_) => return Ok(r),
                    }
                    if !self.visit(*cond)?.value().is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            NodeKind::ForEach { slot, iterable, body } => self.visit_for_each(*slot, *iterable, *body, pos),
            NodeKind::Break => Ok(Flow::Break),
            NodeKind::Continue => Ok(Flow::Continue),
            NodeKind::Return(value) => {
                let v = match value {
                    Some(e) => self.visit(*e)?.value(),
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            NodeKind::TryCatch { body, catch_slot, catch_body } => match self.visit(*body) {
                Ok(flow) => Ok(flow),
                Err(e) if e.is_catchable() => {
                    if let Some(slot) = catch_slot {
                        let caught = match &e {
                            JexlError::ThrownByHost { value, .. } => value.clone(),
                            other => Value::str(other.to_string()),
                        };
                        self.frame.set(0, *slot, caught);
                    }
                    self.visit(*catch_body)
                }
                Err(e) => Err(e),
            },

            NodeKind::Lambda { param_slots, variadic, body } => {
                let closure = Closure::new(param_slots.len(), *variadic, *body, self.frame.clone());
                let escaped = clone_on_escape(&closure, Escape::Escaping);
                Ok(Flow::Normal(Value::Callable(escaped)))
            }
        }
    }

    fn visit_block(&self, stmts: &[NodeId]) -> Result<Flow, JexlError> {
        let mut last = Value::Null;
        for &stmt in stmts {
            match self.visit(stmt)? {
                Flow::Normal(v) => last = v,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn visit_for_each(&self, slot: u16, iterable: NodeId, body: NodeId, pos: Position) -> Result<Flow, JexlError> {
        let collection = self.visit(iterable)?.value();
        let items: Vec<Value> = match &collection {
            Value::Array(a) => a.as_ref().clone(),
            Value::Set(s) => s.iter().cloned().collect(),
            // Iterates values, not entries; use .entries() for key/value pairs.
            Value::Map(m) => m.values().cloned().collect(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Null => Vec::new(),
            other => return Err(JexlError::coercion(other.type_name(), "iterable", pos)),
        };
        for item in items {
            self.check_cancel(pos)?;
            self.frame.set(0, slot, item);
            match self.visit(body)? {
                Flow::Break => break,
                Flow::Continue | Flow::Normal(_) => {}
                r @ Flow::Return(_) => return Ok(r),
            }
        }
        Ok(Flow::Normal(Value::Null))
    }

    fn visit_binary(&self, op: BinaryOp, lhs: NodeId, rhs: NodeId, pos: Position) -> Result<Flow, JexlError> {
        match op {
            BinaryOp::And => {
                let l = self.visit(lhs)?.value();
                if !l.is_truthy() {
                    return Ok(Flow::Normal(l));
                }
                let r = self.visit(rhs)?.value();
                Ok(Flow::Normal(match (&l, &r) {
                    (Value::Bool(_), Value::Bool(b)) => Value::Bool(*b),
                    _ => r,
                }))
            }
            BinaryOp::Or => {
                let l = self.visit(lhs)?.value();
                if l.is_truthy() {
                    return Ok(Flow::Normal(l));
                }
                Ok(Flow::Normal(self.visit(rhs)?.value()))
            }
            _ => {
                let l = self.visit(lhs)?.value();
                let r = self.visit(rhs)?.value();
                if self.options.strict && (l.is_null() || r.is_null()) && is_strict_null_sensitive(op) {
                    return Err(JexlError::NullOperand(pos));
                }
                Ok(Flow::Normal(self.binary_value(op, &l, &r, pos)?))
            }
        }
    }

    fn binary_value(&self, op: BinaryOp, l: &Value, r: &Value, pos: Position) -> Result<Value, JexlError> {
        use BinaryOp::*;
        match op {
            Add => arithmetic::add(l, r, pos, self.options.strict_arithmetic),
            Sub => arithmetic::sub(l, r, pos),
            Mul => arithmetic::mul(l, r, pos),
            Div => arithmetic::div(l, r, pos, self.options.math_context),
            IntDiv => arithmetic::div_int(l, r, pos),
            Mod => arithmetic::modulo(l, r, pos),
            Eq => Ok(Value::Bool(l == r)),
            Ne => Ok(Value::Bool(l != r)),
            Lt => Ok(Value::Bool(arithmetic::compare(l, r, pos)?.is_lt())),
            Le => Ok(Value::Bool(arithmetic::compare(l, r, pos)?.is_le())),
            Gt => Ok(Value::Bool(arithmetic::compare(l, r, pos)?.is_gt())),
            Ge => Ok(Value::Bool(arithmetic::compare(l, r, pos)?.is_ge())),
            Matches => match (l, r) {
                (Value::Str(s), Value::Str(p)) => Ok(Value::Bool(arithmetic::glob_matches(s, p))),
                _ => Err(JexlError::coercion(l.type_name(), "string", pos)),
            },
            In => Ok(Value::Bool(arithmetic::contains(r, l))),
            BitAnd => Ok(arithmetic::bit_and(l, r)),
            BitOr => Ok(arithmetic::bit_or(l, r)),
            BitXor => Ok(arithmetic::bit_xor(l, r)),
            Shl => Ok(arithmetic::shl(l, r)),
            Shr => Ok(arithmetic::shr(l, r)),
            And | Or => unreachable!("handled in visit_binary"),
        }
    }

    fn index_get(&self, base: &Value, index: &Value, pos: Position) -> Result<Flow, JexlError> {
        match base {
            Value::Array(a) => match index {
                Value::Int64(i) => {
                    let idx = if *i < 0 { (a.len() as i64 + i) as usize } else { *i as usize };
                    a.get(idx).cloned().map(Flow::Normal).ok_or(JexlError::IndexOutOfRange(pos))
                }
                _ => Err(JexlError::coercion(index.type_name(), "int", pos)),
            },
            Value::Map(m) => Ok(Flow::Normal(m.get(index).cloned().unwrap_or(Value::Null))),
            Value::Str(s) => match index {
                Value::Int64(i) => s
                    .chars()
                    .nth(*i as usize)
                    .map(|c| Flow::Normal(Value::str(c.to_string())))
                    .ok_or(JexlError::IndexOutOfRange(pos)),
                _ => Err(JexlError::coercion(index.type_name(), "int", pos)),
            },
            Value::Object(o) => match o.index_get(index) {
                Some(v) => Ok(Flow::Normal(v)),
                None => Err(JexlError::unknown_property(o.class_name(), &index.to_string(), pos)),
            },
            _ => Err(JexlError::coercion(base.type_name(), "indexable", pos)),
        }
    }

    fn invoke(&self, callee: &Value, args: &[Value], pos: Position) -> Result<Flow, JexlError> {
        match callee {
            Value::Callable(closure) => {
                let param_count = closure.param_count as u16;
                let child = Rc::new(Frame::with_parent(closure.captured.clone(), param_count));
                for (i, arg) in args.iter().take(closure.param_count).enumerate() {
                    child.set(0, i as u16, arg.clone());
                }
                let sub = Interpreter {
                    ast: self.ast,
                    introspector: self.introspector,
                    namespaces: self.namespaces,
                    constructors: self.constructors,
                    context: self.context,
                    options: self.options,
                    cancel: self.cancel.clone(),
                    frame: child,
                };
                match sub.visit(closure.body)? {
                    Flow::Return(v) => Ok(Flow::Normal(v)),
                    Flow::Normal(v) => Ok(Flow::Normal(v)),
                    Flow::Break | Flow::Continue => Err(JexlError::Internal("break/continue escaped lambda body".into())),
                }
            }
            Value::NativeFn(_, f) => Ok(Flow::Normal(f(args)?)),
            _ => Err(JexlError::unknown_method(callee.type_name(), "call", args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(","), pos)),
        }
    }

    fn assign(&self, target: NodeId, value: Value, pos: Position) -> Result<(), JexlError> {
        let node = self.ast.get(target);
        match &node.kind {
            NodeKind::LocalRef { depth, slot, .. } => {
                self.frame.set(*depth, *slot, value);
                Ok(())
            }
            NodeKind::ContextRef(name) => self
                .context
                .set(name, value)
                .map_err(|_| JexlError::AssignmentToReadonly(pos)),
            NodeKind::Property { target: base, name, .. } => {
                let obj = self.visit(*base)?.value();
                match &obj {
                    Value::Map(m) => {
                        let mut new_map = (**m).clone();
                        new_map.insert(Value::str(name.as_ref()), value);
                        self.assign(*base, Value::Map(Rc::new(new_map)), pos)
                    }
                    _ => uberspect::property_set(self.introspector, &obj, name, value, pos),
                }
            }
            NodeKind::Index { target: base, index, .. } => {
                let obj = self.visit(*base)?.value();
                let idx = self.visit(*index)?.value();
                match &obj {
                    Value::Array(a) => {
                        let mut new_arr = (**a).clone();
                        if let Value::Int64(i) = idx {
                            let i = i as usize;
                            if i < new_arr.len() {
                                new_arr[i] = value;
                                self.assign(*base, Value::array(new_arr), pos)
                            } else {
                                Err(JexlError::IndexOutOfRange(pos))
                            }
                        } else {
                            Err(JexlError::coercion(idx.type_name(), "int", pos))
                        }
                    }
                    Value::Map(m) => {
                        let mut new_map = (**m).clone();
                        new_map.insert(idx, value);
                        self.assign(*base, Value::Map(Rc::new(new_map)), pos)
                    }
                    Value::Object(o) => {
                        match o.index_set(&idx, value) {
                            Some(true) => Ok(()),
                            _ => Err(JexlError::AssignmentToReadonly(pos)),
                        }
                    }
                    _ => Err(JexlError::AssignmentToReadonly(pos)),
                }
            }
            NodeKind::Identifier(name) => {
                if self.options.antish {
                    self.context.set(name, value).map_err(|_| JexlError::AssignmentToReadonly(pos))
                } else {
                    Err(JexlError::unknown_variable(name.as_ref(), pos))
                }
            }
            _ => Err(JexlError::AssignmentToReadonly(pos)),
        }
    }

    /// "antish variables": progressively try the dotted name
    /// as a single context key, then shorter prefixes with the tail as
    /// a property chain.
    fn resolve_antish(&self, name: &str, pos: Position) -> Result<Flow, JexlError> {
        if self.context.has(name) {
            return Ok(Flow::Normal(self.context.get(name).unwrap_or(Value::Null)));
        }
        if let Some(dot) = name.rfind('.') {
            let (prefix, tail) = (&name[..dot], &name[dot + 1..]);
            if let Flow::Normal(base) = self.resolve_antish(prefix, pos)? {
                if !base.is_null() {
                    return match uberspect::property_get(self.introspector, &base, tail, pos)? {
                        uberspect::PropertyAccess::Found(v) => Ok(Flow::Normal(v)),
                        uberspect::PropertyAccess::Unresolved => self.unresolved_property(&base, tail, pos),
                    };
                }
            }
        }
        self.resolve_context(name, pos, true)
    }

    fn resolve_context(&self, name: &str, pos: Position, is_antish: bool) -> Result<Flow, JexlError> {
        if self.context.has(name) {
            return Ok(Flow::Normal(self.context.get(name).unwrap_or(Value::Null)));
        }
        if self.options.safe && is_antish {
            return Ok(Flow::Normal(Value::Null));
        }
        if self.options.silent || !self.options.strict {
            return Ok(Flow::Normal(Value::Null));
        }
        Err(JexlError::unknown_variable(name, pos))
    }

    fn unresolved_property(&self, base: &Value, name: &str, pos: Position) -> Result<Flow, JexlError> {
        let class = if let Value::Object(o) = base { o.class_name() } else { base.type_name() };
        self.handle_lookup_error(JexlError::unknown_property(class, name, pos))
    }

    fn handle_lookup_error(&self, err: JexlError) -> Result<Flow, JexlError> {
        if (self.options.silent || self.options.safe) && is_unresolved_reference(&err) {
            Ok(Flow::Normal(Value::Null))
        } else {
            Err(err)
        }
    }
}

fn arg_type_list(args: &[Value]) -> String {
    args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(",")
}

fn is_unresolved_reference(err: &JexlError) -> bool {
    matches!(
        err,
        JexlError::UnknownVariable { .. } | JexlError::UnknownMethod { .. } | JexlError::UnknownProperty { .. }
    )
}

fn is_strict_null_sensitive(op: BinaryOp) -> bool {
    use BinaryOp::*;
    matches!(op, Add | Sub | Mul | Div | IntDiv | Mod | Lt | Le | Gt | Ge | BitAnd | BitOr | BitXor | Shl | Shr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, NodeKind};
    use crate::context::MapContext;
    use crate::error::Position;
    use crate::namespaces::{default_registry, ClassRegistry};
    use crate::permissions::Permissions;
    use crate::scope::Frame;

    fn run(ast: &Ast, root: NodeId, context: &dyn Context) -> Result<Value, JexlError> {
        let introspector = Introspector::new(Permissions::unrestricted());
        let namespaces = default_registry();
        let constructors = ClassRegistry::new();
        let interpreter = Interpreter::new(
            ast,
            &introspector,
            &namespaces,
            &constructors,
            context,
            Options::default(),
            CancelFlag::new(),
            Rc::new(Frame::new(4)),
        );
        interpreter.execute(root)
    }

    #[test]
    fn test_arithmetic_precedence() {
        let mut ast = Ast::new();
        let two = ast.push(NodeKind::IntLit(2), Position::default());
        let three = ast.push(NodeKind::IntLit(3), Position::default());
        let four = ast.push(NodeKind::IntLit(4), Position::default());
        let mul = ast.push(NodeKind::Binary { op: BinaryOp::Mul, lhs: three, rhs: four }, Position::default());
        let add = ast.push(NodeKind::Binary { op: BinaryOp::Add, lhs: two, rhs: mul }, Position::default());
        let block = ast.push(NodeKind::Block(vec![add]), Position::default());
        let ctx = MapContext::new();
        assert_eq!(run(&ast, block, &ctx).unwrap(), Value::Int64(14));
    }

    #[test]
    fn test_short_circuit_and() {
        let mut ast = Ast::new();
        let f = ast.push(NodeKind::BoolLit(false), Position::default());
        let t = ast.push(NodeKind::BoolLit(true), Position::default());
        let and = ast.push(NodeKind::Binary { op: BinaryOp::And, lhs: f, rhs: t }, Position::default());
        let block = ast.push(NodeKind::Block(vec![and]), Position::default());
        let ctx = MapContext::new();
        assert_eq!(run(&ast, block, &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_ternary() {
        let mut ast = Ast::new();
        let cond = ast.push(NodeKind::BoolLit(true), Position::default());
        let a = ast.push(NodeKind::IntLit(1), Position::default());
        let b = ast.push(NodeKind::IntLit(2), Position::default());
        let tern = ast.push(NodeKind::Ternary { cond, if_true: Some(a), if_false: b }, Position::default());
        let block = ast.push(NodeKind::Block(vec![tern]), Position::default());
        let ctx = MapContext::new();
        assert_eq!(run(&ast, block, &ctx).unwrap(), Value::Int64(1));
    }

    #[test]
    fn test_coalesce_with_null() {
        let mut ast = Ast::new();
        let n = ast.push(NodeKind::NullLit, Position::default());
        let fallback = ast.push(NodeKind::IntLit(9), Position::default());
        let co = ast.push(NodeKind::Coalesce { lhs: n, rhs: fallback }, Position::default());
        let block = ast.push(NodeKind::Block(vec![co]), Position::default());
        let ctx = MapContext::new();
        assert_eq!(run(&ast, block, &ctx).unwrap(), Value::Int64(9));
    }

    #[test]
    fn test_for_each_with_early_return() {
        let mut ast = Ast::new();
        let y_init = ast.push(NodeKind::IntLit(42), Position::default());
        let y_decl = ast.push(NodeKind::VarDecl { slot: 0, init: Some(y_init) }, Position::default());

        let items = vec![
            ast.push(NodeKind::IntLit(5), Position::default()),
            ast.push(NodeKind::IntLit(17), Position::default()),
            ast.push(NodeKind::IntLit(20), Position::default()),
        ];
        let arr = ast.push(NodeKind::ArrayLit(items), Position::default());

        let x_ref = ast.push(NodeKind::LocalRef { depth: 0, slot: 1, name: "x".into() }, Position::default());
        let ten = ast.push(NodeKind::IntLit(10), Position::default());
        let cmp = ast.push(NodeKind::Binary { op: BinaryOp::Gt, lhs: x_ref, rhs: ten }, Position::default());
        let x_ref2 = ast.push(NodeKind::LocalRef { depth: 0, slot: 1, name: "x".into() }, Position::default());
        let ret = ast.push(NodeKind::Return(Some(x_ref2)), Position::default());
        let if_node = ast.push(NodeKind::If { cond: cmp, then_branch: ret, else_branch: None }, Position::default());
        let body = ast.push(NodeKind::Block(vec![if_node]), Position::default());
        let for_each = ast.push(NodeKind::ForEach { slot: 1, iterable: arr, body }, Position::default());

        let y_ref = ast.push(NodeKind::LocalRef { depth: 0, slot: 0, name: "y".into() }, Position::default());
        let block = ast.push(NodeKind::Block(vec![y_decl, for_each, y_ref]), Position::default());

        let ctx = MapContext::new();
        assert_eq!(run(&ast, block, &ctx).unwrap(), Value::Int64(17));
    }

    #[test]
    fn test_unknown_variable_strict_errors() {
        let mut ast = Ast::new();
        let id = ast.push(NodeKind::Identifier("nope".into()), Position::default());
        let block = ast.push(NodeKind::Block(vec![id]), Position::default());
        let ctx = MapContext::new();
        assert!(run(&ast, block, &ctx).is_err());
    }

    #[test]
    fn test_property_access_through_map() {
        let mut ast = Ast::new();
        let ctx = MapContext::new();
        let mut inner = indexmap::IndexMap::new();
        inner.insert(Value::str("bar"), Value::Int64(20));
        let mut outer = indexmap::IndexMap::new();
        outer.insert(Value::str("foo"), Value::Map(Rc::new(inner)));
        ctx.insert("root", Value::Map(Rc::new(outer)));

        let root_ref = ast.push(NodeKind::ContextRef("root".into()), Position::default());
        let prop = ast.push(NodeKind::Property { target: root_ref, name: "foo".into(), safe: false }, Position::default());
        let prop2 = ast.push(NodeKind::Property { target: prop, name: "bar".into(), safe: false }, Position::default());
        let block = ast.push(NodeKind::Block(vec![prop2]), Position::default());
        assert_eq!(run(&ast, block, &ctx).unwrap(), Value::Int64(20));
    }
}
