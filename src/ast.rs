// ABOUTME: Arena-indexed abstract syntax tree for expressions and scripts

use crate::error::Position;
use std::cell::Cell;
use std::rc::Rc;

/// Index into an `Ast`'s node arena, used instead of an `Rc`-linked
/// tree shape: JEXL ASTs are built once by the parser and never mutated
/// or shared cyclically, so plain `u32` indices into a flat `Vec<Node>`
/// avoid the `Rc<RefCell<_>>` bookkeeping a cyclic-capable tree would
/// need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// A cached overload resolution for a `MethodCall` node: the
/// introspector version it was resolved under, and the winning
/// overload index. Stale once `Introspector::version()` moves past
/// `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedExecutor {
    pub version: u64,
    pub overload_index: usize,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Position,
    /// Set once by the constant-folding pass for literal subtrees with
    /// no variable references; lets the interpreter skip re-evaluating
    /// purely literal array/map/set contents. Not required for
    /// correctness, only an optimization hint.
    pub constant: bool,
    /// Single-slot method-resolution cache consulted by
    /// `uberspect::method_call`, invalidated whenever its recorded
    /// version no longer matches `Introspector::version()`.
    pub executor_cache: Cell<Option<CachedExecutor>>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    // --- literals ---
    NullLit,
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    BigIntLit(Rc<num_bigint::BigInt>),
    BigDecLit(Rc<bigdecimal::BigDecimal>),
    StrLit(Rc<str>),
    ArrayLit(Vec<NodeId>),
    MapLit(Vec<(NodeId, NodeId)>),
    SetLit(Vec<NodeId>),
    /// `a..b` range literal; materializes to an `Array` of integers.
    RangeLit { start: NodeId, end: NodeId },

    // --- references ---
    /// Resolved slot in the enclosing `Frame`; `depth` counts how many
    /// parent frames to walk up, precomputed at parse time instead of
    /// walked by name at eval time.
    LocalRef { depth: u16, slot: u16, name: Rc<str> },
    /// A name with no compile-time binding: resolved against the
    /// `Context` at eval time.
    ContextRef(Rc<str>),
    /// `a.b.c` antish-or-dotted chain: first segment resolves via
    /// `LocalRef`/`ContextRef` rules, remaining segments are property
    /// accesses.
    Identifier(Rc<str>),

    // --- access ---
    Property { target: NodeId, name: Rc<str>, safe: bool },
    Index { target: NodeId, index: NodeId, safe: bool },
    MethodCall { target: NodeId, name: Rc<str>, args: Vec<NodeId>, safe: bool },
    FunctionCall { target: NodeId, args: Vec<NodeId> },
    NamespaceCall { namespace: Rc<str>, name: Rc<str>, args: Vec<NodeId> },
    /// `new(className, args...)` host object construction.
    ConstructorCall { class: NodeId, args: Vec<NodeId> },

    // --- operators ---
    Unary { op: UnaryOp, operand: NodeId },
    Binary { op: BinaryOp, lhs: NodeId, rhs: NodeId },
    Ternary { cond: NodeId, if_true: Option<NodeId>, if_false: NodeId },
    /// `??` null-coalescing.
    Coalesce { lhs: NodeId, rhs: NodeId },

    // --- control (scripts only) ---
    Block(Vec<NodeId>),
    VarDecl { slot: u16, init: Option<NodeId> },
    Assign { target: NodeId, value: NodeId },
    If { cond: NodeId, then_branch: NodeId, else_branch: Option<NodeId> },
    While { cond: NodeId, body: NodeId },
    DoWhile { body: NodeId, cond: NodeId },
    ForEach { slot: u16, iterable: NodeId, body: NodeId },
    Break,
    Continue,
    Return(Option<NodeId>),
    TryCatch { body: NodeId, catch_slot: Option<u16>, catch_body: NodeId },

    // --- functions ---
    Lambda { param_slots: Vec<u16>, variadic: bool, body: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Matches,
    In,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// Flat arena owning every node in a parsed expression or script.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    pub root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn push(&mut self, kind: NodeKind, pos: Position) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            pos,
            constant: false,
            executor_cache: Cell::new(None),
        });
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn mark_constant(&mut self, id: NodeId) {
        self.nodes[id.0 as usize].constant = true;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get_roundtrip() {
        let mut ast = Ast::new();
        let id = ast.push(NodeKind::IntLit(42), Position::new(1, 1));
        match ast.get(id).kind {
            NodeKind::IntLit(n) => assert_eq!(n, 42),
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_mark_constant() {
        let mut ast = Ast::new();
        let id = ast.push(NodeKind::BoolLit(true), Position::default());
        assert!(!ast.get(id).constant);
        ast.mark_constant(id);
        assert!(ast.get(id).constant);
    }
}
