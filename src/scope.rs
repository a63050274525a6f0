// ABOUTME: Parse-time symbol table and run-time slot frames for lexical scope

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Parse-time symbol table: instead of a `HashMap<String, Value>`
/// walked by name at eval time, each `let` or parameter
/// introduces a slot index in the current `Scope`; nested scopes walk
/// their `parent` chain to compute `(depth, slot)` pairs baked into
/// `ast::NodeKind::LocalRef` so the interpreter never hashes a name at
/// runtime: no name lookup in the hot path.
#[derive(Debug)]
pub struct Scope {
    parent: Option<Rc<RefCell<Scope>>>,
    names: HashMap<Rc<str>, u16>,
    next_slot: u16,
}

impl Scope {
    pub fn root() -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope {
            parent: None,
            names: HashMap::new(),
            next_slot: 0,
        }))
    }

    pub fn child(parent: &Rc<RefCell<Scope>>) -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope {
            parent: Some(parent.clone()),
            names: HashMap::new(),
            next_slot: 0,
        }))
    }

    /// Declares a new local in this scope, shadowing any outer binding
    /// of the same name ("inner declarations shadow outer
    /// ones for the remainder of the inner block"). Returns the slot.
    pub fn declare(&mut self, name: Rc<str>) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.names.insert(name, slot);
        slot
    }

    /// Whether `name` is already declared directly in this scope (not an
    /// ancestor) — used by `lexical` mode to reject a same-block
    /// redeclaration, and by `lexical_shade` prescan to avoid
    /// double-declaring a hoisted name.
    pub fn has_local(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Resolves a name to `(depth, slot)` by walking the parent chain,
    /// depth 0 being this scope. `None` means the name is unbound at
    /// parse time and must fall back to `ast::NodeKind::ContextRef`.
    pub fn resolve(scope: &Rc<RefCell<Scope>>, name: &str) -> Option<(u16, u16)> {
        let mut depth = 0u16;
        let mut current = scope.clone();
        loop {
            let next = {
                let s = current.borrow();
                if let Some(&slot) = s.names.get(name) {
                    return Some((depth, slot));
                }
                s.parent.clone()
            };
            match next {
                Some(p) => {
                    current = p;
                    depth += 1;
                }
                None => return None,
            }
        }
    }

    pub fn slot_count(&self) -> u16 {
        self.next_slot
    }
}

/// Sentinel occupying a declared-but-not-yet-initialized slot, e.g. a
/// `let x;` with no initializer, or a slot reserved before its `for`
/// loop variable is first assigned.
pub const UNDEFINED: Value = Value::Null;

/// Run-time counterpart of `Scope`: a dense slot array plus a link to
/// the enclosing frame, shared by `Rc` with every closure that captured
/// it (see `closure.rs`). Same "share the parent by reference, push a
/// fresh child for each call" shape as a hashmap environment, but slots
/// are indexed rather than hashed.
#[derive(Debug)]
pub struct Frame {
    pub parent: Option<Rc<Frame>>,
    slots: RefCell<Vec<Value>>,
    /// Tracks whether each slot has been written at least once, consulted
    /// only under `lexical_shade` mode's read-before-write check.
    assigned: RefCell<Vec<bool>>,
}

impl Frame {
    pub fn new(slot_count: u16) -> Self {
        Frame {
            parent: None,
            slots: RefCell::new(vec![Value::Null; slot_count as usize]),
            assigned: RefCell::new(vec![false; slot_count as usize]),
        }
    }

    pub fn with_parent(parent: Rc<Frame>, slot_count: u16) -> Self {
        Frame {
            parent: Some(parent),
            slots: RefCell::new(vec![Value::Null; slot_count as usize]),
            assigned: RefCell::new(vec![false; slot_count as usize]),
        }
    }

    fn ancestor(&self, depth: u16) -> &Frame {
        if depth == 0 {
            self
        } else {
            // SAFETY-free: depth is bounded by the resolver, which never
            // emits a depth deeper than the actual frame chain.
            let mut frame = self.parent.as_deref().expect("frame depth out of range");
            for _ in 1..depth {
                frame = frame.parent.as_deref().expect("frame depth out of range");
            }
            frame
        }
    }

    pub fn get(&self, depth: u16, slot: u16) -> Value {
        self.ancestor(depth).slots.borrow()[slot as usize].clone()
    }

    pub fn set(&self, depth: u16, slot: u16, value: Value) {
        let ancestor = self.ancestor(depth);
        ancestor.slots.borrow_mut()[slot as usize] = value;
        ancestor.assigned.borrow_mut()[slot as usize] = true;
    }

    pub fn is_assigned(&self, depth: u16, slot: u16) -> bool {
        self.ancestor(depth).assigned.borrow()[slot as usize]
    }
}

impl Clone for Frame {
    /// Deep-clones this frame's own slots but keeps sharing the parent
    /// chain by `Rc`, matching `closure::clone_on_escape`'s contract:
    /// only the frame local to the escaping closure's defining scope is
    /// copied, ancestor frames stay aliased.
    fn clone(&self) -> Self {
        Frame {
            parent: self.parent.clone(),
            slots: RefCell::new(self.slots.borrow().clone()),
            assigned: RefCell::new(self.assigned.borrow().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_resolve_same_scope() {
        let scope = Scope::root();
        let slot = scope.borrow_mut().declare("x".into());
        assert_eq!(Scope::resolve(&scope, "x"), Some((0, slot)));
        assert_eq!(Scope::resolve(&scope, "y"), None);
    }

    #[test]
    fn test_shadowing_in_child_scope() {
        let root = Scope::root();
        root.borrow_mut().declare("x".into());
        let child = Scope::child(&root);
        let inner_slot = child.borrow_mut().declare("x".into());
        assert_eq!(Scope::resolve(&child, "x"), Some((0, inner_slot)));
    }

    #[test]
    fn test_resolve_walks_to_parent() {
        let root = Scope::root();
        let outer_slot = root.borrow_mut().declare("y".into());
        let child = Scope::child(&root);
        assert_eq!(Scope::resolve(&child, "y"), Some((1, outer_slot)));
    }

    #[test]
    fn test_frame_get_set() {
        let frame = Frame::new(2);
        frame.set(0, 0, Value::Int64(7));
        assert_eq!(frame.get(0, 0), Value::Int64(7));
    }

    #[test]
    fn test_frame_parent_chain() {
        let parent = Rc::new(Frame::new(1));
        parent.set(0, 0, Value::Int64(99));
        let child = Frame::with_parent(parent, 1);
        assert_eq!(child.get(1, 0), Value::Int64(99));
    }

    #[test]
    fn test_frame_assigned_tracks_writes() {
        let frame = Frame::new(1);
        assert!(!frame.is_assigned(0, 0));
        frame.set(0, 0, Value::Int64(1));
        assert!(frame.is_assigned(0, 0));
    }

    #[test]
    fn test_has_local_only_sees_own_scope() {
        let root = Scope::root();
        root.borrow_mut().declare("x".into());
        let child = Scope::child(&root);
        assert!(root.borrow().has_local("x"));
        assert!(!child.borrow().has_local("x"));
    }
}
