// ABOUTME: Lambda values and escape-detection clone-on-escape semantics

use crate::ast::NodeId;
use crate::scope::Frame;
use std::rc::Rc;

/// A lambda: parameter slot count, body node, and the frame it closed
/// over. Captures a `Frame` (dense slot array) rather than a `HashMap`
/// environment, since JEXL parameters are resolved to slot indices at
/// parse time (see `scope.rs`).
#[derive(Clone, Debug)]
pub struct Closure {
    pub param_count: usize,
    pub variadic: bool,
    pub body: NodeId,
    /// Shared by `Rc` with every other closure/frame that captured the
    /// same lexical scope.
    pub captured: Rc<Frame>,
}

impl Closure {
    pub fn new(param_count: usize, variadic: bool, body: NodeId, captured: Rc<Frame>) -> Self {
        Closure {
            param_count,
            variadic,
            body,
            captured,
        }
    }
}

/// Whether a frame captured by a nested lambda must be cloned before the
/// lambda escapes its defining call ("Lambda capturing
/// a mutable lexical frame — safe to alias while the defining call is
/// still on the stack; once the closure is returned, stored, or handed to
/// a callback outside that call, capture-by-value (clone-on-escape) is
/// required to avoid dangling/aliased mutation"). The interpreter decides
/// "escaping" at the point a closure value flows out of the block that
/// created its frame: as a `return` value, into an outer variable, into
/// an array/map literal, or as an argument to a native callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Stays within the call that created it (e.g. passed straight to a
    /// higher-order function and invoked before that call returns).
    Contained,
    /// Flows out of its defining call; its frame must be deep-cloned
    /// before capture so later mutation of the original frame's slots
    /// can't be observed through the escaped closure.
    Escaping,
}

/// Deep-clones a captured frame chain so an escaping closure owns an
/// independent copy, per the `Escaping` case above. Frames earlier in the
/// parent chain that are *not* mutated after this point are still shared
/// via `Rc`; only the frame local to the lambda's defining scope needs a
/// fresh copy, since that's the one future sibling statements in the same
/// block could still write to.
pub fn clone_on_escape(closure: &Closure, escape: Escape) -> Closure {
    match escape {
        Escape::Contained => closure.clone(),
        Escape::Escaping => Closure {
            param_count: closure.param_count,
            variadic: closure.variadic,
            body: closure.body,
            captured: Rc::new((*closure.captured).clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Frame;

    #[test]
    fn test_clone_on_escape_contained_shares_rc() {
        let frame = Rc::new(Frame::new(0));
        let closure = Closure::new(0, false, NodeId(0), frame.clone());
        let result = clone_on_escape(&closure, Escape::Contained);
        assert!(Rc::ptr_eq(&result.captured, &closure.captured));
    }

    #[test]
    fn test_clone_on_escape_escaping_makes_new_rc() {
        let frame = Rc::new(Frame::new(0));
        let closure = Closure::new(0, false, NodeId(0), frame.clone());
        let result = clone_on_escape(&closure, Escape::Escaping);
        assert!(!Rc::ptr_eq(&result.captured, &closure.captured));
    }
}
