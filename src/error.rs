// ABOUTME: Error taxonomy for parsing, evaluation, and introspection failures

use thiserror::Error;

/// Source coordinates attached to most error variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The full error taxonomy surfaced to hosts. `Break`/`Continue`/
/// `Return` are intentionally absent: they are internal `Flow`
/// outcomes (see `interpreter::Flow`), never surfaced across
/// `Script::execute`/`Expression::evaluate`.
#[derive(Error, Debug, Clone)]
pub enum JexlError {
    #[error("{0}: {1}")]
    Parsing(Position, String),

    #[error("ambiguous statement at {0}")]
    AmbiguousStatement(Position),

    #[error("undefined variable: {name} at {pos}")]
    UnknownVariable { name: String, pos: Position },

    #[error("unknown property {name} on {object_class} at {pos}")]
    UnknownProperty {
        object_class: String,
        name: String,
        pos: Position,
    },

    #[error("unknown method {name}({arg_types}) on {object_class} at {pos}")]
    UnknownMethod {
        object_class: String,
        name: String,
        arg_types: String,
        pos: Position,
    },

    #[error("ambiguous method {name}({arg_types}) on {object_class}{}", if *.severe { " (severe)" } else { "" })]
    AmbiguousMethod {
        object_class: String,
        name: String,
        arg_types: String,
        severe: bool,
        pos: Position,
    },

    #[error("null operand in strict arithmetic at {0}")]
    NullOperand(Position),

    #[error("cannot coerce {from} to {to} at {pos}")]
    CoercionError {
        from: String,
        to: String,
        pos: Position,
    },

    #[error("index out of range at {0}")]
    IndexOutOfRange(Position),

    #[error("assignment to readonly target at {0}")]
    AssignmentToReadonly(Position),

    #[error("host error: {message}")]
    ThrownByHost { message: String, value: crate::value::Value },

    #[error("internal error: {0}")]
    Internal(String),
}

impl JexlError {
    pub fn unknown_variable(name: impl Into<String>, pos: Position) -> Self {
        JexlError::UnknownVariable {
            name: name.into(),
            pos,
        }
    }

    pub fn unknown_property(object_class: impl Into<String>, name: impl Into<String>, pos: Position) -> Self {
        JexlError::UnknownProperty {
            object_class: object_class.into(),
            name: name.into(),
            pos,
        }
    }

    pub fn unknown_method(
        object_class: impl Into<String>,
        name: impl Into<String>,
        arg_types: impl Into<String>,
        pos: Position,
    ) -> Self {
        JexlError::UnknownMethod {
            object_class: object_class.into(),
            name: name.into(),
            arg_types: arg_types.into(),
            pos,
        }
    }

    pub fn coercion(from: impl Into<String>, to: impl Into<String>, pos: Position) -> Self {
        JexlError::CoercionError {
            from: from.into(),
            to: to.into(),
            pos,
        }
    }

    /// Whether the script-level `try/catch` may catch this
    /// variant. `Parsing`/`AmbiguousStatement`/`Internal` are not
    /// catchable.
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            JexlError::Parsing(..) | JexlError::AmbiguousStatement(_) | JexlError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_variable_message() {
        let e = JexlError::unknown_variable("foo", Position::new(1, 5));
        assert_eq!(format!("{}", e), "undefined variable: foo at 1:5");
    }

    #[test]
    fn test_ambiguous_method_severity_suffix() {
        let e = JexlError::AmbiguousMethod {
            object_class: "Foo".into(),
            name: "bar".into(),
            arg_types: "String,Object".into(),
            severe: true,
            pos: Position::default(),
        };
        assert!(format!("{}", e).contains("severe"));
    }

    #[test]
    fn test_catchability() {
        assert!(!JexlError::Parsing(Position::default(), "oops".into()).is_catchable());
        assert!(JexlError::unknown_variable("x", Position::default()).is_catchable());
    }
}
