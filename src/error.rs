// error.rs - Error types for parsing, binding and evaluation.
//
// One semantic enum per pipeline stage; every error carries a
// human-readable message, and parse errors carry the byte offset of
// the offending token.

use std::fmt;

use crate::defs::ValueKind;

// === Parse errors ===

/// Classification of a [`ParseError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Lexer rejected a token, or the token stream did not match the grammar.
    Syntax,
    /// Operand kinds incompatible and not fixable by promotion.
    TypeMismatch,
    /// Binary operation on two non-scalar operands of different shape.
    ShapeMismatch,
    /// Function name not in the built-in set.
    UnknownFunction,
    /// Function called with the wrong number of arguments.
    WrongArity,
    /// Identifier did not resolve against the column catalog.
    UnknownColumn,
}

/// Error from [`crate::api::RowExpr::parse`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset into the source text where the error was detected.
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, message: impl Into<String>, offset: usize) -> Self {
        ParseError {
            kind,
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Self::new(ParseErrorKind::Syntax, message, offset)
    }

    pub(crate) fn types(message: impl Into<String>, offset: usize) -> Self {
        Self::new(ParseErrorKind::TypeMismatch, message, offset)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

// === Bind errors ===

/// Error from binding a compiled expression to a row batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindError {
    /// A referenced column was not supplied in the batch.
    MissingColumn { col: usize },
    /// The supplied column data does not match the catalog kind.
    KindMismatch {
        col: usize,
        expected: ValueKind,
        found: ValueKind,
    },
    /// The supplied buffer is too short for the batch row count.
    ShortColumn {
        col: usize,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::MissingColumn { col } => {
                write!(f, "column {} referenced by the expression is not in the batch", col)
            }
            BindError::KindMismatch {
                col,
                expected,
                found,
            } => write!(
                f,
                "column {} has kind {} in the batch but {} in the catalog",
                col, found, expected
            ),
            BindError::ShortColumn {
                col,
                expected,
                found,
            } => write!(
                f,
                "column {} buffer holds {} elements, batch needs {}",
                col, found, expected
            ),
        }
    }
}

impl std::error::Error for BindError {}

// === Evaluation errors ===

/// Classification of an [`EvalError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Division by zero or out-of-domain math (`SQRT(<0)`, `LOG(<=0)`, ...).
    DomainError,
    /// A null value was used as a vector subscript.
    NullIndex,
    /// A subscript fell outside `1..=naxes[i]`.
    IndexOutOfRange,
    /// A per-batch buffer allocation failed.
    Allocation,
}

/// Error from [`crate::api::BoundExpr::evaluate`].
///
/// Evaluation errors are sticky: once one is raised for a bound batch,
/// every further `evaluate` call returns the same error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub(crate) fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        EvalError {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::DomainError, message)
    }

    pub(crate) fn alloc(n: usize) -> Self {
        Self::new(
            EvalErrorKind::Allocation,
            format!("failed to allocate a {}-element batch buffer", n),
        )
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}
