use thiserror::Error;

/// Errors produced by object model operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("type {type_name} has no member named {member}")]
    UnknownMember { type_name: String, member: String },

    #[error("member {member} is not declared by type {type_name}")]
    ForeignMember { type_name: String, member: String },

    #[error("type {type_name} is not {expected}")]
    WrongKind {
        type_name: String,
        expected: &'static str,
    },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cell {indices:?} out of range for lengths {lengths:?}")]
    CellOutOfRange {
        indices: Vec<usize>,
        lengths: Vec<usize>,
    },

    #[error("array shape {lengths:?} needs {expected} cells, got {actual}")]
    ShapeMismatch {
        lengths: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}

/// Convenience alias for object model results.
pub type TypeResult<T> = Result<T, TypeError>;
