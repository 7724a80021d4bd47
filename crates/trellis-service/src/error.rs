use trellis_core::engine::CheckError;
use trellis_core::schema::{
    BreakingChange, ParseError, SchemaError, TupleViolation, ValidationError,
};
use trellis_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("check error: {0}")]
    Check(#[from] CheckError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("schema validation errors: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("breaking schema changes detected (use force=true to override): {}", join(.0))]
    BreakingChanges(Vec<BreakingChange>),

    #[error("invalid relationship: {0}")]
    InvalidTuple(#[from] TupleViolation),

    #[error("failed to read schema file '{path}': {reason}")]
    SchemaFile { path: String, reason: String },
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
