mod check;
mod context;
mod evaluate;

pub use check::{CheckEngine, CheckRequest, CheckResult};
pub use context::CheckStats;

use std::future::Future;
use std::time::Duration;

use futures::stream::BoxStream;

use crate::tuple::{ObjectRef, SnapshotToken, SubjectRef};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("type not found: {0}")]
    UnknownType(String),

    #[error("permit '{permit}' not found on type '{type_name}'")]
    UnknownPermit { type_name: String, permit: String },

    #[error("tuple store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("check cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Nested checks allowed below the root before a path is denied.
    pub max_depth: usize,
    /// Sibling branches evaluated concurrently within one union or fan-out.
    pub max_concurrent_branches: usize,
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            max_concurrent_branches: 10,
            timeout: None,
        }
    }
}

/// Lazy, finite sequence of the subjects stored under one relation.
pub type SubjectStream = BoxStream<'static, Result<SubjectRef, CheckError>>;

/// Read access to relation tuples at a snapshot.
///
/// Subject sets are returned as stored; resolving them is the engine's job.
pub trait TupleReader: Send + Sync {
    fn list_subjects(
        &self,
        object: &ObjectRef,
        relation: &str,
        snapshot: Option<&SnapshotToken>,
    ) -> impl Future<Output = Result<SubjectStream, CheckError>> + Send;

    fn has_subject(
        &self,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        snapshot: Option<&SnapshotToken>,
    ) -> impl Future<Output = Result<bool, CheckError>> + Send;
}
