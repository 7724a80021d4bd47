use std::future::Future;

use trellis_core::tuple::{SnapshotToken, Tuple, TupleFilter, TupleWrite};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("delete filter must have at least one field set")]
    EmptyDeleteFilter,
    #[error("tuple already exists: {0}")]
    DuplicateTuple(Tuple),
    #[error("snapshot {requested} is ahead of current {current}")]
    SnapshotAhead { requested: u64, current: u64 },
    #[error("snapshot {requested} was compacted; oldest readable is {oldest}")]
    SnapshotCompacted { requested: u64, oldest: u64 },
    #[error("malformed snapshot token: {0}")]
    InvalidSnapshot(String),
}

/// Versioned relation tuple storage.
///
/// Every successful `write` yields a new snapshot; reads at that snapshot
/// observe the write and nothing committed after it.
pub trait RelationshipStore: Send + Sync {
    /// Applies `deletes` then `writes` as one revision.
    fn write(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;

    /// Tuples matching `filter` at `snapshot`, or at the latest revision.
    fn read(
        &self,
        filter: &TupleFilter,
        snapshot: Option<&SnapshotToken>,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<Tuple>, StorageError>> + Send;

    fn snapshot(&self) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;
}
