use std::sync::Arc;

use futures::stream;
use trellis_core::engine::{CheckError, SubjectStream, TupleReader};
use trellis_core::tuple::{ObjectRef, SnapshotToken, SubjectRef, TupleFilter};
use trellis_storage::{RelationshipStore, StorageError};

/// Serves the check engine's reads from a [`RelationshipStore`].
pub struct StoreTupleReader<S: RelationshipStore> {
    store: Arc<S>,
}

impl<S: RelationshipStore> StoreTupleReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

fn unavailable(err: StorageError) -> CheckError {
    CheckError::StoreUnavailable(err.to_string())
}

impl<S: RelationshipStore> TupleReader for StoreTupleReader<S> {
    async fn list_subjects(
        &self,
        object: &ObjectRef,
        relation: &str,
        snapshot: Option<&SnapshotToken>,
    ) -> Result<SubjectStream, CheckError> {
        let tuples = self
            .store
            .read(&TupleFilter::relation_of(object, relation), snapshot, None)
            .await
            .map_err(unavailable)?;
        let subjects = tuples.into_iter().map(|t| Ok(t.subject));
        Ok(Box::pin(stream::iter(subjects)))
    }

    async fn has_subject(
        &self,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        snapshot: Option<&SnapshotToken>,
    ) -> Result<bool, CheckError> {
        let found = self
            .store
            .read(
                &TupleFilter::exact(object, relation, subject),
                snapshot,
                Some(1),
            )
            .await
            .map_err(unavailable)?;
        Ok(!found.is_empty())
    }
}
