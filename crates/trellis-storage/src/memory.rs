use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use trellis_core::tuple::{SnapshotToken, Tuple, TupleFilter, TupleWrite};

use crate::traits::{RelationshipStore, StorageError};

const LIVE: u64 = u64::MAX;
const TOKEN_PREFIX: &str = "rev-";

/// Key of the point-lookup index.
type RelationKey = (String, String, String);

#[derive(Debug, Clone)]
struct StoredTuple {
    tuple: Tuple,
    created: u64,
    deleted: u64,
}

impl StoredTuple {
    fn is_live(&self) -> bool {
        self.deleted == LIVE
    }

    fn visible_at(&self, revision: u64) -> bool {
        self.created <= revision && self.deleted > revision
    }
}

fn relation_key(tuple: &Tuple) -> RelationKey {
    (
        tuple.object.object_type.clone(),
        tuple.object.object_id.clone(),
        tuple.relation.clone(),
    )
}

#[derive(Debug, Default)]
struct InnerState {
    revision: u64,
    /// Oldest revision still readable.
    horizon: u64,
    tuples: Vec<StoredTuple>,
    index: HashMap<RelationKey, Vec<usize>>,
}

impl InnerState {
    fn resolve(&self, snapshot: Option<&SnapshotToken>) -> Result<u64, StorageError> {
        let Some(token) = snapshot else {
            return Ok(self.revision);
        };
        let requested = decode_token(token)?;
        if requested > self.revision {
            return Err(StorageError::SnapshotAhead {
                requested,
                current: self.revision,
            });
        }
        if requested < self.horizon {
            return Err(StorageError::SnapshotCompacted {
                requested,
                oldest: self.horizon,
            });
        }
        Ok(requested)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (slot, stored) in self.tuples.iter().enumerate() {
            self.index
                .entry(relation_key(&stored.tuple))
                .or_default()
                .push(slot);
        }
    }

    fn candidates(&self, filter: &TupleFilter) -> Box<dyn Iterator<Item = &StoredTuple> + '_> {
        match (&filter.object_type, &filter.object_id, &filter.relation) {
            (Some(object_type), Some(object_id), Some(relation)) => {
                let key = (object_type.clone(), object_id.clone(), relation.clone());
                let slots = self.index.get(&key).map(Vec::as_slice).unwrap_or_default();
                Box::new(slots.iter().map(|&slot| &self.tuples[slot]))
            }
            _ => Box::new(self.tuples.iter()),
        }
    }
}

/// Multi-version in-memory tuple store.
///
/// Each write commits a new revision. Deleted tuples are kept with the
/// revision that removed them so that reads at older snapshots stay stable,
/// until [`compact`](InMemoryStore::compact) drops them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets tuples deleted at or before `horizon` and returns how many
    /// were dropped. Reads at snapshots older than `horizon` fail afterwards.
    pub fn compact(&self, horizon: &SnapshotToken) -> Result<usize, StorageError> {
        let mut state = self.lock();
        let horizon = state.resolve(Some(horizon))?;

        let before = state.tuples.len();
        state.tuples.retain(|stored| stored.deleted > horizon);
        let removed = before - state.tuples.len();
        state.horizon = horizon;
        state.rebuild_index();

        tracing::debug!(horizon, removed, "compacted tuple store");
        Ok(removed)
    }
}

fn encode_token(revision: u64) -> SnapshotToken {
    SnapshotToken::new(format!("{TOKEN_PREFIX}{revision}"))
}

fn decode_token(token: &SnapshotToken) -> Result<u64, StorageError> {
    token
        .as_str()
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|rev| rev.parse().ok())
        .ok_or_else(|| StorageError::InvalidSnapshot(token.to_string()))
}

impl RelationshipStore for InMemoryStore {
    async fn write(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> Result<SnapshotToken, StorageError> {
        if deletes.iter().any(TupleFilter::is_empty) {
            return Err(StorageError::EmptyDeleteFilter);
        }

        let mut state = self.lock();

        let deleted: HashSet<usize> = state
            .tuples
            .iter()
            .enumerate()
            .filter(|(_, stored)| {
                stored.is_live() && deletes.iter().any(|f| f.matches(&stored.tuple))
            })
            .map(|(slot, _)| slot)
            .collect();

        let mut batch: HashSet<&TupleWrite> = HashSet::with_capacity(writes.len());
        for write in writes {
            let tuple = Tuple::from(write.clone());
            let survives_delete = state
                .candidates(&TupleFilter::exact(
                    &tuple.object,
                    &tuple.relation,
                    &tuple.subject,
                ))
                .any(|stored| {
                    stored.is_live()
                        && stored.tuple == tuple
                        && !deletes.iter().any(|f| f.matches(&stored.tuple))
                });
            if !batch.insert(write) || survives_delete {
                return Err(StorageError::DuplicateTuple(tuple));
            }
        }

        state.revision += 1;
        let revision = state.revision;

        for slot in deleted {
            state.tuples[slot].deleted = revision;
        }

        for write in writes {
            let tuple = Tuple::from(write.clone());
            let key = relation_key(&tuple);
            let slot = state.tuples.len();
            state.tuples.push(StoredTuple {
                tuple,
                created: revision,
                deleted: LIVE,
            });
            state.index.entry(key).or_default().push(slot);
        }

        tracing::debug!(
            revision,
            written = writes.len(),
            delete_filters = deletes.len(),
            "committed tuple write"
        );
        Ok(encode_token(revision))
    }

    async fn read(
        &self,
        filter: &TupleFilter,
        snapshot: Option<&SnapshotToken>,
        limit: Option<usize>,
    ) -> Result<Vec<Tuple>, StorageError> {
        let state = self.lock();
        let revision = state.resolve(snapshot)?;

        Ok(state
            .candidates(filter)
            .filter(|stored| stored.visible_at(revision) && filter.matches(&stored.tuple))
            .take(limit.unwrap_or(usize::MAX))
            .map(|stored| stored.tuple.clone())
            .collect())
    }

    async fn snapshot(&self) -> Result<SnapshotToken, StorageError> {
        Ok(encode_token(self.lock().revision))
    }
}
