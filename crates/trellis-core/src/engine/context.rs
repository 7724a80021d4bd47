use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::tuple::{ObjectRef, SnapshotToken, SubjectRef};

use super::CheckError;

/// Identifies one sub-check within a request. The subject is fixed for the
/// whole request, so it is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CheckKey {
    permission: String,
    object: ObjectRef,
}

impl CheckKey {
    pub(crate) fn new(permission: &str, object: &ObjectRef) -> Self {
        Self {
            permission: permission.to_string(),
            object: object.clone(),
        }
    }
}

/// Result of evaluating one expression on one path.
///
/// A denial may rest on cycle cuts: `assumed` holds the keys on the call path
/// that were taken as denied when the walk came back to them. `truncated`
/// marks a denial fed by a depth cutoff, which holds only for the path that
/// produced it. Grants never carry either.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub allowed: bool,
    pub assumed: HashSet<CheckKey>,
    pub truncated: bool,
}

impl Outcome {
    pub(crate) fn granted() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    pub(crate) fn denied() -> Self {
        Self::default()
    }

    /// Denial of a key already in progress on the call path.
    pub(crate) fn cycle(key: CheckKey) -> Self {
        Self {
            assumed: HashSet::from([key]),
            ..Self::default()
        }
    }

    pub(crate) fn truncated() -> Self {
        Self {
            truncated: true,
            ..Self::default()
        }
    }

    /// True when the value holds wherever the key is evaluated.
    pub(crate) fn is_exact(&self) -> bool {
        self.allowed || (self.assumed.is_empty() && !self.truncated)
    }

    /// Folds the dependencies of another denial into this one.
    pub(crate) fn absorb(&mut self, other: Outcome) {
        self.assumed.extend(other.assumed);
        self.truncated |= other.truncated;
    }
}

/// A memoized sub-check.
enum Memo {
    Decided(bool),
    /// Denied while the keys in the set were in progress above it.
    Provisional(HashSet<CheckKey>),
}

struct Frame {
    key: CheckKey,
    parent: Option<Arc<Frame>>,
}

/// Keys of the checks in progress between the root and the current call.
/// Immutable; concurrent branches share their common prefix.
#[derive(Clone, Default)]
pub(crate) struct CallPath {
    head: Option<Arc<Frame>>,
    depth: usize,
}

impl CallPath {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn contains(&self, key: &CheckKey) -> bool {
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            if &f.key == key {
                return true;
            }
            frame = f.parent.as_deref();
        }
        false
    }

    pub(crate) fn push(&self, key: CheckKey) -> Self {
        Self {
            head: Some(Arc::new(Frame {
                key,
                parent: self.head.clone(),
            })),
            depth: self.depth + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckStats {
    /// Sub-checks started, including the root.
    pub dispatches: usize,
    pub memo_hits: usize,
    pub cycles_cut: usize,
    pub depth_cutoffs: usize,
}

#[derive(Default)]
struct Counters {
    dispatches: AtomicUsize,
    memo_hits: AtomicUsize,
    cycles_cut: AtomicUsize,
    depth_cutoffs: AtomicUsize,
}

/// State owned by one top-level check and shared by all of its branches.
pub(crate) struct CheckContext {
    subject: SubjectRef,
    snapshot: Option<SnapshotToken>,
    cancel: CancellationToken,
    memo: Mutex<HashMap<CheckKey, Memo>>,
    counters: Counters,
}

impl CheckContext {
    pub(crate) fn new(
        subject: SubjectRef,
        snapshot: Option<SnapshotToken>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subject,
            snapshot,
            cancel,
            memo: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub(crate) fn subject(&self) -> &SubjectRef {
        &self.subject
    }

    pub(crate) fn snapshot(&self) -> Option<&SnapshotToken> {
        self.snapshot.as_ref()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `fut` unless the request is cancelled first.
    pub(crate) async fn guard<F, O>(&self, fut: F) -> Result<O, CheckError>
    where
        F: Future<Output = Result<O, CheckError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CheckError::Cancelled),
            result = fut => result,
        }
    }

    /// A memoized outcome for `key` that holds on `path`.
    ///
    /// A provisional denial is reused when each key it assumed denied is
    /// either in progress on `path` or itself denied under the same rule.
    /// The keys it then rests on are the ones found on `path`.
    pub(crate) fn recall(&self, key: &CheckKey, path: &CallPath) -> Option<Outcome> {
        let memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        match memo.get(key)? {
            Memo::Decided(true) => Some(Outcome::granted()),
            Memo::Decided(false) => Some(Outcome::denied()),
            Memo::Provisional(_) if path.contains(key) => None,
            Memo::Provisional(assumed) => {
                let mut visited: HashSet<&CheckKey> = HashSet::from([key]);
                let mut pending: Vec<&HashSet<CheckKey>> = vec![assumed];
                let mut outcome = Outcome::denied();
                while let Some(assumed) = pending.pop() {
                    for dependency in assumed {
                        if path.contains(dependency) {
                            outcome.assumed.insert(dependency.clone());
                            continue;
                        }
                        if !visited.insert(dependency) {
                            continue;
                        }
                        match memo.get(dependency) {
                            Some(Memo::Decided(false)) => {}
                            Some(Memo::Provisional(next)) => pending.push(next),
                            Some(Memo::Decided(true)) | None => return None,
                        }
                    }
                }
                Some(outcome)
            }
        }
    }

    /// Records the outcome of `key`, which has just finished evaluating.
    pub(crate) fn remember(&self, key: CheckKey, outcome: &Outcome) {
        let entry = if outcome.allowed {
            Memo::Decided(true)
        } else if outcome.truncated {
            return;
        } else if outcome.assumed.is_empty() {
            Memo::Decided(false)
        } else {
            Memo::Provisional(outcome.assumed.clone())
        };
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(memo.get(&key), Some(Memo::Decided(_))) {
            memo.insert(key, entry);
        }
    }

    pub(crate) fn record_dispatch(&self) {
        self.counters.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_memo_hit(&self) {
        self.counters.memo_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle_cut(&self) {
        self.counters.cycles_cut.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_depth_cutoff(&self) {
        self.counters.depth_cutoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> CheckStats {
        CheckStats {
            dispatches: self.counters.dispatches.load(Ordering::Relaxed),
            memo_hits: self.counters.memo_hits.load(Ordering::Relaxed),
            cycles_cut: self.counters.cycles_cut.load(Ordering::Relaxed),
            depth_cutoffs: self.counters.depth_cutoffs.load(Ordering::Relaxed),
        }
    }
}
