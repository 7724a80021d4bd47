use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::schema::SchemaRegistry;
use crate::tuple::{ObjectRef, SnapshotToken, SubjectRef};

use super::context::{CallPath, CheckContext, CheckKey, CheckStats, Outcome};
use super::{CheckError, EngineConfig, TupleReader};

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub subject: SubjectRef,
    pub permission: String,
    pub object: ObjectRef,
    pub snapshot: Option<SnapshotToken>,
}

impl CheckRequest {
    pub fn new(subject: SubjectRef, permission: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            permission: permission.into(),
            object,
            snapshot: None,
        }
    }

    pub fn at_snapshot(mut self, snapshot: SnapshotToken) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

#[derive(Debug)]
pub struct CheckResult {
    pub allowed: bool,
    pub stats: CheckStats,
}

pub struct CheckEngine<T: TupleReader> {
    pub(super) reader: Arc<T>,
    registry: Arc<SchemaRegistry>,
    pub(super) config: EngineConfig,
}

impl<T: TupleReader> CheckEngine<T> {
    pub fn new(reader: Arc<T>, registry: Arc<SchemaRegistry>, config: EngineConfig) -> Self {
        Self {
            reader,
            registry,
            config,
        }
    }

    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError> {
        self.check_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`check`](Self::check), abandoning all in-flight sub-checks with
    /// [`CheckError::Cancelled`] once `cancel` fires.
    #[tracing::instrument(
        name = "check",
        skip_all,
        fields(
            object = %request.object,
            permission = %request.permission,
            subject = %request.subject,
        )
    )]
    pub async fn check_with_cancel(
        &self,
        request: &CheckRequest,
        cancel: CancellationToken,
    ) -> Result<CheckResult, CheckError> {
        let ctx = CheckContext::new(
            request.subject.clone(),
            request.snapshot.clone(),
            cancel.child_token(),
        );
        let root = CallPath::default();
        let evaluation = self.dispatch(&request.permission, &request.object, &ctx, &root);

        let outcome = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, evaluation).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "check timed out"
                    );
                    Err(CheckError::Cancelled)
                }
            },
            None => evaluation.await,
        }?;

        let stats = ctx.stats();
        tracing::debug!(
            allowed = outcome.allowed,
            dispatches = stats.dispatches,
            memo_hits = stats.memo_hits,
            cycles_cut = stats.cycles_cut,
            depth_cutoffs = stats.depth_cutoffs,
            "check finished"
        );

        Ok(CheckResult {
            allowed: outcome.allowed,
            stats,
        })
    }

    /// One (nested) check of `permission` on `object` for the request subject.
    pub(super) fn dispatch<'a>(
        &'a self,
        permission: &'a str,
        object: &'a ObjectRef,
        ctx: &'a CheckContext,
        path: &'a CallPath,
    ) -> BoxFuture<'a, Result<Outcome, CheckError>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            ctx.record_dispatch();

            let rule = self
                .registry
                .resolve(&object.object_type)?
                .rule(permission)
                .ok_or_else(|| CheckError::UnknownPermit {
                    type_name: object.object_type.clone(),
                    permit: permission.to_string(),
                })?;

            let key = CheckKey::new(permission, object);
            if let Some(outcome) = ctx.recall(&key, path) {
                ctx.record_memo_hit();
                return Ok(outcome);
            }

            if path.contains(&key) {
                ctx.record_cycle_cut();
                tracing::debug!(%object, permission, "cycle in relation graph, denying path");
                return Ok(Outcome::cycle(key));
            }

            if path.depth() >= self.config.max_depth {
                ctx.record_depth_cutoff();
                tracing::warn!(
                    %object,
                    permission,
                    max_depth = self.config.max_depth,
                    "max check depth exceeded, denying path"
                );
                return Ok(Outcome::truncated());
            }

            let path = path.push(key.clone());
            let mut outcome = self.evaluate(rule, object, ctx, &path).await?;
            outcome.assumed.remove(&key);
            ctx.remember(key, &outcome);
            Ok(outcome)
        })
    }
}
