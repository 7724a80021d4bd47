use std::collections::HashSet;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt, TryStreamExt};

use crate::schema::Expr;
use crate::tuple::{ObjectRef, SubjectRef};

use super::check::CheckEngine;
use super::context::{CallPath, CheckContext, Outcome};
use super::{CheckError, TupleReader};

impl<T: TupleReader> CheckEngine<T> {
    pub(super) fn evaluate<'a>(
        &'a self,
        expr: &'a Expr,
        object: &'a ObjectRef,
        ctx: &'a CheckContext,
        path: &'a CallPath,
    ) -> BoxFuture<'a, Result<Outcome, CheckError>> {
        Box::pin(async move {
            match expr {
                Expr::Direct(relations) => self.evaluate_direct(relations, object, ctx, path).await,
                Expr::Permit(permit) => self.dispatch(permit, object, ctx, path).await,
                Expr::Traverse { relation, permit } => {
                    self.evaluate_traverse(relation, permit, object, ctx, path)
                        .await
                }
                Expr::Union(children) => {
                    self.any_allowed(
                        children
                            .iter()
                            .map(|child| self.evaluate(child, object, ctx, path))
                            .collect::<Vec<_>>(),
                    )
                    .await
                }
                Expr::Intersection(children) => {
                    for child in children {
                        let outcome = self.evaluate(child, object, ctx, path).await?;
                        if !outcome.allowed {
                            return Ok(outcome);
                        }
                    }
                    Ok(Outcome::granted())
                }
                Expr::Exclusion(base, excluded) => {
                    let base = self.evaluate(base, object, ctx, path).await?;
                    if !base.allowed {
                        return Ok(base);
                    }
                    let excluded = self.evaluate(excluded, object, ctx, path).await?;
                    if excluded.allowed {
                        Ok(Outcome::denied())
                    } else if excluded.is_exact() {
                        Ok(Outcome::granted())
                    } else {
                        // Not proven excluded is not proven allowed.
                        Ok(excluded)
                    }
                }
            }
        })
    }

    /// Membership in any of `relations`, directly or through a stored
    /// subject set.
    async fn evaluate_direct(
        &self,
        relations: &[String],
        object: &ObjectRef,
        ctx: &CheckContext,
        path: &CallPath,
    ) -> Result<Outcome, CheckError> {
        for relation in relations {
            let found = ctx
                .guard(
                    self.reader
                        .has_subject(object, relation, ctx.subject(), ctx.snapshot()),
                )
                .await?;
            if found {
                return Ok(Outcome::granted());
            }
        }

        let mut seen: HashSet<SubjectRef> = HashSet::new();
        let mut subject_sets: Vec<(ObjectRef, String)> = Vec::new();
        for relation in relations {
            let mut subjects = ctx
                .guard(self.reader.list_subjects(object, relation, ctx.snapshot()))
                .await?;
            while let Some(subject) = ctx.guard(subjects.try_next()).await? {
                if let Some(ref set_relation) = subject.subject_relation
                    && !seen.contains(&subject)
                {
                    subject_sets.push((subject.as_object(), set_relation.clone()));
                    seen.insert(subject);
                }
            }
        }

        self.any_allowed(
            subject_sets
                .iter()
                .map(|(set_object, set_relation)| self.dispatch(set_relation, set_object, ctx, path))
                .collect::<Vec<_>>(),
        )
        .await
    }

    /// Some object reached through `relation` grants `permit`.
    async fn evaluate_traverse(
        &self,
        relation: &str,
        permit: &str,
        object: &ObjectRef,
        ctx: &CheckContext,
        path: &CallPath,
    ) -> Result<Outcome, CheckError> {
        let mut subjects = ctx
            .guard(self.reader.list_subjects(object, relation, ctx.snapshot()))
            .await?;

        let mut seen: HashSet<ObjectRef> = HashSet::new();
        let mut targets: Vec<ObjectRef> = Vec::new();
        while let Some(subject) = ctx.guard(subjects.try_next()).await? {
            let target = subject.as_object();
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }

        self.any_allowed(
            targets
                .iter()
                .map(|target| self.dispatch(permit, target, ctx, path))
                .collect::<Vec<_>>(),
        )
        .await
    }

    /// Runs `branches` with at most `max_concurrent_branches` in flight.
    ///
    /// Any grant wins. Without one, the error of the lowest-indexed failing
    /// branch is returned so the answer does not depend on scheduling, and
    /// only then a denial. Cancellation aborts at once.
    async fn any_allowed<'f, I>(&self, branches: I) -> Result<Outcome, CheckError>
    where
        I: IntoIterator<Item = BoxFuture<'f, Result<Outcome, CheckError>>>,
    {
        let limit = self.config.max_concurrent_branches.max(1);
        let mut pending = branches.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut denial = Outcome::denied();
        let mut first_error: Option<(usize, CheckError)> = None;

        loop {
            while in_flight.len() < limit {
                let Some((index, branch)) = pending.next() else {
                    break;
                };
                in_flight.push(async move { (index, branch.await) });
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(outcome) if outcome.allowed => return Ok(outcome),
                Ok(outcome) => denial.absorb(outcome),
                Err(CheckError::Cancelled) => return Err(CheckError::Cancelled),
                Err(err) => {
                    if first_error.as_ref().is_none_or(|(first, _)| index < *first) {
                        first_error = Some((index, err));
                    }
                }
            }
        }

        match first_error {
            Some((_, err)) => Err(err),
            None => Ok(denial),
        }
    }
}
