//! The leaf resolver: evaluates rewrite rules against stored tuples.
//!
//! Every sub-problem is dispatched through the configured delegate (normally
//! the top of the chain) so recursive checks get caching and cycle
//! detection. With no delegate the checker dispatches to itself.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, debug_span, Instrument};

use crate::condition::{evaluate_tuple_condition, CelConditionEvaluator, ConditionEvaluator};
use crate::error::{DomainError, DomainResult};
use crate::model::{reference_for_user, tuple, RelationReference, TupleKey, Userset};

use super::context::ResolutionContext;
use super::delegate::DelegateSlot;
use super::reducers::{self, handler, CheckHandler};
use super::traits::{CheckResolver, ReadUsersetTuplesFilter, TupleIteratorGuard};
use super::types::{CheckOutcome, ResolveCheckRequest, ResolveCheckResponse};

/// Default number of child branches a reducer runs at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;

/// Configuration for [`LocalChecker`].
#[derive(Debug, Clone)]
pub struct LocalCheckerConfig {
    /// Maximum concurrently evaluated children per set operation.
    pub concurrency_limit: usize,
}

impl Default for LocalCheckerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl LocalCheckerConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

/// Evaluates a relation's rewrite rule for one request.
pub struct LocalChecker {
    delegate: DelegateSlot,
    concurrency_limit: usize,
    condition_evaluator: Arc<dyn ConditionEvaluator>,
}

impl std::fmt::Debug for LocalChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChecker")
            .field("delegate", &self.delegate)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish()
    }
}

impl Default for LocalChecker {
    fn default() -> Self {
        Self::new(LocalCheckerConfig::default())
    }
}

impl LocalChecker {
    pub fn new(config: LocalCheckerConfig) -> Self {
        Self {
            delegate: DelegateSlot::empty(),
            concurrency_limit: config.concurrency_limit.max(1),
            condition_evaluator: Arc::new(CelConditionEvaluator::new()),
        }
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.condition_evaluator = evaluator;
        self
    }

    /// The resolver recursive checks are sent to. `None` means this checker.
    pub fn delegate(&self) -> DomainResult<Option<Arc<dyn CheckResolver>>> {
        self.delegate.get()
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        self.delegate.set(delegate);
    }

    /// Sends recursive checks to `delegate` without keeping it alive.
    /// Used to close the loop back to the top of a chain.
    pub fn set_back_edge(&self, delegate: &Arc<dyn CheckResolver>) {
        self.delegate.set_back_edge(delegate);
    }

    async fn resolve(&self, ctx: &ResolutionContext, request: ResolveCheckRequest) -> CheckOutcome {
        ctx.ensure_active()?;

        if request.request_metadata.depth == 0 {
            return Err(DomainError::ResolutionDepthExceeded);
        }

        let tuple_key = &request.tuple_key;
        let (user_object, user_relation) = tuple::split_object_relation(&tuple_key.user);
        if tuple_key.relation == user_relation && tuple_key.object == user_object {
            return Ok(ResolveCheckResponse::new(
                true,
                request.request_metadata.datastore_query_count,
            ));
        }

        let object_type = tuple::object_type(&tuple_key.object);
        let relation = ctx
            .typesystem()
            .get_relation(object_type, &tuple_key.relation)?;

        let check = self.check_rewrite(Arc::new(request), relation.rewrite.clone());
        check(ctx.clone()).await
    }

    /// Sends a sub-check for `tuple_key` through the delegate.
    fn dispatch(&self, parent: Arc<ResolveCheckRequest>, tuple_key: TupleKey) -> CheckHandler<'_> {
        handler(move |ctx| async move {
            let child = parent.clone_for_dispatch(tuple_key);
            match self.delegate.get()? {
                Some(delegate) => delegate.resolve_check(&ctx, child).await,
                None => self.resolve_check(&ctx, child).await,
            }
        })
    }

    fn check_rewrite(&self, request: Arc<ResolveCheckRequest>, rewrite: Userset) -> CheckHandler<'_> {
        match rewrite {
            Userset::This => self.check_direct(request),
            Userset::ComputedUserset { relation } => {
                let rewritten = TupleKey::new(
                    request.tuple_key.object.clone(),
                    relation,
                    request.tuple_key.user.clone(),
                );
                self.dispatch(request, rewritten)
            }
            Userset::TupleToUserset {
                tupleset,
                computed_userset,
            } => self.check_tuple_to_userset(request, tupleset, computed_userset),
            Userset::Union { children } => {
                let handlers = self.child_handlers(&request, children);
                let limit = self.concurrency_limit;
                handler(move |ctx| async move { reducers::union(&ctx, limit, handlers).await })
            }
            Userset::Intersection { children } => {
                let handlers = self.child_handlers(&request, children);
                let limit = self.concurrency_limit;
                handler(move |ctx| async move {
                    reducers::intersection(&ctx, limit, handlers).await
                })
            }
            Userset::Exclusion { base, subtract } => {
                let base = self.check_rewrite(Arc::clone(&request), *base);
                let subtract = self.check_rewrite(request, *subtract);
                let limit = self.concurrency_limit;
                handler(move |ctx| async move {
                    reducers::exclusion(&ctx, limit, base, subtract).await
                })
            }
        }
    }

    fn child_handlers(
        &self,
        request: &Arc<ResolveCheckRequest>,
        children: Vec<Userset>,
    ) -> Vec<CheckHandler<'_>> {
        children
            .into_iter()
            .map(|child| self.check_rewrite(Arc::clone(request), child))
            .collect()
    }

    /// Direct assignment: the exact tuple, or userset/wildcard tuples on the relation.
    fn check_direct(&self, request: Arc<ResolveCheckRequest>) -> CheckHandler<'_> {
        handler(move |ctx| {
            let span = debug_span!("check_direct", tuple_key = %request.tuple_key);
            async move {
                ctx.ensure_active()?;

                let tuple_key = &request.tuple_key;
                let typesystem = ctx.typesystem();
                let object_type = tuple::object_type(&tuple_key.object);

                let usersets =
                    typesystem.directly_related_usersets(object_type, &tuple_key.relation)?;
                let check_direct_tuple = typesystem.is_directly_related(
                    object_type,
                    &tuple_key.relation,
                    &reference_for_user(&tuple_key.user),
                )?;

                let has_usersets = !usersets.is_empty();
                let mut handlers = Vec::with_capacity(2);
                if check_direct_tuple {
                    handlers.push(self.check_direct_user_tuple(Arc::clone(&request)));
                }
                if has_usersets {
                    handlers.push(self.check_direct_usersets(Arc::clone(&request), usersets));
                }

                let mut resp = reducers::union(&ctx, self.concurrency_limit, handlers).await?;
                if has_usersets {
                    resp.resolution_metadata.datastore_query_count += 1;
                }
                Ok(resp)
            }
            .instrument(span)
        })
    }

    fn check_direct_user_tuple(&self, request: Arc<ResolveCheckRequest>) -> CheckHandler<'_> {
        handler(move |ctx| async move {
            ctx.ensure_active()?;

            let reads = request.request_metadata.datastore_query_count + 1;
            let found = ctx
                .tuple_reader()
                .read_user_tuple(&request.store_id, &request.tuple_key)
                .await?;

            let Some(found) = found else {
                return Ok(ResolveCheckResponse::new(false, reads));
            };
            if !ctx.typesystem().is_tuple_valid(&found) {
                debug!(tuple_key = %found, "ignoring tuple that does not fit the model");
                return Ok(ResolveCheckResponse::new(false, reads));
            }

            let met = evaluate_tuple_condition(
                self.condition_evaluator.as_ref(),
                ctx.typesystem(),
                &found,
                &request.context,
            )?;
            Ok(ResolveCheckResponse::new(met, reads))
        })
    }

    fn check_direct_usersets(
        &self,
        request: Arc<ResolveCheckRequest>,
        usersets: Vec<RelationReference>,
    ) -> CheckHandler<'_> {
        handler(move |ctx| async move {
            ctx.ensure_active()?;

            let tuple_key = &request.tuple_key;
            let filter = ReadUsersetTuplesFilter {
                object: tuple_key.object.clone(),
                relation: tuple_key.relation.clone(),
                allowed_user_type_restrictions: usersets,
            };
            let mut iter = TupleIteratorGuard::new(
                ctx.tuple_reader()
                    .read_userset_tuples(&request.store_id, &filter)
                    .await?,
            );

            let requested_user_type = tuple::user_type(&tuple_key.user);
            let user_is_object = !tuple::is_object_relation(&tuple_key.user);

            let mut handlers = Vec::new();
            let mut errs: Option<DomainError> = None;
            while let Some(found) = iter.next().await? {
                match self.admit_tuple(&ctx, &request, &found) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        errs = Some(DomainError::join(errs, e));
                        continue;
                    }
                }

                let (userset_object, userset_relation) =
                    tuple::split_object_relation(&found.user);

                if tuple::is_typed_wildcard(userset_object) {
                    if user_is_object && tuple::object_type(userset_object) == requested_user_type
                    {
                        return Ok(ResolveCheckResponse::new(
                            true,
                            request.request_metadata.datastore_query_count,
                        ));
                    }
                    continue;
                }

                if !userset_relation.is_empty() {
                    handlers.push(self.dispatch(
                        Arc::clone(&request),
                        TupleKey::new(userset_object, userset_relation, tuple_key.user.clone()),
                    ));
                }
            }
            drop(iter);

            self.union_expansion(&ctx, handlers, errs).await
        })
    }

    /// `computed_userset from tupleset`: follow each tupleset tuple to its
    /// object and check the computed relation there.
    fn check_tuple_to_userset(
        &self,
        request: Arc<ResolveCheckRequest>,
        tupleset: String,
        computed_userset: String,
    ) -> CheckHandler<'_> {
        handler(move |ctx| {
            let span = debug_span!(
                "check_tuple_to_userset",
                tuple_key = %request.tuple_key,
                tupleset = %tupleset,
                computed_userset = %computed_userset,
            );
            async move {
                ctx.ensure_active()?;

                let tuple_key = &request.tuple_key;
                let pattern = TupleKey::new(tuple_key.object.clone(), tupleset, "");
                let mut iter = TupleIteratorGuard::new(
                    ctx.tuple_reader()
                        .read(&request.store_id, &pattern)
                        .await?,
                );

                let mut handlers = Vec::new();
                let mut errs: Option<DomainError> = None;
                while let Some(found) = iter.next().await? {
                    match self.admit_tuple(&ctx, &request, &found) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            errs = Some(DomainError::join(errs, e));
                            continue;
                        }
                    }

                    let (related_object, _) = tuple::split_object_relation(&found.user);
                    let related_type = tuple::object_type(related_object);

                    // Tuplesets may mix types; not every type defines the computed relation.
                    if let Err(DomainError::RelationUndefined { .. }) = ctx
                        .typesystem()
                        .get_relation(related_type, &computed_userset)
                    {
                        continue;
                    }

                    handlers.push(self.dispatch(
                        Arc::clone(&request),
                        TupleKey::new(
                            related_object,
                            computed_userset.clone(),
                            tuple_key.user.clone(),
                        ),
                    ));
                }
                drop(iter);

                let mut resp = self.union_expansion(&ctx, handlers, errs).await?;
                resp.resolution_metadata.datastore_query_count += 1;
                Ok(resp)
            }
            .instrument(span)
        })
    }

    /// Filters out tuples that no longer fit the model and evaluates conditions.
    fn admit_tuple(
        &self,
        ctx: &ResolutionContext,
        request: &ResolveCheckRequest,
        found: &TupleKey,
    ) -> DomainResult<bool> {
        if !ctx.typesystem().is_tuple_valid(found) {
            debug!(tuple_key = %found, "ignoring tuple that does not fit the model");
            return Ok(false);
        }
        evaluate_tuple_condition(
            self.condition_evaluator.as_ref(),
            ctx.typesystem(),
            found,
            &request.context,
        )
    }

    /// Unions the sub-checks spawned while expanding tuples.
    ///
    /// Condition errors collected during expansion stand unless a sub-check allows.
    async fn union_expansion(
        &self,
        ctx: &ResolutionContext,
        handlers: Vec<CheckHandler<'_>>,
        errs: Option<DomainError>,
    ) -> CheckOutcome {
        if handlers.is_empty() {
            return match errs {
                Some(err) => Err(err),
                None => Ok(ResolveCheckResponse::new(false, 0)),
            };
        }

        match reducers::union(ctx, self.concurrency_limit, handlers).await {
            Ok(resp) if resp.allowed => Ok(resp),
            Ok(resp) => match errs {
                Some(err) => Err(err),
                None => Ok(resp),
            },
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => Err(DomainError::join(errs, e)),
        }
    }
}

#[async_trait]
impl CheckResolver for LocalChecker {
    async fn resolve_check(
        &self,
        ctx: &ResolutionContext,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        let span = debug_span!(
            "resolve_check",
            resolver = "local_checker",
            store_id = %request.store_id,
            tuple_key = %request.tuple_key,
            depth = request.request_metadata.depth,
        );
        self.resolve(ctx, request).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::mocks::empty_context;

    #[tokio::test]
    async fn test_expansion_cancellation_is_not_aggregated() {
        let checker = LocalChecker::new(LocalCheckerConfig::default());
        let ctx = empty_context();
        ctx.cancellation_token().cancel();

        let pending: CheckHandler<'_> = handler(|_| futures::future::pending());
        let condition_err = DomainError::ConditionEvaluation {
            condition: "in_office".to_string(),
            message: "missing parameters: ip".to_string(),
        };

        let err = checker
            .union_expansion(&ctx, vec![pending], Some(condition_err))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Cancelled));
    }

    #[tokio::test]
    async fn test_expansion_errors_join_union_error() {
        let checker = LocalChecker::new(LocalCheckerConfig::default());
        let ctx = empty_context();

        let failing: CheckHandler<'_> = handler(|_| async {
            Err(DomainError::Storage {
                message: "read failed".to_string(),
            })
        });
        let condition_err = DomainError::ConditionEvaluation {
            condition: "in_office".to_string(),
            message: "missing parameters: ip".to_string(),
        };

        let err = checker
            .union_expansion(&ctx, vec![failing], Some(condition_err))
            .await
            .unwrap_err();

        assert_eq!(err.into_errors().len(), 2);
    }
}
