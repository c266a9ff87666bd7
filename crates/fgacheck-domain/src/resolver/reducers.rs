//! Set-operation reducers shared by every rewrite combinator.
//!
//! Each reducer runs its child handlers concurrently (at most
//! `concurrency_limit` in flight), consumes their outcomes from one stream and
//! returns as soon as the outcome is decided. Returning drops the stream, which
//! stops unfinished children, and the scope guard cancels the children's
//! cancellation scope. Both happen on every exit path.
//!
//! Cost accounting sums the `datastore_query_count` of the children that
//! finished before the decision. Children stopped early contribute nothing.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};

use crate::error::DomainError;

use super::context::ResolutionContext;
use super::types::{CheckOutcome, ResolveCheckResponse};

/// One unit of work in a reducer: evaluates a sub-problem in the given scope.
pub type CheckHandler<'a> =
    Box<dyn FnOnce(ResolutionContext) -> BoxFuture<'a, CheckOutcome> + Send + 'a>;

/// Wraps an async closure as a [`CheckHandler`].
pub fn handler<'a, F, Fut>(f: F) -> CheckHandler<'a>
where
    F: FnOnce(ResolutionContext) -> Fut + Send + 'a,
    Fut: std::future::Future<Output = CheckOutcome> + Send + 'a,
{
    Box::new(move |ctx| Box::pin(f(ctx)))
}

/// Creates every child future up front. Boxed futures do nothing until
/// polled, so the stream's buffer still bounds how many run at once.
fn start_all<'a>(
    scope: &ResolutionContext,
    handlers: Vec<CheckHandler<'a>>,
) -> Vec<BoxFuture<'a, CheckOutcome>> {
    handlers.into_iter().map(|h| h(scope.clone())).collect()
}

/// Allowed if any child is allowed.
///
/// Child errors do not stop the others; an error is returned only if no
/// child allowed. The first error observed is the one surfaced.
pub async fn union<'a>(
    ctx: &ResolutionContext,
    concurrency_limit: usize,
    handlers: Vec<CheckHandler<'a>>,
) -> CheckOutcome {
    let (scope, _scope_guard) = ctx.child_scope();
    let outcomes =
        stream::iter(start_all(&scope, handlers)).buffer_unordered(concurrency_limit.max(1));
    tokio::pin!(outcomes);

    let mut db_reads: u32 = 0;
    let mut cycle_detected = false;
    let mut first_err: Option<DomainError> = None;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(DomainError::Cancelled),
            next = outcomes.next() => match next {
                Some(outcome) => outcome,
                None => break,
            },
        };

        match outcome {
            Err(e) => {
                first_err.get_or_insert(e);
            }
            Ok(resp) => {
                db_reads = db_reads.saturating_add(resp.datastore_query_count());
                if resp.allowed {
                    return Ok(ResolveCheckResponse::new(true, db_reads));
                }
                cycle_detected |= resp.cycle_detected();
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    let mut resp = ResolveCheckResponse::new(false, db_reads);
    resp.resolution_metadata.cycle_detected = cycle_detected;
    Ok(resp)
}

/// Allowed only if every child is allowed. Zero children is never allowed.
///
/// A child reporting `false` or a cycle decides the result immediately, even
/// after other children failed. Errors are aggregated and returned only when
/// no child decided the result.
pub async fn intersection<'a>(
    ctx: &ResolutionContext,
    concurrency_limit: usize,
    handlers: Vec<CheckHandler<'a>>,
) -> CheckOutcome {
    if handlers.is_empty() {
        return Ok(ResolveCheckResponse::new(false, 0));
    }

    let (scope, _scope_guard) = ctx.child_scope();
    let outcomes =
        stream::iter(start_all(&scope, handlers)).buffer_unordered(concurrency_limit.max(1));
    tokio::pin!(outcomes);

    let mut db_reads: u32 = 0;
    let mut errs: Option<DomainError> = None;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(DomainError::Cancelled),
            next = outcomes.next() => match next {
                Some(outcome) => outcome,
                None => break,
            },
        };

        match outcome {
            Err(e) => errs = Some(DomainError::join(errs, e)),
            Ok(resp) => {
                db_reads = db_reads.saturating_add(resp.datastore_query_count());
                if resp.cycle_detected() {
                    return Ok(ResolveCheckResponse::cycle(db_reads));
                }
                if !resp.allowed {
                    return Ok(ResolveCheckResponse::new(false, db_reads));
                }
            }
        }
    }

    match errs {
        Some(err) => Err(err),
        None => Ok(ResolveCheckResponse::new(true, db_reads)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Base,
    Subtract,
}

/// `base but not subtract`.
///
/// A cycle in either operand, `base = false` or `subtract = true` decide the
/// result immediately. Otherwise any operand error is returned, aggregated
/// when both failed.
pub async fn exclusion<'a>(
    ctx: &ResolutionContext,
    concurrency_limit: usize,
    base: CheckHandler<'a>,
    subtract: CheckHandler<'a>,
) -> CheckOutcome {
    let (scope, _scope_guard) = ctx.child_scope();
    let base = base(scope.clone());
    let subtract = subtract(scope.clone());
    let tagged: Vec<BoxFuture<'a, (Operand, CheckOutcome)>> = vec![
        Box::pin(async move { (Operand::Base, base.await) }),
        Box::pin(async move { (Operand::Subtract, subtract.await) }),
    ];
    let outcomes = stream::iter(tagged).buffer_unordered(concurrency_limit.clamp(1, 2));
    tokio::pin!(outcomes);

    let mut db_reads: u32 = 0;
    let mut base_err: Option<DomainError> = None;
    let mut subtract_err: Option<DomainError> = None;

    loop {
        let (operand, outcome) = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(DomainError::Cancelled),
            next = outcomes.next() => match next {
                Some(tagged) => tagged,
                None => break,
            },
        };

        let resp = match (operand, outcome) {
            (Operand::Base, Err(e)) => {
                base_err = Some(e);
                continue;
            }
            (Operand::Subtract, Err(e)) => {
                subtract_err = Some(e);
                continue;
            }
            (_, Ok(resp)) => resp,
        };

        db_reads = db_reads.saturating_add(resp.datastore_query_count());
        if resp.cycle_detected() {
            return Ok(ResolveCheckResponse::cycle(db_reads));
        }
        let decisive = match operand {
            Operand::Base => !resp.allowed,
            Operand::Subtract => resp.allowed,
        };
        if decisive {
            return Ok(ResolveCheckResponse::new(false, db_reads));
        }
    }

    match (base_err, subtract_err) {
        (None, None) => Ok(ResolveCheckResponse::new(true, db_reads)),
        (Some(err), None) | (None, Some(err)) => Err(err),
        (Some(base), Some(subtract)) => Err(DomainError::join(Some(base), subtract)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::resolver::tests::mocks::empty_context;

    fn respond(allowed: bool, reads: u32) -> CheckHandler<'static> {
        handler(move |_| async move { Ok(ResolveCheckResponse::new(allowed, reads)) })
    }

    fn respond_after(allowed: bool, reads: u32, delay: Duration) -> CheckHandler<'static> {
        handler(move |_| async move {
            tokio::time::sleep(delay).await;
            Ok(ResolveCheckResponse::new(allowed, reads))
        })
    }

    fn fail(message: &str) -> CheckHandler<'static> {
        let message = message.to_string();
        handler(move |_| async move { Err(DomainError::Storage { message }) })
    }

    fn cycle() -> CheckHandler<'static> {
        handler(|_| async { Ok(ResolveCheckResponse::cycle(0)) })
    }

    fn never() -> CheckHandler<'static> {
        handler(|_| futures::future::pending())
    }

    // ========== Section 1: Union ==========

    #[tokio::test]
    async fn test_union_short_circuits_on_first_allow() {
        let ctx = empty_context();
        let result = union(&ctx, 10, vec![respond(false, 1), respond(true, 1), never()])
            .await
            .unwrap();
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_union_allow_outweighs_sibling_error() {
        let ctx = empty_context();
        let result = union(&ctx, 10, vec![fail("boom"), respond(true, 2)])
            .await
            .unwrap();
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_union_allow_hides_error_of_unfinished_child() {
        let ctx = empty_context();
        let slow_failure = handler(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(DomainError::Storage {
                message: "should not surface".to_string(),
            })
        });
        let result = union(&ctx, 10, vec![respond(false, 1), respond(true, 1), slow_failure])
            .await
            .unwrap();
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_union_without_allow_sums_reads_and_ors_cycles() {
        let ctx = empty_context();
        let result = union(&ctx, 10, vec![respond(false, 2), cycle(), respond(false, 3)])
            .await
            .unwrap();
        assert!(!result.allowed);
        assert!(result.cycle_detected());
        assert_eq!(result.datastore_query_count(), 5);
    }

    #[tokio::test]
    async fn test_union_surfaces_error_when_nothing_allows() {
        let ctx = empty_context();
        let err = union(&ctx, 10, vec![respond(false, 1), fail("boom")])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_union_of_nothing_is_denied() {
        let ctx = empty_context();
        let result = union(&ctx, 10, vec![]).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.datastore_query_count(), 0);
    }

    #[tokio::test]
    async fn test_union_with_concurrency_limit_of_one() {
        let ctx = empty_context();
        let result = union(
            &ctx,
            1,
            vec![respond(false, 1), respond(false, 1), respond(true, 1)],
        )
        .await
        .unwrap();
        assert!(result.allowed);
        assert_eq!(result.datastore_query_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_running_children() {
        use std::sync::atomic::AtomicUsize;

        let ctx = empty_context();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tracked = |running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>| {
            handler(move |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ResolveCheckResponse::new(false, 1))
            })
        };
        let handlers = (0..6)
            .map(|_| tracked(Arc::clone(&running), Arc::clone(&peak)))
            .collect();

        let result = union(&ctx, 2, handlers).await.unwrap();

        assert!(!result.allowed);
        assert_eq!(result.datastore_query_count(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    // ========== Section 2: Intersection ==========

    #[tokio::test]
    async fn test_intersection_of_nothing_is_denied() {
        let ctx = empty_context();
        let result = intersection(&ctx, 10, vec![]).await.unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn test_intersection_requires_every_child() {
        let ctx = empty_context();
        let result = intersection(&ctx, 10, vec![respond(true, 1), respond(true, 2)])
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.datastore_query_count(), 3);
    }

    #[tokio::test]
    async fn test_intersection_short_circuits_on_deny() {
        let ctx = empty_context();
        let result = intersection(&ctx, 10, vec![respond(false, 1), never()])
            .await
            .unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn test_intersection_short_circuits_on_cycle() {
        let ctx = empty_context();
        let result = intersection(&ctx, 10, vec![cycle(), never()]).await.unwrap();
        assert!(!result.allowed);
        assert!(result.cycle_detected());
    }

    #[tokio::test]
    async fn test_intersection_deny_outweighs_earlier_error() {
        let ctx = empty_context();
        let result = intersection(
            &ctx,
            10,
            vec![
                fail("boom"),
                respond_after(false, 1, Duration::from_millis(20)),
            ],
        )
        .await
        .unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn test_intersection_aggregates_errors() {
        let ctx = empty_context();
        let err = intersection(&ctx, 10, vec![fail("a"), respond(true, 1), fail("b")])
            .await
            .unwrap_err();
        match err {
            DomainError::Aggregate(agg) => assert_eq!(agg.errors().len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    // ========== Section 3: Exclusion ==========

    #[tokio::test]
    async fn test_exclusion_algebra() {
        let ctx = empty_context();
        let cases = [
            (true, true, false),
            (true, false, true),
            (false, true, false),
            (false, false, false),
        ];

        for (base, sub, expected) in cases {
            let result = exclusion(&ctx, 10, respond(base, 1), respond(sub, 1))
                .await
                .unwrap();
            assert_eq!(
                result.allowed, expected,
                "base={base} subtract={sub} should be {expected}"
            );
        }
    }

    #[tokio::test]
    async fn test_exclusion_cycle_does_not_wait_for_other_operand() {
        let ctx = empty_context();
        let result = exclusion(&ctx, 10, never(), cycle()).await.unwrap();
        assert!(!result.allowed);
        assert!(result.cycle_detected());
    }

    #[tokio::test]
    async fn test_exclusion_decisive_result_discards_error() {
        let ctx = empty_context();

        let result = exclusion(&ctx, 10, respond(false, 1), fail("sub")).await;
        assert!(!result.unwrap().allowed);

        let result = exclusion(&ctx, 10, fail("base"), respond(true, 1)).await;
        assert!(!result.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_exclusion_error_with_non_decisive_sibling() {
        let ctx = empty_context();
        let err = exclusion(&ctx, 10, fail("base"), respond(false, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_exclusion_aggregates_both_errors() {
        let ctx = empty_context();
        let err = exclusion(&ctx, 10, fail("base"), fail("sub"))
            .await
            .unwrap_err();
        assert_eq!(err.into_errors().len(), 2);
    }

    #[tokio::test]
    async fn test_exclusion_with_concurrency_limit_of_one() {
        let ctx = empty_context();
        let result = exclusion(&ctx, 1, respond(true, 1), respond(false, 1))
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.datastore_query_count(), 2);
    }

    #[tokio::test]
    async fn test_exclusion_operands_borrow_same_state() {
        let ctx = empty_context();
        let label = String::from("shared");
        let borrowed = &label;

        let base = handler(move |_| async move {
            Ok(ResolveCheckResponse::new(!borrowed.is_empty(), 1))
        });
        let subtract = handler(move |_| async move {
            Ok(ResolveCheckResponse::new(borrowed.is_empty(), 1))
        });

        let result = exclusion(&ctx, 2, base, subtract).await.unwrap();
        assert!(result.allowed);
    }

    // ========== Section 4: Cancellation ==========

    #[tokio::test]
    async fn test_cancelled_scope_returns_cancelled() {
        let ctx = empty_context();
        ctx.cancellation_token().cancel();

        let err = union(&ctx, 10, vec![never()]).await.unwrap_err();
        assert!(err.is_cancellation());

        let err = intersection(&ctx, 10, vec![never()]).await.unwrap_err();
        assert!(err.is_cancellation());

        let err = exclusion(&ctx, 10, never(), never()).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_cancellation_while_children_pending() {
        let ctx = empty_context();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = union(&ctx, 10, vec![never(), never()]).await.unwrap_err();
        assert!(matches!(err, DomainError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_scope_is_cancelled_after_short_circuit() {
        let ctx = empty_context();
        let observed = Arc::new(AtomicBool::new(false));

        let observer = {
            let observed = Arc::clone(&observed);
            handler(move |scope: ResolutionContext| async move {
                let token = scope.cancellation_token().clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    observed.store(true, Ordering::SeqCst);
                });
                futures::future::pending::<CheckOutcome>().await
            })
        };

        let result = union(&ctx, 10, vec![observer, respond_after(true, 0, Duration::from_millis(5))])
            .await
            .unwrap();
        assert!(result.allowed);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(observed.load(Ordering::SeqCst));
        assert!(!ctx.is_cancelled());
    }
}
