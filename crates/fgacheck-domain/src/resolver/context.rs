//! Per-check collaborators and cancellation scope.

use std::sync::Arc;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{DomainError, DomainResult};
use crate::model::TypeSystem;

use super::traits::TupleReader;

/// Everything a resolver needs besides the request itself.
///
/// Cloning is cheap; reducers clone it into every child branch.
#[derive(Clone)]
pub struct ResolutionContext {
    typesystem: Arc<TypeSystem>,
    tuple_reader: Arc<dyn TupleReader>,
    cancellation: CancellationToken,
}

impl ResolutionContext {
    pub fn new(typesystem: Arc<TypeSystem>, tuple_reader: Arc<dyn TupleReader>) -> Self {
        Self {
            typesystem,
            tuple_reader,
            cancellation: CancellationToken::new(),
        }
    }

    /// Uses a caller supplied cancellation scope.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn typesystem(&self) -> &Arc<TypeSystem> {
        &self.typesystem
    }

    pub fn tuple_reader(&self) -> &Arc<dyn TupleReader> {
        &self.tuple_reader
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails with `DomainError::Cancelled` once the scope is cancelled.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        Ok(())
    }

    /// Resolves when the scope is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Derives a child scope. The guard cancels the child when dropped;
    /// cancelling the parent cancels the child too.
    pub(crate) fn child_scope(&self) -> (Self, DropGuard) {
        let token = self.cancellation.child_token();
        let child = Self {
            typesystem: Arc::clone(&self.typesystem),
            tuple_reader: Arc::clone(&self.tuple_reader),
            cancellation: token.clone(),
        };
        (child, token.drop_guard())
    }
}

impl std::fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("model_id", &self.typesystem.model_id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
