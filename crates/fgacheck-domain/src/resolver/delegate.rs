//! The link from one resolver layer to the next.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::{DomainError, DomainResult};

use super::traits::CheckResolver;

enum Link {
    Owned(Arc<dyn CheckResolver>),
    /// Edge back to the top of the chain. Held weakly so the chain can drop.
    Back(Weak<dyn CheckResolver>),
}

/// Holds the delegate a resolver forwards to.
#[derive(Default)]
pub struct DelegateSlot {
    link: RwLock<Option<Link>>,
}

impl DelegateSlot {
    pub fn new(delegate: Arc<dyn CheckResolver>) -> Self {
        Self {
            link: RwLock::new(Some(Link::Owned(delegate))),
        }
    }

    /// Creates a slot with no delegate.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the current delegate, `None` if unset.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ResolverUnavailable` when a back edge outlived
    /// the resolver it points to.
    pub fn get(&self) -> DomainResult<Option<Arc<dyn CheckResolver>>> {
        let guard = self.link.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            None => Ok(None),
            Some(Link::Owned(delegate)) => Ok(Some(Arc::clone(delegate))),
            Some(Link::Back(weak)) => weak
                .upgrade()
                .map(Some)
                .ok_or(DomainError::ResolverUnavailable),
        }
    }

    /// Like [`DelegateSlot::get`] but treats an unset slot as unavailable.
    pub fn require(&self) -> DomainResult<Arc<dyn CheckResolver>> {
        self.get()?.ok_or(DomainError::ResolverUnavailable)
    }

    pub fn set(&self, delegate: Arc<dyn CheckResolver>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(Link::Owned(delegate));
    }

    /// Points the slot at `delegate` without keeping it alive.
    pub fn set_back_edge(&self, delegate: &Arc<dyn CheckResolver>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Link::Back(Arc::downgrade(delegate)));
    }
}

impl std::fmt::Debug for DelegateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.link.read().unwrap_or_else(PoisonError::into_inner);
        let state = match guard.as_ref() {
            None => "unset",
            Some(Link::Owned(_)) => "owned",
            Some(Link::Back(_)) => "back-edge",
        };
        f.debug_struct("DelegateSlot").field("link", &state).finish()
    }
}
