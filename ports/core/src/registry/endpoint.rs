//! Lock-free endpoint registry
//!
//! The live set is an immutable array behind an [`ArcSwap`]. Mutations build
//! a new array and publish it with compare-and-swap, retrying when another
//! writer got there first. Readers never block and always enumerate a
//! consistent snapshot.
//!
//! Disposal swaps in [`RegistryState::Frozen`]. A frozen registry rejects
//! every later mutation, so its element count can never grow again.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::channel::{same_channel, Endpoint};

/// Shared endpoint handle
pub type EndpointRef = Arc<dyn Endpoint>;

/// Backing state of an [`EndpointRegistry`]
pub enum RegistryState {
    /// Accepting mutations
    Live(Arc<[EndpointRef]>),
    /// Disposed; terminal
    Frozen,
}

/// Copy-on-write set of endpoints
pub struct EndpointRegistry {
    owner: String,
    state: ArcSwap<RegistryState>,
}

impl EndpointRegistry {
    /// Empty registry; `owner` is used in logs
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: ArcSwap::from_pointee(RegistryState::Live(Arc::from(Vec::new()))),
        }
    }

    /// Add `endpoint`
    ///
    /// Returns `false` and disposes the endpoint when the registry is frozen.
    pub fn add(&self, endpoint: EndpointRef) -> bool {
        loop {
            let current = self.state.load_full();
            let RegistryState::Live(items) = current.as_ref() else {
                tracing::debug!(
                    owner = %self.owner,
                    endpoint = %endpoint.id(),
                    "Registry frozen, rejecting endpoint"
                );
                endpoint.dispose();
                return false;
            };

            let mut next = Vec::with_capacity(items.len() + 1);
            next.extend(items.iter().cloned());
            next.push(Arc::clone(&endpoint));
            let next = Arc::new(RegistryState::Live(next.into()));

            let prev = self.state.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*prev, &current) {
                tracing::trace!(owner = %self.owner, endpoint = %endpoint.id(), "Endpoint added");
                return true;
            }
        }
    }

    /// Remove `endpoint` by identity
    ///
    /// Returns the removed handle, or `None` if it was not present or the
    /// registry is frozen. The caller decides whether to dispose it.
    pub fn remove(&self, endpoint: &EndpointRef) -> Option<EndpointRef> {
        loop {
            let current = self.state.load_full();
            let RegistryState::Live(items) = current.as_ref() else {
                return None;
            };

            let index = items.iter().position(|e| same_channel(e, endpoint))?;
            let mut next: Vec<EndpointRef> = items.to_vec();
            let removed = next.remove(index);
            let next = Arc::new(RegistryState::Live(next.into()));

            let prev = self.state.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*prev, &current) {
                tracing::trace!(owner = %self.owner, endpoint = %removed.id(), "Endpoint removed");
                return Some(removed);
            }
        }
    }

    /// Remove and dispose every endpoint that reports itself disposed
    ///
    /// Returns the number reclaimed.
    pub fn sweep(&self) -> usize {
        let stale: Vec<EndpointRef> = self
            .snapshot()
            .iter()
            .filter(|e| e.is_disposed())
            .cloned()
            .collect();

        let mut reclaimed = 0;
        for endpoint in stale {
            if let Some(removed) = self.remove(&endpoint) {
                removed.dispose();
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            tracing::debug!(owner = %self.owner, reclaimed, "Swept stale endpoints");
        }
        reclaimed
    }

    /// Remove and dispose everything, leaving the registry live
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        for endpoint in self.snapshot().iter() {
            if let Some(removed) = self.remove(endpoint) {
                removed.dispose();
                cleared += 1;
            }
        }
        cleared
    }

    /// Freeze and dispose every endpoint held at that moment
    ///
    /// Only the first call has any effect.
    pub fn dispose(&self) {
        for endpoint in self.freeze() {
            endpoint.dispose();
        }
    }

    /// Freeze, then dispose every held endpoint asynchronously
    pub async fn dispose_async(&self) {
        for endpoint in self.freeze() {
            endpoint.dispose_async().await;
        }
    }

    fn freeze(&self) -> Vec<EndpointRef> {
        let prev = self.state.swap(Arc::new(RegistryState::Frozen));
        match prev.as_ref() {
            RegistryState::Live(items) => {
                tracing::debug!(owner = %self.owner, count = items.len(), "Endpoint registry frozen");
                items.to_vec()
            }
            RegistryState::Frozen => Vec::new(),
        }
    }

    /// Current endpoints; empty once frozen
    #[must_use]
    pub fn snapshot(&self) -> Arc<[EndpointRef]> {
        match &**self.state.load() {
            RegistryState::Live(items) => Arc::clone(items),
            RegistryState::Frozen => Arc::from(Vec::new()),
        }
    }

    /// Number of endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        match &**self.state.load() {
            RegistryState::Live(items) => items.len(),
            RegistryState::Frozen => 0,
        }
    }

    /// Whether no endpoints are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`EndpointRegistry::dispose`] has run
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        matches!(**self.state.load(), RegistryState::Frozen)
    }
}
