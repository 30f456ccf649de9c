//! # Resource Observers
//!
//! Observers are told about every change to a resource's state. A resource
//! holds its observers weakly; each registration names one or more [`Owner`]s
//! and stays active only while at least one of them is alive. Closure observers
//! are retained by their owner, so dropping the owner (or calling
//! [`Resource::remove_observers`](crate::Resource::remove_observers)) is how
//! they are removed.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::resource::Resource;

/// Where new data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NewDataSource {
    Network,
    LocalOverride,
    Wipe,
}

/// A change in a resource's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceEvent {
    /// Sent only to the observer that was just added.
    ObserverAdded,
    /// A load started.
    Requested,
    /// A load was cancelled; state is unchanged.
    RequestCancelled,
    NewData(NewDataSource),
    /// The server confirmed the cached data is current.
    NotModified,
    Error,
}

pub trait ResourceObserver: Send + Sync {
    fn resource_changed(&self, resource: &Resource, event: ResourceEvent);

    /// Called once the observer is no longer attached to `resource`.
    fn stopped_observing(&self, _resource: &Resource) {}
}

impl<F> ResourceObserver for F
where
    F: Fn(&Resource, ResourceEvent) + Send + Sync,
{
    fn resource_changed(&self, resource: &Resource, event: ResourceEvent) {
        self(resource, event)
    }
}

#[derive(Default)]
pub(crate) struct OwnerInner {
    retained: Mutex<Vec<Arc<dyn ResourceObserver>>>,
}

/// Lifetime token for observer registrations.
///
/// Clones refer to the same owner.
#[derive(Clone, Default)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn retain(&self, observer: Arc<dyn ResourceObserver>) {
        self.inner.retained.lock().push(observer);
    }

    fn downgrade(&self) -> Weak<OwnerInner> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &Arc::as_ptr(&self.inner))
            .field("retained", &self.inner.retained.lock().len())
            .finish()
    }
}

struct ObserverEntry {
    observer: Weak<dyn ResourceObserver>,
    owners: Vec<Weak<OwnerInner>>,
}

impl ObserverEntry {
    fn is_observer(&self, observer: &Arc<dyn ResourceObserver>) -> bool {
        std::ptr::addr_eq(self.observer.as_ptr(), Arc::as_ptr(observer))
    }

    fn prune_owners(&mut self) {
        self.owners.retain(|owner| owner.strong_count() > 0);
    }
}

/// Observers that detached during a registry operation and should be told
/// they stopped observing.
pub(crate) type Detached = Vec<Arc<dyn ResourceObserver>>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    entries: Vec<ObserverEntry>,
}

impl ObserverRegistry {
    /// Registers `observer` under `owner`. Adding the same observer again only
    /// adds the owner. Returns `true` for a new registration.
    pub(crate) fn add(&mut self, observer: &Arc<dyn ResourceObserver>, owner: &Owner) -> bool {
        let owner_ref = owner.downgrade();
        match self.entries.iter_mut().find(|e| e.is_observer(observer)) {
            Some(entry) => {
                if !entry.owners.iter().any(|o| Weak::ptr_eq(o, &owner_ref)) {
                    entry.owners.push(owner_ref);
                }
                false
            }
            None => {
                self.entries.push(ObserverEntry {
                    observer: Arc::downgrade(observer),
                    owners: vec![owner_ref],
                });
                true
            }
        }
    }

    /// Strips `owner` from every registration, dropping those left without owners.
    pub(crate) fn remove_owner(&mut self, owner: &Owner) -> Detached {
        let owner_ref = owner.downgrade();
        for entry in &mut self.entries {
            entry.owners.retain(|o| !Weak::ptr_eq(o, &owner_ref));
        }
        self.prune()
    }

    /// Drops dead registrations and returns the live observers in registration
    /// order, along with those that detached.
    pub(crate) fn snapshot(&mut self) -> (Vec<Arc<dyn ResourceObserver>>, Detached) {
        let detached = self.prune();
        let live = self
            .entries
            .iter()
            .filter_map(|entry| entry.observer.upgrade())
            .collect();
        (live, detached)
    }

    fn prune(&mut self) -> Detached {
        let mut detached = Vec::new();
        self.entries.retain_mut(|entry| {
            entry.prune_owners();
            match entry.observer.upgrade() {
                Some(observer) if entry.owners.is_empty() => {
                    detached.push(observer);
                    false
                }
                Some(_) => true,
                None => false,
            }
        });
        detached
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl ResourceObserver for Quiet {
        fn resource_changed(&self, _: &Resource, _: ResourceEvent) {}
    }

    fn observer() -> Arc<dyn ResourceObserver> {
        Arc::new(Quiet)
    }

    #[test]
    fn test_same_observer_merges_owners() {
        let mut registry = ObserverRegistry::default();
        let obs = observer();
        let (a, b) = (Owner::new(), Owner::new());

        assert!(registry.add(&obs, &a));
        assert!(!registry.add(&obs, &b));
        assert!(!registry.add(&obs, &b));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove_owner(&a).is_empty());
        assert_eq!(registry.len(), 1);

        let detached = registry.remove_owner(&b);
        assert_eq!(detached.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dead_owner_detaches_observer() {
        let mut registry = ObserverRegistry::default();
        let obs = observer();
        let owner = Owner::new();
        registry.add(&obs, &owner);
        drop(owner);

        let (live, detached) = registry.snapshot();
        assert!(live.is_empty());
        assert_eq!(detached.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dead_observer_is_pruned_silently() {
        let mut registry = ObserverRegistry::default();
        let owner = Owner::new();
        registry.add(&observer(), &owner);

        let (live, detached) = registry.snapshot();
        assert!(live.is_empty());
        assert!(detached.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_owner_retains_closure_observers() {
        let mut registry = ObserverRegistry::default();
        let owner = Owner::new();
        let closure: Arc<dyn ResourceObserver> = Arc::new(|_: &Resource, _: ResourceEvent| {});
        registry.add(&closure, &owner);
        owner.retain(closure);

        let (live, _) = registry.snapshot();
        assert_eq!(live.len(), 1);
    }
}
