use std::sync::Arc;

use dashmap::DashMap;
use floatingip_common::{
    allocation::IpAllocation,
    registry::{Found, IpAllocationSet, Missing},
    scope_key,
};
use tracing::{debug, warn};

/// Allocation registries keyed by pool scope, created on first use.
#[derive(Debug, Default)]
pub struct PoolAllocations {
    sets: DashMap<String, Arc<IpAllocationSet>>,
}

impl PoolAllocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, pool: &str) -> Option<Arc<IpAllocationSet>> {
        self.sets
            .get(&scope_key(namespace, pool))
            .map(|set| set.value().clone())
    }

    fn set_for(&self, namespace: &str, pool: &str) -> Arc<IpAllocationSet> {
        self.sets
            .entry(scope_key(namespace, pool))
            .or_insert_with(|| Arc::new(IpAllocationSet::new(namespace, pool)))
            .value()
            .clone()
    }

    /// Registers the allocation unless its address is already recorded.
    ///
    /// Returns false when another pod holds the address; the existing record
    /// is kept.
    pub fn record(&self, allocation: IpAllocation) -> bool {
        let set = self.set_for(&allocation.namespace, &allocation.pool);
        let key = allocation.key();
        let namespace = allocation.namespace.clone();
        let pod_name = allocation.pod_name.clone();

        let mut holder = None;
        set.get_or_else(
            &key,
            |current| {
                if !current.belongs_to(&namespace, &pod_name) {
                    holder = Some(current.pod_name.clone());
                }
                Found::Keep
            },
            || {
                debug!(
                    "recording floating ip {} for pod {}/{}",
                    key, namespace, pod_name
                );
                Missing::Insert(allocation)
            },
        );

        match holder {
            Some(holder) => {
                warn!(
                    "floating ip {} of pod {}/{} is already held by pod {} in pool {}",
                    key,
                    namespace,
                    pod_name,
                    holder,
                    set.pool()
                );
                false
            }
            None => true,
        }
    }

    /// Drops the record of the allocation's address if it still belongs to
    /// the same pod. Returns whether a record was removed.
    pub fn release(&self, allocation: &IpAllocation) -> bool {
        let Some(set) = self.get(&allocation.namespace, &allocation.pool) else {
            return false;
        };
        let key = allocation.key();

        let mut released = false;
        set.get_or_else(
            &key,
            |current| {
                if current.belongs_to(&allocation.namespace, &allocation.pod_name) {
                    released = true;
                    Found::Remove
                } else {
                    Found::Keep
                }
            },
            || Missing::Skip,
        );
        if released {
            debug!(
                "released floating ip {} of pod {}/{}",
                key, allocation.namespace, allocation.pod_name
            );
        }
        released
    }

    /// Number of recorded allocations across all pools.
    pub fn len(&self) -> usize {
        self.sets.iter().map(|set| set.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
