use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::HashMap;

use crate::allocation::IpAllocation;
use crate::scope_key;

/// Decision taken by [`IpAllocationSet::get_or_else`] when the key exists.
#[derive(Debug)]
pub enum Found {
    Keep,
    Replace(IpAllocation),
    Remove,
}

/// Decision taken by [`IpAllocationSet::get_or_else`] when the key is absent.
#[derive(Debug)]
pub enum Missing {
    Skip,
    Insert(IpAllocation),
}

/// Allocations of a single pool, keyed by address.
///
/// Every operation holds the lock for one map operation only. Returned
/// allocations are snapshots and may be removed concurrently.
#[derive(Debug, Default)]
pub struct IpAllocationSet {
    namespace: String,
    pool: String,
    allocations: Mutex<HashMap<String, Arc<IpAllocation>>>,
}

impl IpAllocationSet {
    pub fn new(namespace: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pool: pool.into(),
            allocations: Mutex::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Panics if the set was created without a namespace or pool.
    pub fn scope_key(&self) -> String {
        scope_key(&self.namespace, &self.pool)
    }

    // a panicking caller cannot leave the map half written, so a poisoned
    // lock is still safe to use
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<IpAllocation>>> {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Arc<IpAllocation>> {
        self.lock().get(key).cloned()
    }

    /// Looks up `key` and runs exactly one of the callbacks while holding the
    /// lock, then applies the returned decision before releasing it.
    ///
    /// This is the only race free way to act on the presence of a key. The
    /// callbacks must not call back into this set.
    pub fn get_or_else<F, M>(&self, key: &str, on_found: F, on_missing: M)
    where
        F: FnOnce(&IpAllocation) -> Found,
        M: FnOnce() -> Missing,
    {
        let mut allocations = self.lock();
        match allocations.get(key).cloned() {
            Some(current) => match on_found(&current) {
                Found::Keep => {}
                Found::Replace(allocation) => {
                    assert_eq!(allocation.key(), key, "replacement must keep its key");
                    allocations.insert(key.to_owned(), Arc::new(allocation));
                }
                Found::Remove => {
                    allocations.remove(key);
                }
            },
            None => match on_missing() {
                Missing::Skip => {}
                Missing::Insert(allocation) => {
                    assert_eq!(allocation.key(), key, "insertion must use the looked up key");
                    allocations.insert(key.to_owned(), Arc::new(allocation));
                }
            },
        }
    }

    /// Inserts or overwrites, returning the previous allocation for the key.
    pub fn put(&self, allocation: IpAllocation) -> Option<Arc<IpAllocation>> {
        let key = allocation.key();
        self.lock().insert(key, Arc::new(allocation))
    }

    pub fn delete(&self, key: &str) -> Option<Arc<IpAllocation>> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn records(&self) -> Vec<Arc<IpAllocation>> {
        self.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::net::{IpAddr, Ipv4Addr};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn make_allocation(i: u8) -> IpAllocation {
        IpAllocation {
            ip: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 10, i))),
            namespace: "default".into(),
            pool: "floatingip".into(),
            pod_name: format!("pod{i}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_concurrent_put_get() {
        const COUNT: u8 = 254;
        let set = IpAllocationSet::new("default", "floatingip");

        std::thread::scope(|s| {
            for i in 1..=COUNT {
                let set = &set;
                s.spawn(move || {
                    set.put(make_allocation(i));
                });
            }
        });

        let found = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 1..=COUNT {
                let (set, found) = (&set, &found);
                s.spawn(move || {
                    let key = make_allocation(i).key();
                    let allocation = set.get(&key).expect("allocation must be found");
                    assert_eq!(allocation.pod_name, format!("pod{i}"));
                    found.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(found.load(Ordering::SeqCst), COUNT as usize);
        assert_eq!(set.len(), COUNT as usize);
    }

    #[test]
    fn test_concurrent_get_or_else_inserts_once() {
        let set = IpAllocationSet::new("default", "floatingip");
        let inserted = AtomicUsize::new(0);
        let seen = AtomicUsize::new(0);
        let key = make_allocation(7).key();

        std::thread::scope(|s| {
            for _ in 0..256 {
                let (set, inserted, seen, key) = (&set, &inserted, &seen, &key);
                s.spawn(move || {
                    set.get_or_else(
                        key,
                        |_| {
                            seen.fetch_add(1, Ordering::SeqCst);
                            Found::Keep
                        },
                        || {
                            inserted.fetch_add(1, Ordering::SeqCst);
                            Missing::Insert(make_allocation(7))
                        },
                    );
                });
            }
        });

        assert_eq!(inserted.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 255);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_delete() {
        let set = IpAllocationSet::new("default", "floatingip");
        let allocation = make_allocation(2);
        let key = allocation.key();

        assert!(set.put(allocation).is_none());
        assert!(set.delete(&key).is_some());
        assert!(set.get(&key).is_none());
        assert!(set.delete(&key).is_none());
        assert!(set.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let set = IpAllocationSet::default();
        set.put(make_allocation(3));
        let mut other = make_allocation(3);
        other.pod_name = "pod-other".into();

        let previous = set.put(other).expect("previous allocation");
        assert_eq!(previous.pod_name, "pod3");
        assert_eq!(set.get("192.168.10.3").unwrap().pod_name, "pod-other");
    }

    #[test]
    fn test_get_or_else_matches_presence() {
        let set = IpAllocationSet::new("default", "floatingip");
        set.put(make_allocation(1));

        let calls = RefCell::new(Vec::new());
        for key in ["192.168.10.1", "192.168.10.2"] {
            set.get_or_else(
                key,
                |a| {
                    calls.borrow_mut().push(format!("found {}", a.pod_name));
                    Found::Keep
                },
                || {
                    calls.borrow_mut().push(format!("missing {key}"));
                    Missing::Skip
                },
            );
        }

        assert_eq!(
            calls.into_inner(),
            vec!["found pod1".to_string(), "missing 192.168.10.2".to_string()]
        );
        assert!(set.get("192.168.10.2").is_none());
    }

    #[test]
    fn test_get_or_else_replace_and_remove() {
        let set = IpAllocationSet::new("default", "floatingip");
        set.put(make_allocation(1));

        set.get_or_else(
            "192.168.10.1",
            |a| {
                let mut a = a.clone();
                a.namespace = "other".into();
                Found::Replace(a)
            },
            || Missing::Skip,
        );
        assert_eq!(set.get("192.168.10.1").unwrap().namespace, "other");

        set.get_or_else("192.168.10.1", |_| Found::Remove, || Missing::Skip);
        assert!(set.get("192.168.10.1").is_none());
    }

    #[test]
    fn test_panicking_callback_leaves_set_usable() {
        let set = IpAllocationSet::new("default", "floatingip");
        set.put(make_allocation(1));

        let result = catch_unwind(AssertUnwindSafe(|| {
            set.get_or_else("192.168.10.1", |_| panic!("boom"), || Missing::Skip);
        }));
        assert!(result.is_err());

        set.put(make_allocation(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    #[should_panic(expected = "is not set")]
    fn test_put_unset_ip() {
        let set = IpAllocationSet::new("default", "floatingip");
        set.put(IpAllocation::default());
    }

    #[test]
    fn test_records_snapshot() {
        let set = IpAllocationSet::new("default", "floatingip");
        assert_eq!(set.namespace(), "default");
        assert_eq!(set.pool(), "floatingip");
        assert!(set.records().is_empty());

        set.put(make_allocation(4));
        set.put(make_allocation(5));
        let snapshot = set.records();
        set.delete("192.168.10.4");

        let mut pods: Vec<_> = snapshot.iter().map(|a| a.pod_name.as_str()).collect();
        pods.sort_unstable();
        assert_eq!(pods, ["pod4", "pod5"]);
        assert_eq!(set.records().len(), 1);
        assert_eq!(set.records()[0].pod_name, "pod5");
    }

    #[test]
    fn test_scope_key() {
        let set = IpAllocationSet::new("default", "floating");
        assert_eq!(set.scope_key(), "default_floating");
    }

    #[test]
    #[should_panic(expected = "scope key requires namespace and pool name")]
    fn test_scope_key_unscoped() {
        IpAllocationSet::default().scope_key();
    }
}
