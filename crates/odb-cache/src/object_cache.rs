//! Identity cache: at most one live proxy per object per transaction.
//!
//! Each slot is either *constructing* (owned by one construction scope) or
//! *present* (a weak reference to the published proxy). A single mutex guards
//! the slot map; a condition variable wakes threads waiting on another
//! thread's construction. Factories always run with the lock released.
//!
//! Proxies are held weakly. Once the last strong reference is dropped the slot
//! is dead and is removed lazily: on the next lookup of the same id, in bulk
//! every [`CacheConfig::sweep_interval`] publications, or by
//! [`ObjectCache::evict_dead`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use odb_error::{OdbError, Result};
use odb_txn::Transaction;
use odb_types::{Cx, ObjId};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::construction::{Construction, ConstructionScope, Proxy, ProxyFactory, ScopeToken};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};

/// Tuning knobs for an [`ObjectCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Longest single block on the condition variable before re-checking the
    /// caller's cancellation flag and deadline.
    pub wait_slice: Duration,
    /// Publications between bulk sweeps of dead slots. Zero disables bulk
    /// sweeping.
    pub sweep_interval: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            wait_slice: Duration::from_millis(10),
            sweep_interval: 256,
        }
    }
}

enum Slot<P> {
    Constructing { owner: ScopeToken, thread: ThreadId },
    Present(Weak<P>),
}

struct CacheState<P> {
    slots: HashMap<ObjId, Slot<P>>,
    published_since_sweep: usize,
}

impl<P> CacheState<P> {
    /// Drop every present slot whose proxy is gone. Returns the count removed.
    fn sweep(&mut self) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| !matches!(slot, Slot::Present(weak) if weak.strong_count() == 0));
        self.published_since_sweep = 0;
        before - self.slots.len()
    }
}

/// What a lookup found in the slot map, copied out of the lock's borrow.
enum Observed<P> {
    Live(Arc<P>),
    Dead,
    Constructing(ScopeToken, ThreadId),
    Absent,
}

/// Per-transaction identity cache.
pub struct ObjectCache<P: Proxy> {
    txn: Arc<dyn Transaction>,
    factory: Arc<dyn ProxyFactory<P>>,
    config: CacheConfig,
    state: Mutex<CacheState<P>>,
    constructed: Condvar,
    metrics: CacheMetrics,
}

impl<P: Proxy> ObjectCache<P> {
    pub fn new(txn: Arc<dyn Transaction>, factory: impl ProxyFactory<P> + 'static) -> Self {
        Self::with_config(txn, factory, CacheConfig::default())
    }

    pub fn with_config(
        txn: Arc<dyn Transaction>,
        factory: impl ProxyFactory<P> + 'static,
        config: CacheConfig,
    ) -> Self {
        Self::with_shared_factory(txn, Arc::new(factory), config)
    }

    /// Cache whose factory is shared with other caches, e.g. one per
    /// transaction over the same schema.
    pub fn with_shared_factory(
        txn: Arc<dyn Transaction>,
        factory: Arc<dyn ProxyFactory<P>>,
        config: CacheConfig,
    ) -> Self {
        Self {
            txn,
            factory,
            config,
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                published_since_sweep: 0,
            }),
            constructed: Condvar::new(),
            metrics: CacheMetrics::new(),
        }
    }

    /// Transaction every proxy in this cache is bound to.
    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        &self.txn
    }

    pub fn factory(&self) -> &Arc<dyn ProxyFactory<P>> {
        &self.factory
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The unique live proxy for `id`, constructing it if needed.
    ///
    /// If another thread is constructing `id`, blocks until it publishes or
    /// rolls back. The wait observes `cx`: cancellation yields
    /// [`OdbError::Interrupted`] and an elapsed budget deadline yields
    /// [`OdbError::Busy`]. Neither disturbs the other thread's construction.
    pub fn lookup_or_create(&self, cx: &Cx, id: ObjId) -> Result<Arc<P>> {
        let scope = ConstructionScope::new();
        self.lookup_in_scope(cx, &scope, id)
    }

    /// The live proxy for `id`, if one is published. Never constructs.
    pub fn lookup_if_present(&self, id: ObjId) -> Option<Arc<P>> {
        let mut state = self.state.lock();
        let upgraded = match state.slots.get(&id) {
            Some(Slot::Present(weak)) => weak.upgrade(),
            Some(Slot::Constructing { .. }) | None => return None,
        };
        if upgraded.is_none() {
            state.slots.remove(&id);
            self.metrics.record_evictions(1);
            trace!(id = %id, "evicted dead proxy slot");
        }
        upgraded
    }

    /// Whether a live proxy for `id` is published.
    pub fn contains_live(&self, id: ObjId) -> bool {
        matches!(
            self.state.lock().slots.get(&id),
            Some(Slot::Present(weak)) if weak.strong_count() > 0
        )
    }

    /// Number of slots, including constructing and not-yet-swept dead ones.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of published proxies still alive.
    pub fn live_len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Present(weak) if weak.strong_count() > 0))
            .count()
    }

    /// Remove every dead slot now. Returns how many were removed.
    pub fn evict_dead(&self) -> usize {
        let removed = self.state.lock().sweep();
        self.metrics.record_evictions(removed as u64);
        if removed > 0 {
            debug!(removed, "swept dead proxy slots");
        }
        removed
    }

    pub(crate) fn lookup_in_scope(
        &self,
        cx: &Cx,
        scope: &ConstructionScope<P>,
        id: ObjId,
    ) -> Result<Arc<P>> {
        if let Some(registered) = scope.in_progress(id) {
            return match registered {
                Some(proxy) => {
                    self.metrics.record_reentrant_hit();
                    trace!(id = %id, "reentrant lookup resolved to registered proxy");
                    Ok(proxy)
                }
                None => Err(OdbError::ReentrantConstruction { id: id.get() }),
            };
        }

        let mut state = self.state.lock();
        if self.config.sweep_interval > 0
            && state.published_since_sweep >= self.config.sweep_interval
        {
            let removed = state.sweep();
            self.metrics.record_evictions(removed as u64);
        }

        let mut wait_started: Option<Instant> = None;
        loop {
            let observed = match state.slots.get(&id) {
                Some(Slot::Present(weak)) => weak.upgrade().map_or(Observed::Dead, Observed::Live),
                Some(Slot::Constructing { owner, thread: builder }) => {
                    Observed::Constructing(*owner, *builder)
                }
                None => Observed::Absent,
            };
            match observed {
                Observed::Live(proxy) => {
                    self.metrics.record_hit();
                    return Ok(proxy);
                }
                Observed::Dead => {
                    state.slots.remove(&id);
                    self.metrics.record_evictions(1);
                    trace!(id = %id, "evicted dead proxy slot");
                    break;
                }
                Observed::Absent => break,
                Observed::Constructing(owner, _) if owner == scope.token() => {
                    return Err(OdbError::internal(format!(
                        "slot {id} owned by this scope but not tracked by it"
                    )));
                }
                // A lookup that bypassed the construction context would wait
                // on itself.
                Observed::Constructing(_, builder) if builder == thread::current().id() => {
                    error!(id = %id, "proxy looked up on its constructing thread outside its construction context");
                    return Err(OdbError::ReentrantConstruction { id: id.get() });
                }
                Observed::Constructing(..) => {
                    let started = *wait_started.get_or_insert_with(|| {
                        self.metrics.record_wait();
                        debug!(id = %id, "waiting on concurrent proxy construction");
                        Instant::now()
                    });
                    if let Err(err) = cx.checkpoint() {
                        self.metrics.record_interrupted_wait();
                        warn!(id = %id, "wait for proxy construction interrupted");
                        return Err(err);
                    }
                    let slice = match cx.budget().deadline {
                        Some(deadline) => {
                            let elapsed = started.elapsed();
                            if elapsed >= deadline {
                                warn!(id = %id, ?deadline, "proxy construction wait exceeded deadline");
                                return Err(OdbError::Busy { id: id.get() });
                            }
                            (deadline - elapsed).min(self.config.wait_slice)
                        }
                        None => self.config.wait_slice,
                    };
                    self.constructed.wait_for(&mut state, slice);
                }
            }
        }

        state.slots.insert(
            id,
            Slot::Constructing {
                owner: scope.token(),
                thread: thread::current().id(),
            },
        );
        drop(state);
        self.metrics.record_miss();
        self.construct(cx, scope, id)
    }

    /// Run the factory for a slot this scope has just claimed.
    fn construct(&self, cx: &Cx, scope: &ConstructionScope<P>, id: ObjId) -> Result<Arc<P>> {
        scope.begin(id);
        let pending = PendingConstruction {
            cache: self,
            scope,
            id,
            published: false,
        };
        debug!(id = %id, "constructing proxy");

        let built = self.factory.construct(&Construction {
            cache: self,
            scope,
            cx,
            id,
        });
        let registered = scope.finish(id);

        let checked = built.and_then(|proxy| {
            let actual = proxy.id();
            if actual != id {
                return Err(OdbError::ProxyIdMismatch {
                    expected: id.get(),
                    actual: actual.get(),
                });
            }
            match registered {
                Some(early) if !Arc::ptr_eq(&early, &proxy) => {
                    error!(id = %id, "factory returned a different proxy than it registered");
                    Err(OdbError::IdentityMismatch { id: id.get() })
                }
                _ => Ok(proxy),
            }
        });

        match checked {
            Ok(proxy) => {
                pending.publish(&proxy);
                Ok(proxy)
            }
            Err(err) => {
                warn!(id = %id, error = %err, "proxy construction failed");
                drop(pending);
                Err(err)
            }
        }
    }
}

impl<P: Proxy> std::fmt::Debug for ObjectCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("txn_id", &self.txn.txn_id())
            .field("slots", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Owns a constructing slot until it is published. Dropping it unpublished,
/// whether on error or during a panic, clears the slot and wakes waiters.
struct PendingConstruction<'a, P: Proxy> {
    cache: &'a ObjectCache<P>,
    scope: &'a ConstructionScope<P>,
    id: ObjId,
    published: bool,
}

impl<P: Proxy> PendingConstruction<'_, P> {
    fn publish(mut self, proxy: &Arc<P>) {
        {
            let mut state = self.cache.state.lock();
            state.slots.insert(self.id, Slot::Present(Arc::downgrade(proxy)));
            state.published_since_sweep += 1;
        }
        self.published = true;
        self.cache.metrics.record_construction();
        self.cache.constructed.notify_all();
        trace!(id = %self.id, "published proxy");
    }
}

impl<P: Proxy> Drop for PendingConstruction<'_, P> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        self.scope.finish(self.id);
        {
            let mut state = self.cache.state.lock();
            let owned = matches!(
                state.slots.get(&self.id),
                Some(Slot::Constructing { owner, .. }) if *owner == self.scope.token()
            );
            if owned {
                state.slots.remove(&self.id);
            }
        }
        self.cache.metrics.record_construction_failure();
        self.cache.constructed.notify_all();
        debug!(id = %self.id, "rolled back proxy construction");
    }
}
