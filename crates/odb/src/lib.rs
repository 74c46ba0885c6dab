//! Object-database binding core.
//!
//! An [`ObjectTransaction`] pairs a [`Transaction`] with its identity cache,
//! so every object id resolves to one live proxy for as long as any caller
//! holds it. Graphs move between transactions with
//! [`ObjectTransaction::copy_to`], or out into a standalone detached view with
//! [`ObjectTransaction::copy_out`].
//!
//! The building blocks are re-exported from their crates:
//! identifiers, values and [`Cx`] from `odb-types`, the [`OdbError`]
//! taxonomy, schema and transactions from `odb-txn`, the identity cache from
//! `odb-cache` and the copy engine from `odb-copy`.

use std::sync::Arc;

use tracing::debug;

pub use odb_cache::{
    CacheConfig, CacheMetricsSnapshot, Construction, ObjectCache, Proxy, ProxyFactory,
};
pub use odb_copy::{CascadePlan, CopyState, CopyStats, GraphCopier, ObjIdMap, copy_graph};
pub use odb_error::{ErrorCode, OdbError, Result};
pub use odb_txn::{
    ElementKind, FieldChange, FieldDef, FieldKind, MemoryStore, MemoryTransaction, ObjType,
    ReferenceOptions, Schema, Transaction,
};
pub use odb_types::cx::Budget;
pub use odb_types::{Cx, FieldId, FieldPath, ObjId, TypeId, Value};

/// A transaction together with the identity cache of its proxies.
pub struct ObjectTransaction<P: Proxy> {
    cache: ObjectCache<P>,
}

impl<P: Proxy> ObjectTransaction<P> {
    pub fn new(txn: Arc<dyn Transaction>, factory: impl ProxyFactory<P> + 'static) -> Self {
        Self {
            cache: ObjectCache::new(txn, factory),
        }
    }

    pub fn with_config(
        txn: Arc<dyn Transaction>,
        factory: Arc<dyn ProxyFactory<P>>,
        config: CacheConfig,
    ) -> Self {
        Self {
            cache: ObjectCache::with_shared_factory(txn, factory, config),
        }
    }

    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        self.cache.transaction()
    }

    pub fn cache(&self) -> &ObjectCache<P> {
        &self.cache
    }

    /// The proxy for an existing object.
    ///
    /// Fails with [`OdbError::DeletedObject`] if `id` does not exist in this
    /// transaction.
    pub fn get(&self, cx: &Cx, id: ObjId) -> Result<Arc<P>> {
        if let Some(proxy) = self.cache.lookup_if_present(id) {
            return Ok(proxy);
        }
        if !self.transaction().exists(id)? {
            return Err(OdbError::DeletedObject { id: id.get() });
        }
        self.cache.lookup_or_create(cx, id)
    }

    /// The proxy for `id` if one is live, without touching the store.
    pub fn get_if_cached(&self, id: ObjId) -> Option<Arc<P>> {
        self.cache.lookup_if_present(id)
    }

    /// Create a new object of `type_id` and return its proxy.
    pub fn create(&self, cx: &Cx, type_id: TypeId) -> Result<Arc<P>> {
        let id = self.transaction().create_new(type_id, true)?;
        debug!(%id, txn_id = self.transaction().txn_id(), "created object");
        self.cache.lookup_or_create(cx, id)
    }

    /// Copy `root` and what `plan` reaches from it into `dest`, then return
    /// the destination root's proxy.
    ///
    /// Deleted-target assignments recorded by this copy are drained before
    /// returning, so an unresolved reference fails the call with
    /// [`OdbError::DanglingReference`]. Objects written before a failure stay
    /// written.
    pub fn copy_to(
        &self,
        cx: &Cx,
        dest: &Self,
        root: ObjId,
        plan: &CascadePlan,
        state: &mut CopyState,
    ) -> Result<Arc<P>> {
        let dest_txn = dest.transaction().as_ref();
        let dest_root = GraphCopier::new(self.transaction().as_ref(), dest_txn, plan)?
            .copy(cx, root, state)?;
        state.drain_deleted_assignments(dest_txn)?;
        dest.cache.lookup_or_create(cx, dest_root)
    }

    /// Like [`Self::copy_to`] for several roots sharing one state. Assignments
    /// are drained once, after every root has been copied.
    pub fn copy_all_to(
        &self,
        cx: &Cx,
        dest: &Self,
        roots: impl IntoIterator<Item = ObjId>,
        plan: &CascadePlan,
        state: &mut CopyState,
    ) -> Result<Vec<Arc<P>>> {
        let dest_txn = dest.transaction().as_ref();
        let dest_roots = GraphCopier::new(self.transaction().as_ref(), dest_txn, plan)?
            .copy_all(cx, roots, state)?;
        state.drain_deleted_assignments(dest_txn)?;
        dest_roots
            .into_iter()
            .map(|id| dest.cache.lookup_or_create(cx, id))
            .collect()
    }

    /// Copy `root` into a new detached transaction over the same schema,
    /// sharing this transaction's proxy factory and cache configuration.
    ///
    /// Returns the detached view and the proxy of the copied root in it.
    pub fn copy_out(
        &self,
        cx: &Cx,
        root: ObjId,
        plan: &CascadePlan,
        state: &mut CopyState,
    ) -> Result<(Self, Arc<P>)> {
        let schema = Arc::clone(self.transaction().schema());
        let detached: Arc<dyn Transaction> = Arc::new(MemoryTransaction::detached(schema));
        let out = Self::with_config(
            detached,
            Arc::clone(self.cache.factory()),
            self.cache.config(),
        );
        let proxy = self.copy_to(cx, &out, root, plan, state)?;
        Ok((out, proxy))
    }
}

impl<P: Proxy> std::fmt::Debug for ObjectTransaction<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTransaction")
            .field("cache", &self.cache)
            .finish()
    }
}
