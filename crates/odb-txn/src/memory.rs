//! In-memory store and transactions.
//!
//! [`MemoryStore`] holds the committed object map. [`MemoryStore::begin`]
//! takes a private snapshot; [`MemoryTransaction::commit`] publishes every
//! object the transaction touched (last committer wins per object).
//! [`MemoryTransaction::detached`] builds a standalone, long-lived view with
//! no backing store, used as the target of copy-out operations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use odb_error::{OdbError, Result};
use odb_types::{FieldId, ObjId, TypeId, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::schema::Schema;
use crate::traits::{ChangeListener, CreateListener, FieldChange, Transaction};

/// Field values of one object; unset fields are absent.
type Record = BTreeMap<FieldId, Value>;
type ObjectMap = BTreeMap<ObjId, Record>;

/// Process-wide transaction id source shared by attached and detached views.
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

fn next_txn_id() -> u64 {
    NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Committed object map shared by the transactions it begins.
pub struct MemoryStore {
    schema: Arc<Schema>,
    committed: RwLock<ObjectMap>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(schema: Schema) -> Arc<Self> {
        Arc::new(Self {
            schema: Arc::new(schema),
            committed: RwLock::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Begin a read-write transaction over a snapshot of the committed state.
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> MemoryTransaction {
        self.begin_with(false)
    }

    /// Begin a transaction that rejects every write.
    #[must_use]
    pub fn begin_read_only(self: &Arc<Self>) -> MemoryTransaction {
        self.begin_with(true)
    }

    fn begin_with(self: &Arc<Self>, read_only: bool) -> MemoryTransaction {
        let snapshot = self.committed.read().clone();
        let txn = MemoryTransaction::new(
            Arc::clone(&self.schema),
            Some(Arc::clone(self)),
            read_only,
            snapshot,
        );
        debug!(txn_id = txn.txn_id, read_only, "transaction begin");
        txn
    }

    /// Number of committed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.read().is_empty()
    }

    /// Whether `id` exists in the committed state.
    #[must_use]
    pub fn contains(&self, id: ObjId) -> bool {
        self.committed.read().contains_key(&id)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("types", &self.schema.types().count())
            .field("committed_objects", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MemoryTransaction
// ---------------------------------------------------------------------------

struct TxnState {
    objects: ObjectMap,
    /// Objects created, written or deleted since begin.
    dirty: BTreeSet<ObjId>,
    open: bool,
}

/// A snapshot view over a [`MemoryStore`], or a detached standalone view.
pub struct MemoryTransaction {
    txn_id: u64,
    schema: Arc<Schema>,
    store: Option<Arc<MemoryStore>>,
    read_only: bool,
    state: RwLock<TxnState>,
    create_listeners: RwLock<Vec<CreateListener>>,
    change_listeners: RwLock<Vec<ChangeListener>>,
}

impl MemoryTransaction {
    fn new(
        schema: Arc<Schema>,
        store: Option<Arc<MemoryStore>>,
        read_only: bool,
        objects: ObjectMap,
    ) -> Self {
        Self {
            txn_id: next_txn_id(),
            schema,
            store,
            read_only,
            state: RwLock::new(TxnState {
                objects,
                dirty: BTreeSet::new(),
                open: true,
            }),
            create_listeners: RwLock::new(Vec::new()),
            change_listeners: RwLock::new(Vec::new()),
        }
    }

    /// A standalone view with no backing store. It never commits and stays
    /// usable until dropped.
    #[must_use]
    pub fn detached(schema: Arc<Schema>) -> Self {
        let txn = Self::new(schema, None, false, BTreeMap::new());
        debug!(txn_id = txn.txn_id, "detached transaction created");
        txn
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().open
    }

    pub fn add_create_listener(&self, listener: CreateListener) {
        self.create_listeners.write().push(listener);
    }

    pub fn add_change_listener(&self, listener: ChangeListener) {
        self.change_listeners.write().push(listener);
    }

    /// Publish every touched object to the backing store and close.
    pub fn commit(&self) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| OdbError::unsupported("commit of a detached transaction"))?;
        let mut state = self.state.write();
        if !state.open {
            return Err(OdbError::TransactionClosed {
                txn_id: self.txn_id,
            });
        }
        state.open = false;
        let dirty = std::mem::take(&mut state.dirty);
        let mut objects = std::mem::take(&mut state.objects);
        drop(state);

        let mut committed = store.committed.write();
        for id in &dirty {
            match objects.remove(id) {
                Some(record) => {
                    committed.insert(*id, record);
                }
                None => {
                    committed.remove(id);
                }
            }
        }
        drop(committed);
        debug!(txn_id = self.txn_id, touched = dirty.len(), "transaction commit");
        Ok(())
    }

    /// Discard all changes and close.
    pub fn rollback(&self) -> Result<()> {
        if self.store.is_none() {
            return Err(OdbError::unsupported("rollback of a detached transaction"));
        }
        let mut state = self.state.write();
        if !state.open {
            return Err(OdbError::TransactionClosed {
                txn_id: self.txn_id,
            });
        }
        state.open = false;
        state.objects.clear();
        state.dirty.clear();
        debug!(txn_id = self.txn_id, "transaction rollback");
        Ok(())
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, TxnState>> {
        let state = self.state.read();
        if !state.open {
            return Err(OdbError::TransactionClosed {
                txn_id: self.txn_id,
            });
        }
        Ok(state)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, TxnState>> {
        if self.read_only {
            return Err(OdbError::ReadOnly);
        }
        let state = self.state.write();
        if !state.open {
            return Err(OdbError::TransactionClosed {
                txn_id: self.txn_id,
            });
        }
        Ok(state)
    }

    fn fire_create(&self, id: ObjId) {
        let listeners = self.create_listeners.read().clone();
        for listener in &listeners {
            listener(id);
        }
    }

    fn fire_change(&self, change: &FieldChange) {
        let listeners = self.change_listeners.read().clone();
        for listener in &listeners {
            listener(change);
        }
    }
}

impl Transaction for MemoryTransaction {
    fn txn_id(&self) -> u64 {
        self.txn_id
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn is_detached(&self) -> bool {
        self.store.is_none()
    }

    fn exists(&self, id: ObjId) -> Result<bool> {
        Ok(self.read_state()?.objects.contains_key(&id))
    }

    fn create(&self, id: ObjId, notify: bool) -> Result<bool> {
        self.schema.object_type(id.type_id())?;
        let mut state = self.write_state()?;
        if state.objects.contains_key(&id) {
            return Ok(false);
        }
        state.objects.insert(id, Record::new());
        state.dirty.insert(id);
        drop(state);
        if notify {
            self.fire_create(id);
        }
        Ok(true)
    }

    fn create_new(&self, type_id: TypeId, notify: bool) -> Result<ObjId> {
        self.schema.object_type(type_id)?;
        let mut state = self.write_state()?;
        let last = state
            .objects
            .range(ObjId::min_for_type(type_id)..=ObjId::max_for_type(type_id))
            .next_back()
            .map_or(0, |(id, _)| id.instance());
        let instance = last.checked_add(1).ok_or_else(|| {
            OdbError::internal(format!("identifier space of type {type_id} exhausted"))
        })?;
        let id = ObjId::new(type_id, instance);
        state.objects.insert(id, Record::new());
        state.dirty.insert(id);
        drop(state);
        if notify {
            self.fire_create(id);
        }
        Ok(id)
    }

    fn delete(&self, id: ObjId) -> Result<bool> {
        let mut state = self.write_state()?;
        let existed = state.objects.remove(&id).is_some();
        if existed {
            state.dirty.insert(id);
        }
        Ok(existed)
    }

    fn read_field(&self, id: ObjId, field: FieldId) -> Result<Value> {
        let kind = self.schema.field(id.type_id(), field)?.kind;
        let state = self.read_state()?;
        let record = state
            .objects
            .get(&id)
            .ok_or(OdbError::DeletedObject { id: id.get() })?;
        Ok(record
            .get(&field)
            .cloned()
            .unwrap_or_else(|| kind.default_value()))
    }

    fn write_field(&self, id: ObjId, field: FieldId, value: Value, notify: bool) -> Result<()> {
        let kind = self.schema.field(id.type_id(), field)?.kind;
        kind.check(&value)?;
        let default = kind.default_value();
        let mut state = self.write_state()?;
        let record = state
            .objects
            .get_mut(&id)
            .ok_or(OdbError::DeletedObject { id: id.get() })?;
        let old = if value == default {
            record.remove(&field)
        } else {
            record.insert(field, value.clone())
        }
        .unwrap_or(default);
        state.dirty.insert(id);
        drop(state);
        if notify && old != value {
            self.fire_change(&FieldChange {
                id,
                field,
                old,
                new: value,
            });
        }
        Ok(())
    }

    fn object_ids(&self, type_id: Option<TypeId>) -> Result<Vec<ObjId>> {
        let state = self.read_state()?;
        Ok(match type_id {
            Some(t) => state
                .objects
                .range(ObjId::min_for_type(t)..=ObjId::max_for_type(t))
                .map(|(id, _)| *id)
                .collect(),
            None => state.objects.keys().copied().collect(),
        })
    }
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryTransaction")
            .field("txn_id", &self.txn_id)
            .field("detached", &self.store.is_none())
            .field("read_only", &self.read_only)
            .field("open", &state.open)
            .field("objects", &state.objects.len())
            .finish_non_exhaustive()
    }
}
