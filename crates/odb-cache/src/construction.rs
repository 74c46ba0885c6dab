//! Proxy construction seams.
//!
//! A [`ProxyFactory`] builds the in-memory proxy for one object. It receives a
//! [`Construction`] context instead of consulting ambient thread state: lookups
//! made through the context are recognized as reentrant, and a factory that
//! needs other code to reach the half-built proxy publishes it early with
//! [`Construction::register_self`].
//!
//! Every nested construction started from one top-level lookup shares one
//! [`ConstructionScope`], so a cycle A -> B -> A resolves to the A that is
//! still being built.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use odb_error::{OdbError, Result};
use odb_txn::Transaction;
use odb_types::{Cx, ObjId};

use crate::object_cache::ObjectCache;

/// An in-memory object standing for one stored record.
pub trait Proxy: Send + Sync + 'static {
    /// Identifier of the record this proxy represents.
    fn id(&self) -> ObjId;
}

/// Builds proxies on cache misses.
pub trait ProxyFactory<P: Proxy>: Send + Sync {
    /// Construct the proxy for `ctx.id()`.
    ///
    /// Called without any cache lock held. The returned proxy must report
    /// `ctx.id()` and, if one was registered, be the registered instance.
    fn construct(&self, ctx: &Construction<'_, P>) -> Result<Arc<P>>;
}

impl<P, F> ProxyFactory<P> for F
where
    P: Proxy,
    F: Fn(&Construction<'_, P>) -> Result<Arc<P>> + Send + Sync,
{
    fn construct(&self, ctx: &Construction<'_, P>) -> Result<Arc<P>> {
        self(ctx)
    }
}

/// Identifies the construction scope that owns a constructing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeToken(u64);

static NEXT_SCOPE_TOKEN: AtomicU64 = AtomicU64::new(1);

impl ScopeToken {
    fn next() -> Self {
        Self(NEXT_SCOPE_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// Objects under construction by one top-level lookup, with the instance each
/// has registered so far.
///
/// Confined to the calling thread: it is neither `Send` nor `Sync`.
pub(crate) struct ConstructionScope<P> {
    token: ScopeToken,
    in_progress: RefCell<HashMap<ObjId, Option<Arc<P>>>>,
}

impl<P: Proxy> ConstructionScope<P> {
    pub(crate) fn new() -> Self {
        Self {
            token: ScopeToken::next(),
            in_progress: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn token(&self) -> ScopeToken {
        self.token
    }

    /// `None` if `id` is not being built in this scope, otherwise the
    /// registered instance if any.
    pub(crate) fn in_progress(&self, id: ObjId) -> Option<Option<Arc<P>>> {
        self.in_progress.borrow().get(&id).cloned()
    }

    pub(crate) fn begin(&self, id: ObjId) {
        self.in_progress.borrow_mut().insert(id, None);
    }

    /// Forget `id`, returning whatever it registered.
    pub(crate) fn finish(&self, id: ObjId) -> Option<Arc<P>> {
        self.in_progress.borrow_mut().remove(&id).flatten()
    }

    fn register(&self, id: ObjId, proxy: &Arc<P>) -> Result<()> {
        let mut in_progress = self.in_progress.borrow_mut();
        let Some(entry) = in_progress.get_mut(&id) else {
            return Err(OdbError::internal(format!(
                "register_self for {id} outside its construction"
            )));
        };
        match entry {
            Some(existing) if Arc::ptr_eq(existing, proxy) => Ok(()),
            Some(_) => Err(OdbError::DuplicateRegistration { id: id.get() }),
            None => {
                *entry = Some(Arc::clone(proxy));
                Ok(())
            }
        }
    }
}

/// Context handed to a [`ProxyFactory`] for one construction.
pub struct Construction<'a, P: Proxy> {
    pub(crate) cache: &'a ObjectCache<P>,
    pub(crate) scope: &'a ConstructionScope<P>,
    pub(crate) cx: &'a Cx,
    pub(crate) id: ObjId,
}

impl<P: Proxy> Construction<'_, P> {
    /// Identifier being constructed.
    pub fn id(&self) -> ObjId {
        self.id
    }

    /// Transaction the proxy is bound to.
    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        self.cache.transaction()
    }

    /// Caller's context, for factories that block.
    pub fn cx(&self) -> &Cx {
        self.cx
    }

    /// Publish the proxy being built so reentrant lookups of this id resolve
    /// to it before the factory returns.
    ///
    /// Registering the same instance twice is a no-op; registering a
    /// different one fails with [`OdbError::DuplicateRegistration`].
    pub fn register_self(&self, proxy: &Arc<P>) -> Result<()> {
        let actual = proxy.id();
        if actual != self.id {
            return Err(OdbError::ProxyIdMismatch {
                expected: self.id.get(),
                actual: actual.get(),
            });
        }
        self.scope.register(self.id, proxy)
    }

    /// Look up or construct another proxy (or this one) as part of this
    /// construction.
    ///
    /// Asking for an object still being built in this scope returns its
    /// registered instance, or [`OdbError::ReentrantConstruction`] if it has
    /// not registered one yet.
    pub fn lookup_or_create(&self, id: ObjId) -> Result<Arc<P>> {
        self.cache.lookup_in_scope(self.cx, self.scope, id)
    }

    /// Cached proxy for `id` without constructing, including instances
    /// registered earlier in this scope.
    pub fn lookup_if_present(&self, id: ObjId) -> Option<Arc<P>> {
        if let Some(registered) = self.scope.in_progress(id) {
            return registered;
        }
        self.cache.lookup_if_present(id)
    }
}

impl<P: Proxy> std::fmt::Debug for Construction<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Construction")
            .field("id", &self.id)
            .field("scope", &self.scope.token)
            .finish_non_exhaustive()
    }
}
