//! Per-transaction identity cache.
//!
//! [`ObjectCache`] guarantees that, for one transaction, every lookup of an
//! object id yields the same live proxy. Construction runs outside the cache
//! lock through a [`ProxyFactory`]; concurrent lookups of the same id wait for
//! the constructing thread, and lookups made from inside a construction go
//! through its [`Construction`] context so that cyclic object graphs resolve
//! to the instance still being built.

pub mod construction;
pub mod metrics;
pub mod object_cache;

pub use construction::{Construction, Proxy, ProxyFactory};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use object_cache::{CacheConfig, ObjectCache};
