//! loadgrid-cache — short-lived memoization of metrics snapshots.
//!
//! `MetricsCache<T>` keeps a value per key until its TTL lapses. Eviction
//! is lazy: an expired entry is dropped by the `get` that discovers it, or
//! by `clear`. There is no background sweeper.
//!
//! Storage is a `DashMap`, so concurrent `get`/`set` on the same key are
//! serialized by the owning shard lock and never lose writes.

pub mod cache;

pub use cache::{CacheEntry, MetricsCache};
