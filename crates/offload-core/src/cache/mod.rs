//! Expiring cache and memoization on top of it.

mod memoize;
mod store;

pub use memoize::{Memoized, cached_query, memoize, memoize_with_key};
pub use store::ExpiringCache;

/// The shared application cache: string keys, JSON values.
pub type AppCache = ExpiringCache<String, serde_json::Value>;
