//! Memoization through the shared application cache.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::AppCache;
use crate::instrument::Instrument;

enum KeyFn<A> {
    Debug(fn(&str, &A) -> String),
    Custom(Box<dyn Fn(&A) -> String + Send + Sync>),
}

fn debug_key<A: fmt::Debug>(name: &str, args: &A) -> String {
    format!("{name}:{args:?}")
}

/// A function whose `Ok` results are cached per argument value.
///
/// Freshness is at-least-TTL: a write elsewhere does not invalidate entries.
/// Callers that need read-your-writes call `invalidate` (or `delete`/`clear`
/// on the cache) after the write.
///
/// - Errors are returned unchanged and never cached.
/// - Results that serialize to `null` are not cached, so a function that
///   found nothing is asked again next time.
pub struct Memoized<A, F> {
    name: String,
    cache: Arc<AppCache>,
    ttl: Duration,
    key_fn: KeyFn<A>,
    func: F,
}

/// Memoize `func` under `name` in `cache` for `ttl`.
///
/// The key is `"{name}:{args:?}"`; see [`Memoized::with_key`].
pub fn memoize<A: fmt::Debug, F>(
    cache: Arc<AppCache>,
    name: impl Into<String>,
    ttl: Duration,
    func: F,
) -> Memoized<A, F> {
    Memoized {
        name: name.into(),
        cache,
        ttl,
        key_fn: KeyFn::Debug(debug_key::<A>),
        func,
    }
}

/// Like [`memoize`], for argument types without a `Debug` form.
pub fn memoize_with_key<A, F, K>(
    cache: Arc<AppCache>,
    name: impl Into<String>,
    ttl: Duration,
    key_fn: K,
    func: F,
) -> Memoized<A, F>
where
    K: Fn(&A) -> String + Send + Sync + 'static,
{
    Memoized {
        name: name.into(),
        cache,
        ttl,
        key_fn: KeyFn::Custom(Box::new(key_fn)),
        func,
    }
}

impl<A, F> Memoized<A, F> {
    /// Derive cache keys with `key_fn` instead of the debug form of the
    /// arguments.
    pub fn with_key<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.key_fn = KeyFn::Custom(Box::new(key_fn));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self, args: &A) -> String {
        match &self.key_fn {
            KeyFn::Debug(debug) => debug(&self.name, args),
            KeyFn::Custom(key_fn) => key_fn(args),
        }
    }

    /// Drop the cached result for `args`.
    pub fn invalidate(&self, args: &A) -> bool {
        self.cache.delete(&self.key(args))
    }

    pub fn call<R, E>(&self, args: &A) -> Result<R, E>
    where
        F: Fn(&A) -> Result<R, E>,
        R: Serialize + DeserializeOwned,
    {
        let key = self.key(args);
        if let Some(hit) = lookup(&self.cache, &key) {
            return Ok(hit);
        }
        let value = (self.func)(args)?;
        store(&self.cache, key, &value, self.ttl);
        Ok(value)
    }

    pub async fn call_async<R, E, Fut>(&self, args: &A) -> Result<R, E>
    where
        F: Fn(&A) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: Serialize + DeserializeOwned,
    {
        let key = self.key(args);
        if let Some(hit) = lookup(&self.cache, &key) {
            return Ok(hit);
        }
        let value = (self.func)(args).await?;
        store(&self.cache, key, &value, self.ttl);
        Ok(value)
    }
}

/// Cache-or-compute for one-off keys, timing the computation.
///
/// On a miss `f` runs under `timer`; an `Ok` result is stored for `ttl`.
pub fn cached_query<R, E, F>(
    cache: &AppCache,
    key: &str,
    ttl: Duration,
    timer: &Instrument,
    f: F,
) -> Result<R, E>
where
    R: Serialize + DeserializeOwned,
    E: fmt::Display,
    F: FnOnce() -> Result<R, E>,
{
    if let Some(hit) = lookup(cache, key) {
        return Ok(hit);
    }
    let value = timer.run(f)?;
    store(cache, key.to_string(), &value, ttl);
    Ok(value)
}

fn lookup<R: DeserializeOwned>(cache: &AppCache, key: &str) -> Option<R> {
    let value = cache.get(key)?;
    match serde_json::from_value(value) {
        Ok(hit) => {
            debug!(key, "cache hit");
            Some(hit)
        }
        Err(e) => {
            warn!(key, error = %e, "cached value has unexpected shape; recomputing");
            None
        }
    }
}

fn store<R: Serialize>(cache: &AppCache, key: String, value: &R, ttl: Duration) {
    match serde_json::to_value(value) {
        Ok(Value::Null) => {}
        Ok(json) => cache.set_with_ttl(key, json, ttl),
        Err(e) => warn!(key, error = %e, "result is not cacheable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::instrument;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn cache() -> Arc<AppCache> {
        Arc::new(AppCache::default())
    }

    #[test]
    fn second_call_within_ttl_hits_cache() {
        let calls = AtomicUsize::new(0);
        let square = memoize(cache(), "square", Duration::from_secs(60), |n: &u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(n * n)
        });

        assert_eq!(square.call(&9u64).unwrap(), 81);
        assert_eq!(square.call(&9u64).unwrap(), 81);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(square.call(&3u64).unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn call_after_expiry_recomputes() {
        let calls = AtomicUsize::new(0);
        let f = memoize(cache(), "f", Duration::from_millis(30), |_: &()| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("v".to_string())
        });

        f.call(&()).unwrap();
        thread::sleep(Duration::from_millis(50));
        f.call(&()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn errors_are_not_cached() {
        let calls = AtomicUsize::new(0);
        let flaky = memoize(cache(), "flaky", Duration::from_secs(60), |_: &()| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 { Err("db down") } else { Ok(n) }
        });

        assert_eq!(flaky.call(&()), Err("db down"));
        assert_eq!(flaky.call(&()), Ok(1));
        assert_eq!(flaky.call(&()), Ok(1));
    }

    #[test]
    fn none_results_are_not_cached() {
        let calls = AtomicUsize::new(0);
        let find = memoize(cache(), "find", Duration::from_secs(60), |_: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<u32>, String>(None)
        });

        let key = "missing".to_string();
        assert_eq!(find.call(&key).unwrap(), None);
        assert_eq!(find.call(&key).unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn custom_key_and_invalidate() {
        let shared = cache();
        let monthly = memoize(
            Arc::clone(&shared),
            "monthly_data",
            Duration::from_secs(60),
            |year: &i32| Ok::<_, String>(vec![*year; 3]),
        )
        .with_key(|year: &i32| format!("monthly_data:{year}"));

        monthly.call(&2024).unwrap();
        assert!(shared.get("monthly_data:2024").is_some());

        assert!(monthly.invalidate(&2024));
        assert!(shared.get("monthly_data:2024").is_none());
    }

    #[test]
    fn explicit_key_needs_no_debug_arguments() {
        struct Period {
            year: i32,
            month: u32,
        }

        let shared = cache();
        let calls = AtomicUsize::new(0);
        let revenue = memoize_with_key(
            Arc::clone(&shared),
            "monthly_revenue",
            Duration::from_secs(60),
            |p: &Period| format!("monthly_revenue:{}-{:02}", p.year, p.month),
            |p: &Period| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(p.month * 100)
            },
        );

        let march = Period { year: 2024, month: 3 };
        assert_eq!(revenue.call(&march).unwrap(), 300);
        assert_eq!(revenue.call(&march).unwrap(), 300);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(shared.get("monthly_revenue:2024-03").is_some());

        assert!(revenue.invalidate(&march));
        assert!(shared.get("monthly_revenue:2024-03").is_none());
    }

    #[test]
    fn default_key_includes_name_and_args() {
        let f = memoize(cache(), "totals", Duration::from_secs(1), |_: &(i32, &str)| {
            Ok::<_, String>(0)
        });
        assert_eq!(f.key(&(2024, "sales")), "totals:(2024, \"sales\")");
    }

    #[test]
    fn shape_mismatch_is_a_miss() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Totals {
            sales: f64,
        }

        let shared = cache();
        shared.set("totals:()".to_string(), Value::String("stale format".into()));
        let f = memoize(Arc::clone(&shared), "totals", Duration::from_secs(60), |_: &()| {
            Ok::<_, String>(Totals { sales: 10.0 })
        });
        assert_eq!(f.call(&()).unwrap(), Totals { sales: 10.0 });
    }

    #[tokio::test]
    async fn async_variant_memoizes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let f = memoize(cache(), "stats", Duration::from_secs(60), move |month: &u32| {
            let month = *month;
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(month * 10)
            }
        });

        assert_eq!(f.call_async(&4u32).await.unwrap(), 40);
        assert_eq!(f.call_async(&4u32).await.unwrap(), 40);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_query_runs_once_per_key() {
        let shared = AppCache::default();
        let timer = instrument("count_invoices");
        let calls = AtomicUsize::new(0);
        let run = || {
            cached_query(&shared, "total_count:invoices", Duration::from_secs(60), &timer, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42u64)
            })
        };

        assert_eq!(run().unwrap(), 42);
        assert_eq!(run().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
