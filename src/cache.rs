//! In-memory memoization of fused results.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Weekday;
use moka::future::Cache;

use crate::fusion::FusedResult;
use crate::spatial::Coordinate;

/// Decimal places kept in cache keys (about 111 m of latitude).
pub const KEY_PRECISION: u32 = 3;

pub type ComputeFuture<'a> = Pin<Box<dyn Future<Output = FusedResult> + Send + 'a>>;

/// Coarsened coordinate plus the request parameters the result depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lat: i64,
    lon: i64,
    day: u8,
    fast_mode: bool,
}

impl CacheKey {
    pub fn new(coordinate: &Coordinate, day: Weekday, fast_mode: bool) -> Self {
        let (lat, lon) = coordinate.coarsen(KEY_PRECISION);
        Self {
            lat,
            lon,
            day: day.num_days_from_monday() as u8,
            fast_mode,
        }
    }
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Returns a fresh cached result or runs `compute` and stores its output.
    async fn get_or_compute<'a>(&'a self, key: CacheKey, compute: ComputeFuture<'a>) -> FusedResult;

    fn invalidate_all(&self) {}
}

/// TTL-bounded cache. Concurrent misses on one key share a single `compute`.
pub struct TtlCache {
    inner: Cache<CacheKey, FusedResult>,
}

impl TtlCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl ResultCache for TtlCache {
    async fn get_or_compute<'a>(&'a self, key: CacheKey, compute: ComputeFuture<'a>) -> FusedResult {
        self.inner.get_with(key, compute).await
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

/// Always recomputes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl ResultCache for NoCache {
    async fn get_or_compute<'a>(&'a self, _key: CacheKey, compute: ComputeFuture<'a>) -> FusedResult {
        compute.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Fusion;
    use crate::signal::{Provenance, SignalScore};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn result(v: f64) -> FusedResult {
        Fusion::default().fuse(
            SignalScore::valid(Provenance::Historical, v, 0),
            SignalScore::valid(Provenance::Environmental, v, 0),
            SignalScore::valid(Provenance::Contextual, v, 0),
        )
    }

    fn counting(calls: &Arc<AtomicUsize>, v: f64) -> ComputeFuture<'static> {
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            result(v)
        })
    }

    fn key(lat: f64, lon: f64) -> CacheKey {
        CacheKey::new(&Coordinate::new(lat, lon).unwrap(), Weekday::Mon, false)
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache = TtlCache::new(100, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_compute(key(12.9716, 77.5946), counting(&calls, 0.2)).await;
        let second = cache.get_or_compute(key(12.9716, 77.5946), counting(&calls, 0.9)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn nearby_points_share_an_entry() {
        let cache = TtlCache::new(100, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_compute(key(12.97161, 77.59459), counting(&calls, 0.2)).await;
        cache.get_or_compute(key(12.97152, 77.59451), counting(&calls, 0.2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.get_or_compute(key(12.9800, 77.5946), counting(&calls, 0.2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn day_and_mode_are_part_of_the_key() {
        let c = Coordinate::new(12.9716, 77.5946).unwrap();
        assert_ne!(CacheKey::new(&c, Weekday::Mon, false), CacheKey::new(&c, Weekday::Tue, false));
        assert_ne!(CacheKey::new(&c, Weekday::Mon, false), CacheKey::new(&c, Weekday::Mon, true));
    }

    #[tokio::test]
    async fn stale_entries_are_recomputed() {
        let cache = TtlCache::new(100, Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_compute(key(1.0, 1.0), counting(&calls, 0.2)).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.get_or_compute(key(1.0, 1.0), counting(&calls, 0.2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_are_coalesced() {
        let cache = Arc::new(TtlCache::new(100, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let slow = Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    result(0.4)
                });
                cache.get_or_compute(key(5.0, 5.0), slow).await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_cache_always_computes() {
        let calls = Arc::new(AtomicUsize::new(0));
        NoCache.get_or_compute(key(1.0, 1.0), counting(&calls, 0.2)).await;
        NoCache.get_or_compute(key(1.0, 1.0), counting(&calls, 0.2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
