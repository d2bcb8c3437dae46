//! Expired-entry sweeper.
//!
//! Lookups already treat expired entries as absent. The sweep reclaims their
//! memory and entry slots without waiting for a lookup or an eviction.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::config::MIN_CLEANUP_INTERVAL;

/// Spawns a background task that purges expired entries every `interval`.
///
/// Intervals below one second are raised to one second. The returned handle
/// is aborted on shutdown.
///
/// # Example
/// ```ignore
/// let cache = BoundedCache::<String>::new(CacheConfig::default()).into_shared();
/// let handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task<V>(cache: SharedCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let interval = if interval < MIN_CLEANUP_INTERVAL {
        warn!(
            "Cleanup interval {:?} below minimum, using {:?}",
            interval, MIN_CLEANUP_INTERVAL
        );
        MIN_CLEANUP_INTERVAL
    } else {
        interval
    };

    tokio::spawn(async move {
        info!("Starting TTL cleanup task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let (removed, remaining) = {
                let mut guard = cache.write().await;
                let removed = guard.cleanup_expired();
                (removed, guard.len())
            };

            if removed > 0 {
                info!(
                    "TTL cleanup: removed {} expired entries, {} remaining",
                    removed, remaining
                );
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
