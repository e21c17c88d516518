use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

use crate::ratelimit::{RateLimitConfig, Registry};

const MIN_RECLAIM_INTERVAL: Duration = Duration::from_millis(1);

/// Background sweeper that drops idle buckets from a [`Registry`].
///
/// The sweeper only runs while the registry holds buckets. It is started by
/// the first resolution that finds it stopped, and stops itself once a sweep
/// leaves the registry empty.
#[derive(Debug, Default)]
pub(crate) struct Reclaimer {
    running: Arc<AtomicBool>,
}

impl Reclaimer {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the sweeper unless it is already running.
    ///
    /// Outside of a Tokio runtime nothing is started.
    pub(crate) fn ensure_running(&self, registry: &Arc<Registry>, config: RateLimitConfig) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime available, idle buckets will not be reclaimed");
            self.running.store(false, Ordering::Release);
            return;
        };

        debug!("Starting bucket reclaimer");
        handle.spawn(sweep(
            Arc::downgrade(registry),
            Arc::clone(&self.running),
            config,
        ));
    }
}

async fn sweep(registry: Weak<Registry>, running: Arc<AtomicBool>, config: RateLimitConfig) {
    // A zero period would make `interval_at` panic
    let period = config.reclaim_interval.max(MIN_RECLAIM_INTERVAL);
    let Some(start) = tokio::time::Instant::now().checked_add(period) else {
        warn!("Reclaim interval {period:?} is out of range, idle buckets will not be reclaimed");
        return;
    };
    let mut interval = tokio::time::interval_at(start, period);

    loop {
        interval.tick().await;
        let Some(registry) = registry.upgrade() else {
            running.store(false, Ordering::Release);
            break;
        };

        let removed = registry.reclaim(
            Instant::now(),
            config.use_relative_ratelimit,
            config.reclaim_grace,
        );
        if removed > 0 {
            debug!("Reclaimed {removed} idle buckets, {} left", registry.len());
        }

        if registry.is_empty() {
            running.store(false, Ordering::Release);
            // A bucket created after the check found the flag still set and
            // relies on this sweep to keep going.
            if registry.is_empty()
                || running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
        }
    }
    debug!("Bucket reclaimer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{HashKey, Scope};
    use http::Method;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            reclaim_interval: Duration::from_millis(20),
            reclaim_grace: Duration::ZERO,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_no_runtime_does_not_start() {
        let reclaimer = Reclaimer::default();
        reclaimer.ensure_running(&Arc::new(Registry::new()), config());
        assert!(!reclaimer.is_running());
    }

    #[tokio::test]
    async fn test_stops_when_registry_is_empty() {
        let registry = Arc::new(Registry::new());
        let reclaimer = Reclaimer::default();
        let key = HashKey::new(&Method::GET, "/gateway");
        let (bucket, in_use) = registry.resolve(&key, &Scope::default());

        reclaimer.ensure_running(&registry, config());
        assert!(reclaimer.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.len(), 1, "bucket in use must survive");
        assert!(reclaimer.is_running());

        drop(in_use);
        drop(bucket);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());
        assert!(!reclaimer.is_running());
    }

    #[tokio::test]
    async fn test_unschedulable_interval_does_not_sweep() {
        let registry = Arc::new(Registry::new());
        let key = HashKey::new(&Method::GET, "/gateway");
        let (_bucket, in_use) = registry.resolve(&key, &Scope::default());
        drop(in_use);

        let config = RateLimitConfig {
            reclaim_interval: Duration::MAX,
            ..config()
        };
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(sweep(Arc::downgrade(&registry), Arc::clone(&running), config))
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_still_sweeps() {
        let registry = Arc::new(Registry::new());
        let reclaimer = Reclaimer::default();
        let key = HashKey::new(&Method::GET, "/gateway");
        let (_bucket, in_use) = registry.resolve(&key, &Scope::default());
        drop(in_use);

        let config = RateLimitConfig {
            reclaim_interval: Duration::ZERO,
            ..config()
        };
        reclaimer.ensure_running(&registry, config);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());
        assert!(!reclaimer.is_running());
    }
}
