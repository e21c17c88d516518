use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::key::{BucketId, Scope};

/// Reset bookkeeping of a bucket, guarded by a single lock.
#[derive(Debug, Default)]
struct Window {
    /// Absolute reset learned from `X-RateLimit-Reset`
    reset: Option<Instant>,
    /// Last value of `X-RateLimit-Reset-After`
    reset_after: Option<Duration>,
    /// `reset_after` anchored to the time its response was received
    reset_after_at: Option<Instant>,
    /// When `remaining` is due to be refilled to `maximum`.
    ///
    /// Cleared by the refill; only the first response of the following window
    /// schedules the next one.
    next_reset: Option<Instant>,
}

/// A server-defined rate limit group and everything learned about it.
///
/// Buckets are created by the [`Registry`](crate::ratelimit::Registry) on first
/// use, start out with unknown limits, and learn their limits from the first
/// response (the *probe*). All state is shared between the requests routed to
/// the bucket, so every field uses interior mutability.
pub struct Bucket {
    hash: RwLock<String>,
    scope: Scope,

    maximum: AtomicI64,
    /// May go negative while concurrent requests are blocked
    remaining: AtomicI64,
    window: Mutex<Window>,

    /// Number of requests resolved to this bucket but not dispatched yet
    in_use: AtomicUsize,

    limit_known: AtomicBool,
    /// Completion signal of the in-flight probe, if there is one
    probe: Mutex<Option<watch::Receiver<Option<bool>>>>,
}

impl Bucket {
    /// Create a bucket with unknown limits
    #[must_use]
    pub fn new(hash: impl Into<String>, scope: Scope) -> Self {
        Self {
            hash: RwLock::new(hash.into()),
            scope,
            maximum: AtomicI64::new(0),
            remaining: AtomicI64::new(0),
            window: Mutex::new(Window::default()),
            in_use: AtomicUsize::new(0),
            limit_known: AtomicBool::new(false),
            probe: Mutex::new(None),
        }
    }

    /// The hash currently believed to name this bucket
    #[must_use]
    pub fn hash(&self) -> String {
        self.hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_hash(&self, hash: &str) {
        *self.hash.write().unwrap_or_else(PoisonError::into_inner) = hash.to_string();
    }

    /// The major parameters this bucket is partitioned by
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The registry key of this bucket under its current hash
    #[must_use]
    pub fn id(&self) -> BucketId {
        BucketId::new(&self.hash(), &self.scope)
    }

    /// Requests allowed per window
    #[must_use]
    pub fn maximum(&self) -> i64 {
        self.maximum.load(Ordering::Acquire)
    }

    /// Requests left in the current window; only meaningful once the limit is known
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether the limits have been learned from a response
    #[must_use]
    pub fn is_limit_known(&self) -> bool {
        self.limit_known.load(Ordering::Acquire)
    }

    /// Whether a probe request is currently discovering the limits
    #[must_use]
    pub fn is_probe_in_flight(&self) -> bool {
        self.probe_slot().is_some()
    }

    /// Whether a request resolved to this bucket has not been dispatched yet
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire) > 0
    }

    /// Mark the bucket as used until the returned guard is dropped
    pub(crate) fn begin_use(self: &Arc<Self>) -> InUse {
        self.in_use.fetch_add(1, Ordering::AcqRel);
        InUse {
            bucket: Arc::clone(self),
        }
    }

    /// The reset the throttle and the reclaimer work with
    #[must_use]
    pub fn reset_deadline(&self, relative: bool) -> Option<Instant> {
        let window = self.window();
        if relative {
            window.reset_after_at
        } else {
            window.reset
        }
    }

    /// The last relative reset reported by the server
    #[must_use]
    pub fn reset_after(&self) -> Option<Duration> {
        self.window().reset_after
    }

    /// Refill `remaining` if the pending window reset has passed
    pub(crate) fn try_reset(&self, now: Instant) {
        let mut window = self.window();
        if let Some(next_reset) = window.next_reset
            && next_reset <= now
        {
            self.remaining.store(self.maximum(), Ordering::Release);
            window.next_reset = None;
        }
    }

    /// Take one request from the budget and return what is left.
    ///
    /// A negative result means the caller must wait for the next window.
    pub(crate) fn acquire(&self) -> i64 {
        self.remaining.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Overwrite the budget, used to recover from broken reset data
    pub(crate) fn force_remaining(&self, remaining: i64) {
        self.remaining.store(remaining, Ordering::Release);
    }

    pub(crate) fn set_maximum(&self, maximum: i64) {
        self.maximum.store(maximum, Ordering::Release);
    }

    /// Populate the authoritative limits, discarding everything known before.
    pub(crate) fn set_initial(
        &self,
        maximum: i64,
        remaining: i64,
        reset: Instant,
        reset_after: Option<Duration>,
    ) {
        let mut window = self.window();
        self.maximum.store(maximum, Ordering::Release);
        self.remaining.store(remaining, Ordering::Release);
        *window = Window::default();
        Self::store_reset(&mut window, reset, reset_after);
        window.next_reset = Some(reset);
    }

    /// Record the reset reported by a response that was not the probe.
    ///
    /// Resets only ever move forward, so a late response from an earlier
    /// window cannot overwrite the current one. The refill is scheduled only
    /// if none is pending and the reset still lies ahead.
    pub(crate) fn record_reset(&self, now: Instant, reset: Instant, reset_after: Option<Duration>) {
        let mut window = self.window();
        Self::store_reset(&mut window, reset, reset_after);
        if window.next_reset.is_none() && reset > now {
            window.next_reset = Some(reset);
        }
    }

    fn store_reset(window: &mut Window, reset: Instant, reset_after: Option<Duration>) {
        match reset_after {
            Some(after) => {
                if window.reset_after_at.is_none_or(|current| reset >= current) {
                    window.reset_after = Some(after);
                    window.reset_after_at = Some(reset);
                }
            }
            None => {
                if window.reset.is_none_or(|current| reset >= current) {
                    window.reset = Some(reset);
                }
            }
        }
    }

    /// Forget everything learned so the next request probes again
    pub(crate) fn reset_to_initial(&self) {
        let mut window = self.window();
        *window = Window::default();
        self.maximum.store(0, Ordering::Release);
        self.remaining.store(0, Ordering::Release);
        self.limit_known.store(false, Ordering::Release);
    }

    /// Whether the reclaimer may drop this bucket.
    ///
    /// Buckets in use or being probed are always kept. Buckets with a known
    /// reset are kept until `grace` after it, which never comes if the sum
    /// overflows the clock. Buckets that never learned a reset have nothing
    /// to protect.
    pub(crate) fn is_reclaimable(&self, now: Instant, relative: bool, grace: Duration) -> bool {
        if self.is_in_use() || self.is_probe_in_flight() {
            return false;
        }
        match self.reset_deadline(relative) {
            Some(deadline) => deadline.checked_add(grace).is_some_and(|end| now >= end),
            None => true,
        }
    }

    fn window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn probe_slot(&self) -> MutexGuard<'_, Option<watch::Receiver<Option<bool>>>> {
        self.probe.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn set_limit_known(&self, known: bool) {
        self.limit_known.store(known, Ordering::Release);
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("hash", &self.hash())
            .field("scope", &self.scope)
            .field("maximum", &self.maximum())
            .field("remaining", &self.remaining())
            .field("limit_known", &self.is_limit_known())
            .field("in_use", &self.is_in_use())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}]",
            self.id(),
            self.remaining(),
            self.maximum()
        )
    }
}

/// Marks a bucket as in use for as long as it lives
#[derive(Debug)]
pub struct InUse {
    bucket: Arc<Bucket>,
}

impl Drop for InUse {
    fn drop(&mut self) {
        self.bucket.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::bucket::probe::Claim;

    fn bucket() -> Arc<Bucket> {
        Arc::new(Bucket::new("hash", Scope::default()))
    }

    #[test]
    fn test_new_bucket_is_unknown() {
        let bucket = bucket();
        assert!(!bucket.is_limit_known());
        assert!(!bucket.is_probe_in_flight());
        assert!(!bucket.is_in_use());
        assert_eq!(bucket.maximum(), 0);
        assert_eq!(bucket.reset_deadline(true), None);
        assert_eq!(bucket.id().as_str(), "hash:::");
    }

    #[test]
    fn test_acquire_and_reset() {
        let bucket = bucket();
        let now = Instant::now();
        bucket.set_initial(2, 1, now + Duration::from_millis(10), None);

        assert_eq!(bucket.acquire(), 0);
        assert_eq!(bucket.acquire(), -1);

        bucket.try_reset(now);
        assert_eq!(bucket.remaining(), -1);

        bucket.try_reset(now + Duration::from_millis(10));
        assert_eq!(bucket.remaining(), 2);

        // the refill happens once per scheduled reset
        bucket.acquire();
        bucket.try_reset(now + Duration::from_secs(1));
        assert_eq!(bucket.remaining(), 1);
    }

    #[test]
    fn test_stale_reset_is_ignored() {
        let bucket = bucket();
        let now = Instant::now();
        let current = now + Duration::from_secs(5);
        bucket.set_initial(5, 5, current, Some(Duration::from_secs(5)));

        bucket.record_reset(now, now + Duration::from_secs(1), Some(Duration::from_secs(1)));
        assert_eq!(bucket.reset_deadline(true), Some(current));
        assert_eq!(bucket.reset_after(), Some(Duration::from_secs(5)));

        let later = now + Duration::from_secs(6);
        bucket.record_reset(now, later, Some(Duration::from_secs(6)));
        assert_eq!(bucket.reset_deadline(true), Some(later));
    }

    #[test]
    fn test_record_reset_schedules_refill_once() {
        let bucket = bucket();
        let now = Instant::now();
        bucket.set_initial(3, 0, now, None);
        bucket.try_reset(now);
        assert_eq!(bucket.remaining(), 3);

        // a response from the old window arrives late
        bucket.record_reset(now, now - Duration::from_millis(1), None);
        bucket.try_reset(now + Duration::from_millis(1));
        bucket.acquire();
        bucket.try_reset(now + Duration::from_millis(2));
        assert_eq!(bucket.remaining(), 2);

        // the first response of the new window schedules the next refill
        bucket.record_reset(now, now + Duration::from_secs(1), None);
        bucket.try_reset(now + Duration::from_secs(1));
        assert_eq!(bucket.remaining(), 3);
    }

    #[test]
    fn test_in_use_guard() {
        let bucket = bucket();
        let first = bucket.begin_use();
        let second = bucket.begin_use();
        assert!(bucket.is_in_use());
        drop(first);
        assert!(bucket.is_in_use());
        drop(second);
        assert!(!bucket.is_in_use());
    }

    #[test]
    fn test_reclaimable() {
        let bucket = bucket();
        let now = Instant::now();
        let grace = Duration::from_secs(10);
        assert!(bucket.is_reclaimable(now, true, grace));

        bucket.set_initial(5, 5, now, Some(Duration::ZERO));
        assert!(!bucket.is_reclaimable(now + Duration::from_secs(9), true, grace));
        assert!(bucket.is_reclaimable(now + Duration::from_secs(10), true, grace));

        let guard = bucket.begin_use();
        assert!(!bucket.is_reclaimable(now + Duration::from_secs(60), true, grace));
        drop(guard);
    }

    #[test]
    fn test_unbounded_grace_keeps_bucket() {
        let bucket = bucket();
        let now = Instant::now();
        bucket.set_initial(5, 5, now, Some(Duration::ZERO));

        assert!(!bucket.is_reclaimable(now + Duration::from_secs(3600), true, Duration::MAX));
        assert!(bucket.is_reclaimable(now, false, Duration::MAX));
    }

    #[test]
    fn test_reset_to_initial() {
        let bucket = bucket();
        bucket.set_initial(5, 3, Instant::now(), None);
        if let Claim::Probe(ticket) = bucket.claim_probe() {
            ticket.complete();
        }
        assert!(bucket.is_limit_known());

        bucket.reset_to_initial();
        assert!(!bucket.is_limit_known());
        assert_eq!(bucket.maximum(), 0);
        assert_eq!(bucket.reset_deadline(false), None);
        assert!(matches!(bucket.claim_probe(), Claim::Probe(_)));
    }
}
