//! Discovery of unknown bucket limits.
//!
//! A bucket that has never seen a response knows nothing to throttle
//! against. The first request becomes the *probe* and is sent on its own;
//! every sibling waits for the probe's outcome. A completed probe publishes
//! the limits, a failed one lets the next request try again.

use std::sync::Arc;

use tokio::sync::watch;

use super::Bucket;

/// Result of trying to become the probe of a bucket
pub(crate) enum Claim {
    /// Limits are known, throttle normally
    Known,
    /// This caller is the probe
    Probe(ProbeTicket),
    /// Another caller is probing, wait for its outcome
    Wait(watch::Receiver<Option<bool>>),
}

impl Bucket {
    /// Become the probe, learn that limits are known, or get the probe's signal.
    ///
    /// The claim happens under the probe lock, so exactly one caller wins and
    /// its completion signal is published in the same step.
    pub(crate) fn claim_probe(self: &Arc<Self>) -> Claim {
        if self.is_limit_known() {
            return Claim::Known;
        }

        let mut slot = self.probe_slot();
        if self.is_limit_known() {
            return Claim::Known;
        }
        if let Some(signal) = slot.as_ref() {
            return Claim::Wait(signal.clone());
        }

        let (sender, receiver) = watch::channel(None);
        *slot = Some(receiver);
        Claim::Probe(ProbeTicket {
            bucket: Arc::clone(self),
            sender: Some(sender),
        })
    }

    /// Wait until limits are known, or until this caller becomes the probe.
    ///
    /// Returns the ticket if the caller is the probe. A failed probe wakes all
    /// waiters, and one of them becomes the next probe.
    pub(crate) async fn await_limits(self: &Arc<Self>) -> Option<ProbeTicket> {
        loop {
            let mut signal = match self.claim_probe() {
                Claim::Known => return None,
                Claim::Probe(ticket) => return Some(ticket),
                Claim::Wait(signal) => signal,
            };
            // Err means the probe vanished without an outcome; claim again
            let _ = signal.wait_for(Option::is_some).await;
        }
    }
}

/// Proof that the holder is the one request allowed to discover a bucket's
/// limits.
///
/// Resolving the ticket publishes the outcome to every waiting sibling.
/// Dropping an unresolved ticket counts as a failed probe, so a cancelled
/// request never wedges its bucket.
#[derive(Debug)]
pub(crate) struct ProbeTicket {
    bucket: Arc<Bucket>,
    sender: Option<watch::Sender<Option<bool>>>,
}

impl ProbeTicket {
    /// The limits have been stored on the bucket; release the siblings
    pub(crate) fn complete(mut self) {
        self.resolve(true);
    }

    /// No limits were obtained; let the next request probe again
    pub(crate) fn fail(mut self) {
        self.resolve(false);
    }

    fn resolve(&mut self, known: bool) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        {
            let mut slot = self.bucket.probe_slot();
            self.bucket.set_limit_known(known);
            *slot = None;
        }
        sender.send_replace(Some(known));
    }
}

impl Drop for ProbeTicket {
    fn drop(&mut self) {
        self.resolve(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn bucket() -> Arc<Bucket> {
        Arc::new(Bucket::new("hash", Scope::default()))
    }

    #[test]
    fn test_single_probe_claim() {
        let bucket = bucket();

        let Claim::Probe(ticket) = bucket.claim_probe() else {
            panic!("first claim must be the probe");
        };
        assert!(bucket.is_probe_in_flight());
        assert!(matches!(bucket.claim_probe(), Claim::Wait(_)));
        assert!(matches!(bucket.claim_probe(), Claim::Wait(_)));

        ticket.complete();
        assert!(bucket.is_limit_known());
        assert!(!bucket.is_probe_in_flight());
        assert!(matches!(bucket.claim_probe(), Claim::Known));
    }

    #[test]
    fn test_dropped_ticket_fails_probe() {
        let bucket = bucket();
        let claim = bucket.claim_probe();
        assert!(matches!(claim, Claim::Probe(_)));
        assert!(bucket.is_probe_in_flight());

        drop(claim);
        assert!(!bucket.is_probe_in_flight());
        assert!(!bucket.is_limit_known());
        assert!(matches!(bucket.claim_probe(), Claim::Probe(_)));
    }

    #[tokio::test]
    async fn test_waiters_observe_probe_outcome() {
        let bucket = bucket();
        let ticket = bucket.await_limits().await.expect("first caller probes");

        let released = Arc::new(AtomicUsize::new(0));
        let mut waiters = Vec::new();
        for _ in 0..5 {
            let bucket = Arc::clone(&bucket);
            let released = Arc::clone(&released);
            waiters.push(tokio::spawn(async move {
                let ticket = bucket.await_limits().await;
                released.fetch_add(1, Ordering::SeqCst);
                (ticket.is_none(), bucket.maximum(), bucket.remaining())
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);

        bucket.set_initial(5, 4, Instant::now() + Duration::from_secs(2), None);
        ticket.complete();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), (true, 5, 4));
        }
    }

    #[tokio::test]
    async fn test_failed_probe_elects_new_probe() {
        let bucket = bucket();
        let ticket = bucket.await_limits().await.expect("first caller probes");

        let sibling = {
            let bucket = Arc::clone(&bucket);
            tokio::spawn(async move { bucket.await_limits().await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        ticket.fail();
        assert!(sibling.await.unwrap(), "sibling must take over probing");
        assert!(!bucket.is_limit_known());
    }

    #[tokio::test]
    async fn test_cancelled_probe_releases_waiters() {
        let bucket = bucket();
        let probe = {
            let bucket = Arc::clone(&bucket);
            tokio::spawn(async move {
                let _ticket = bucket.await_limits().await;
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bucket.is_probe_in_flight());

        probe.abort();
        let _ = probe.await;

        let took_over = tokio::time::timeout(Duration::from_secs(1), bucket.await_limits())
            .await
            .unwrap();
        assert!(took_over.is_some());
    }
}
