use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ratelimit::{Bucket, BucketId, HashKey, InUse, Scope};

/// Maps routes to bucket hashes and bucket ids to live [`Bucket`]s.
///
/// # Architecture
///
/// - The route map is keyed by [`HashKey`] (method plus route template) and
///   holds the hash the server uses for that route family. Until a response
///   reveals the real hash, a locally generated "unlimited" hash is stored.
/// - The bucket map is keyed by [`BucketId`] (hash plus [`Scope`]).
/// - Both maps are `DashMap`s, so lookups from concurrent requests only
///   contend on the same shard.
#[derive(Debug, Default)]
pub struct Registry {
    /// Hash of every route family seen so far
    routes: DashMap<HashKey, String>,

    /// Live buckets, created on demand
    buckets: DashMap<BucketId, Arc<Bucket>>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create the bucket for a route family within a scope.
    ///
    /// The bucket is marked as in use before the registry lock is released,
    /// so the reclaimer cannot evict it between lookup and dispatch. The
    /// route entry stays locked until then, so a concurrent
    /// [`rebucket`](Self::rebucket) of the same route cannot move the bucket
    /// in between.
    pub(crate) fn resolve(&self, key: &HashKey, scope: &Scope) -> (Arc<Bucket>, InUse) {
        let route = self
            .routes
            .entry(key.clone())
            .or_insert_with(|| key.unlimited_hash());

        let id = BucketId::new(route.value(), scope);
        let entry = self
            .buckets
            .entry(id)
            .or_insert_with(|| Arc::new(Bucket::new(route.value().clone(), scope.clone())));
        let in_use = entry.begin_use();
        (Arc::clone(&entry), in_use)
    }

    /// The hash currently assigned to a route family
    #[must_use]
    pub fn route_hash(&self, key: &HashKey) -> Option<String> {
        self.routes.get(key).map(|hash| hash.clone())
    }

    /// Look up a live bucket
    #[must_use]
    pub fn bucket(&self, id: &BucketId) -> Option<Arc<Bucket>> {
        self.buckets.get(id).map(|bucket| Arc::clone(&bucket))
    }

    /// Number of live buckets
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if there are no live buckets
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Move `bucket` under the hash reported by the server.
    ///
    /// Only route families the registry knows are re-bucketed. The bucket
    /// keeps its learned state across the move. If another bucket already
    /// lives under the new id, that one wins and later requests resolve to it.
    ///
    /// The route entry is locked for the whole move and only points at the
    /// new hash once the bucket is reachable under it.
    pub(crate) fn rebucket(&self, key: &HashKey, bucket: &Arc<Bucket>, hash: &str) {
        let Some(mut route) = self.routes.get_mut(key) else {
            return;
        };

        match self.buckets.entry(BucketId::new(hash, bucket.scope())) {
            Entry::Occupied(entry) if !Arc::ptr_eq(entry.get(), bucket) => {
                debug!("Bucket {} already exists, keeping it", entry.key());
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(bucket));
            }
        }

        let old_hash = bucket.hash();
        if old_hash != hash {
            let old_id = BucketId::new(&old_hash, bucket.scope());
            self.buckets
                .remove_if(&old_id, |_, live| Arc::ptr_eq(live, bucket));
            bucket.set_hash(hash);
        }

        if *route != hash {
            debug!("Route {key} now maps to bucket hash {hash}");
            *route = hash.to_string();
        }
    }

    /// Forget a route family whose responses stopped carrying limits
    pub(crate) fn forget(&self, key: &HashKey, bucket: &Arc<Bucket>) {
        self.routes.remove(key);
        self.buckets
            .remove_if(&bucket.id(), |_, live| Arc::ptr_eq(live, bucket));
    }

    /// Drop every bucket that is idle and past its reset plus `grace`.
    ///
    /// Returns the number of buckets removed.
    pub(crate) fn reclaim(&self, now: Instant, relative: bool, grace: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_reclaimable(now, relative, grace));
        before.saturating_sub(self.buckets.len())
    }
}
