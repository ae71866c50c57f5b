use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use sha1::{Digest, Sha1};

/// Ring positions per worker.
pub const DEFAULT_REPLICAS: usize = 160;

/// A point on the 160-bit ring.
type Position = [u8; 20];

fn position(key: &str) -> Position {
    let digest = Sha1::digest(key.as_bytes());
    let mut pos = [0u8; 20];
    pos.copy_from_slice(&digest);
    pos
}

fn replica_key(worker: &str, replica: usize) -> String {
    format!("{}#{}", worker, replica)
}

/// Consistent hash ring mapping tenant ids to workers.
///
/// Each worker occupies `replicas` positions; a tenant belongs to the first
/// worker position at or after its own hash, wrapping around. Adding or
/// removing a worker only touches that worker's positions, so only tenants
/// that hashed next to them move.
#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    ring: BTreeMap<Position, String>,
    workers: BTreeSet<String>,
}

impl HashRing {
    pub fn new<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replicas(workers, DEFAULT_REPLICAS)
    }

    pub fn with_replicas<I, S>(workers: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self {
            replicas: replicas.max(1),
            ring: BTreeMap::new(),
            workers: BTreeSet::new(),
        };
        for worker in workers {
            ring.add_worker(worker);
        }
        ring
    }

    /// Worker owning `tenant_id`, or `None` when the ring is empty.
    pub fn assign(&self, tenant_id: &str) -> Option<&str> {
        let pos = position(tenant_id);
        self.ring
            .range((Bound::Included(pos), Bound::Unbounded))
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, worker)| worker.as_str())
    }

    /// Add a worker. Returns false if it was already present.
    pub fn add_worker(&mut self, worker: impl Into<String>) -> bool {
        let worker = worker.into();
        if !self.workers.insert(worker.clone()) {
            return false;
        }
        for replica in 0..self.replicas {
            self.ring
                .entry(position(&replica_key(&worker, replica)))
                .or_insert_with(|| worker.clone());
        }
        tracing::debug!(worker = %worker, replicas = self.replicas, "Worker added to ring");
        true
    }

    /// Remove a worker. Returns false if it was not present.
    pub fn remove_worker(&mut self, worker: &str) -> bool {
        if !self.workers.remove(worker) {
            return false;
        }
        for replica in 0..self.replicas {
            let pos = position(&replica_key(worker, replica));
            if self.ring.get(&pos).is_some_and(|owner| owner == worker) {
                self.ring.remove(&pos);
            }
        }
        tracing::debug!(worker = %worker, "Worker removed from ring");
        true
    }

    pub fn contains(&self, worker: &str) -> bool {
        self.workers.contains(worker)
    }

    /// Workers on the ring, sorted.
    pub fn workers(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}
