//! Tenant-to-worker routing.
//!
//! Every tenant is pinned to exactly one worker by a consistent hash ring, so
//! all of its jobs are submitted to, tracked by and listed from that worker.

pub mod ring;

pub use ring::{HashRing, DEFAULT_REPLICAS};
