//! The DID Pool Store interface, `spec.md` §4.1.

use std::time::Duration;

use crate::error::CoreResult;
use crate::models::Did;

pub trait DidPool: Send + Sync {
    /// Atomically selects one free DID, flips it to leased with
    /// `destination`, and returns it. Fails with
    /// `CoreError::Exhausted` if none is free.
    fn acquire(&self, destination: &str) -> CoreResult<Did>;

    /// Releases a DID back to the free pool. Idempotent: releasing an
    /// already-free DID is a no-op success.
    fn release(&self, did: &str) -> CoreResult<()>;

    /// Returns the `destination` currently leased against `did`.
    fn lookup_destination(&self, did: &str) -> CoreResult<Option<String>>;

    /// Releases every DID leased for longer than `threshold`. Returns
    /// the count released.
    fn sweep_stuck(&self, threshold: Duration) -> CoreResult<u64>;
}
