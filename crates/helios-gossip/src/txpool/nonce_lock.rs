use std::{collections::HashMap, sync::Arc};

use alloy_primitives::Address;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

/// Guard of one address held by [`NonceLock::lock_addr`].
pub type NonceGuard = ArcMutexGuard<RawMutex, ()>;

/// Per-address locks serializing nonce assignment and submission of locally signed
/// transactions.
#[derive(Debug, Default)]
pub struct NonceLock {
    locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl NonceLock {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `address` until the guard is dropped.
    pub fn lock_addr(&self, address: Address) -> NonceGuard {
        let lock = self.locks.lock().entry(address).or_default().clone();
        lock.lock_arc()
    }

    /// Locks `address` if no one else holds it.
    pub fn try_lock_addr(&self, address: Address) -> Option<NonceGuard> {
        let lock = self.locks.lock().entry(address).or_default().clone();
        lock.try_lock_arc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_per_address() {
        let locks = NonceLock::new();
        let a = Address::with_last_byte(1);
        let guard = locks.lock_addr(a);
        assert!(locks.try_lock_addr(a).is_none());
        assert!(locks.try_lock_addr(Address::with_last_byte(2)).is_some());
        drop(guard);
        assert!(locks.try_lock_addr(a).is_some());
    }
}
