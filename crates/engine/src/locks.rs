//! Per-entity lock manager with a single fixed acquisition order.
//!
//! Deadlock freedom comes from ordering, not detection: every acquisition
//! sorts its key set through `canonical_lock_order` before taking any
//! lock, so two actions contending on overlapping entities always take
//! the shared keys in the same sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autopilot_core::LockKey;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Sort lock keys into the one global acquisition order and drop
/// duplicates.
///
/// This is the ONLY place ordering is decided. Call sites hand over
/// whatever keys they derived and never sort themselves; the order is
/// `LockKind` declaration order, then primary key ascending within a kind.
pub fn canonical_lock_order(keys: &mut Vec<LockKey>) {
    keys.sort();
    keys.dedup();
}

/// Timed out waiting for one key in the set. Transient by definition:
/// the holder will release, so the caller retries the whole acquisition.
#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out acquiring lock {kind:?}:{id}", kind = .key.kind, id = .key.id)]
pub struct LockTimeout {
    pub key: LockKey,
}

/// Guards for one acquired key set. Dropping releases everything.
#[derive(Debug)]
pub struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Process-wide lock table keyed by entity.
///
/// Locks are created lazily per key and never removed; the table grows
/// with the set of entities ever contended, which is bounded by the
/// tenant's data.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &LockKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.entry(key.clone()).or_default().clone()
    }

    /// Acquire every key in the set, waiting at most `per_lock_timeout`
    /// for each. On timeout all already-held guards are released and the
    /// whole set must be re-acquired from the start.
    pub async fn acquire(
        &self,
        keys: &[LockKey],
        per_lock_timeout: Duration,
    ) -> Result<LockSet, LockTimeout> {
        let mut ordered = keys.to_vec();
        canonical_lock_order(&mut ordered);

        let mut guards = Vec::with_capacity(ordered.len());
        for key in &ordered {
            let slot = self.slot(key);
            match tokio::time::timeout(per_lock_timeout, slot.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    debug!(kind = ?key.kind, id = %key.id, "lock wait timed out");
                    return Err(LockTimeout { key: key.clone() });
                }
            }
        }
        Ok(LockSet { _guards: guards })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::LockKind;

    #[test]
    fn canonical_order_sorts_and_dedupes() {
        let mut keys = vec![
            LockKey::new(LockKind::ActionTarget, "portal:BCBS"),
            LockKey::new(LockKind::Customer, "t1"),
            LockKey::new(LockKind::Customer, "t1"),
            LockKey::new(LockKind::SignalEntity, "auth-2"),
            LockKey::new(LockKind::SignalEntity, "auth-1"),
        ];
        canonical_lock_order(&mut keys);
        assert_eq!(
            keys,
            vec![
                LockKey::new(LockKind::Customer, "t1"),
                LockKey::new(LockKind::SignalEntity, "auth-1"),
                LockKey::new(LockKind::SignalEntity, "auth-2"),
                LockKey::new(LockKind::ActionTarget, "portal:BCBS"),
            ]
        );
    }

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let manager = LockManager::new();
        let keys = vec![LockKey::new(LockKind::Customer, "t1")];
        let set = manager
            .acquire(&keys, Duration::from_millis(100))
            .await
            .unwrap();
        drop(set);
        manager
            .acquire(&keys, Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let manager = Arc::new(LockManager::new());
        let keys = vec![LockKey::new(LockKind::SignalEntity, "auth-1")];
        let _held = manager
            .acquire(&keys, Duration::from_millis(100))
            .await
            .unwrap();
        let err = manager
            .acquire(&keys, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.key, keys[0]);
    }

    #[tokio::test]
    async fn timed_out_acquire_releases_partial_holds() {
        let manager = Arc::new(LockManager::new());
        let a = LockKey::new(LockKind::Customer, "t1");
        let b = LockKey::new(LockKind::SignalEntity, "auth-1");

        // Hold b so an [a, b] acquisition stalls after taking a.
        let held_b = manager
            .acquire(std::slice::from_ref(&b), Duration::from_millis(100))
            .await
            .unwrap();
        let err = manager
            .acquire(&[a.clone(), b.clone()], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.key, b);

        // a must have been released by the failed acquisition.
        manager
            .acquire(std::slice::from_ref(&a), Duration::from_millis(50))
            .await
            .unwrap();
        drop(held_b);
    }
}
