// Optional in-process per-key claims. Serialises work on one canonical key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::canonical::CanonicalKey;

type Slots = Arc<Mutex<HashMap<CanonicalKey, Arc<AsyncMutex<()>>>>>;

pub struct KeyClaims {
    enabled: bool,
    slots: Slots,
}

/// Held for the duration of one item's cache-check through store.
pub struct ClaimGuard {
    key: CanonicalKey,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyClaims {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive use of `key`. Returns `None` when claims are disabled.
    pub async fn acquire(&self, key: &CanonicalKey) -> Option<ClaimGuard> {
        if !self.enabled {
            return None;
        }
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        Some(ClaimGuard {
            key: key.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        })
    }

    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        self.guard.take();
        // Map entry plus nobody else waiting: drop the slot.
        if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonical;
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_never_blocks() {
        let claims = KeyClaims::new(false);
        let key = canonical("https://x/a.jpg");
        assert!(claims.acquire(&key).await.is_none());
        assert!(claims.acquire(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_second_claim_waits_for_first() {
        let claims = Arc::new(KeyClaims::new(true));
        let key = canonical("https://x/a.jpg");
        let first = claims.acquire(&key).await;
        assert!(first.is_some());

        let c2 = Arc::clone(&claims);
        let k2 = key.clone();
        let waiter = tokio::spawn(async move { c2.acquire(&k2).await.is_some() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
        assert_eq!(claims.active(), 0);
    }
}
