//! Per-room mutual exclusion.
//!
//! Every state-mutating handler holds its room's lock for its whole duration.
//! Locks are created on first use and kept in LRU order; once more than
//! `capacity` locks exist, the oldest ones that nobody holds or waits on are
//! dropped.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default number of room locks kept around.
pub const DEFAULT_LOCK_CAPACITY: usize = 10_000;

/// Held for the duration of one handler. Released on drop.
pub type RoomGuard = OwnedMutexGuard<()>;

#[derive(Debug)]
pub struct RoomLocks {
    locks: Mutex<IndexMap<String, Arc<Mutex<()>>>>,
    capacity: usize,
}

impl Default for RoomLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_CAPACITY)
    }
}

impl RoomLocks {
    pub fn new(capacity: usize) -> Self {
        Self {
            locks: Mutex::new(IndexMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Wait for exclusive access to a room.
    pub async fn lock(&self, room_id: &str) -> RoomGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Re-insert to mark as recently used
            let lock = locks
                .shift_remove(room_id)
                .unwrap_or_else(|| Arc::new(Mutex::new(())));
            locks.insert(room_id.to_string(), Arc::clone(&lock));
            Self::evict_idle(&mut locks, self.capacity);
            lock
        };
        lock.lock_owned().await
    }

    /// Number of locks currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }

    fn evict_idle(locks: &mut IndexMap<String, Arc<Mutex<()>>>, capacity: usize) {
        let mut index = 0;
        while locks.len() > capacity && index < locks.len() {
            // Only the map holds an idle lock
            let idle = locks
                .get_index(index)
                .is_some_and(|(_, lock)| Arc::strong_count(lock) == 1);
            if idle {
                locks.shift_remove_index(index);
            } else {
                index += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_room_is_exclusive() {
        let locks = Arc::new(RoomLocks::default());
        let guard = locks.lock("!a:x").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("!a:x").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let locks = RoomLocks::default();
        let _a = locks.lock("!a:x").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("!b:x")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_evicts_idle_locks_only() {
        let locks = RoomLocks::new(2);
        let held = locks.lock("!held:x").await;
        drop(locks.lock("!b:x").await);
        drop(locks.lock("!c:x").await);
        drop(locks.lock("!d:x").await);

        assert_eq!(locks.len().await, 2);
        let map = locks.locks.lock().await;
        assert!(map.contains_key("!held:x"));
        assert!(map.contains_key("!d:x"));
        drop(map);
        drop(held);
    }

    #[tokio::test]
    async fn test_grows_past_capacity_when_all_busy() {
        let locks = RoomLocks::new(1);
        let _a = locks.lock("!a:x").await;
        let _b = locks.lock("!b:x").await;
        assert_eq!(locks.len().await, 2);
    }
}
