//! Per-window set of seen beacon ids and the derived unique count.
use std::collections::HashSet;
use tokio::sync::Mutex;

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub is_new: bool,
    pub count: u64,
}

#[derive(Debug, Default)]
struct WindowState {
    seen: HashSet<RequestId>,
    count: u64,
}

/// Owns the current window. Every operation takes the lock exactly once, so
/// `accept` and `reset` are totally ordered and `count == seen.len()` holds
/// whenever the lock is released.
#[derive(Debug, Default)]
pub struct Deduplicator {
    state: Mutex<WindowState>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn accept(&self, id: RequestId) -> Accepted {
        let mut guard = self.state.lock().await;
        let is_new = guard.seen.insert(id);
        if is_new {
            guard.count += 1;
        }
        Accepted {
            is_new,
            count: guard.count,
        }
    }

    pub async fn snapshot(&self) -> u64 {
        self.state.lock().await.count
    }

    /// Swaps in an empty window and returns the closed window's count.
    pub async fn reset(&self) -> u64 {
        let mut guard = self.state.lock().await;
        let previous = std::mem::take(&mut *guard);
        previous.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn repeated_id_counts_once() {
        let dedup = Deduplicator::new();
        let first = dedup.accept(7).await;
        assert_eq!(
            first,
            Accepted {
                is_new: true,
                count: 1
            }
        );
        for _ in 0..5 {
            let again = dedup.accept(7).await;
            assert!(!again.is_new);
            assert_eq!(again.count, 1);
        }
        assert_eq!(dedup.snapshot().await, 1);
    }

    #[tokio::test]
    async fn distinct_ids_accumulate() {
        let dedup = Deduplicator::new();
        for id in [3, 1, 4, 15, 9, 2, 6] {
            assert!(dedup.accept(id).await.is_new);
        }
        assert_eq!(dedup.snapshot().await, 7);
    }

    #[tokio::test]
    async fn reset_returns_previous_count_and_clears() {
        let dedup = Deduplicator::new();
        dedup.accept(1).await;
        dedup.accept(2).await;
        dedup.accept(2).await;
        let before = dedup.snapshot().await;

        assert_eq!(dedup.reset().await, before);
        assert_eq!(dedup.snapshot().await, 0);

        // ids from the closed window are new again
        assert!(dedup.accept(1).await.is_new);
        assert_eq!(dedup.reset().await, 1);
        assert_eq!(dedup.reset().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_match_distinct_cardinality() {
        let dedup = Arc::new(Deduplicator::new());
        let mut tasks = Vec::new();
        for worker in 0..16u64 {
            let dedup = dedup.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500u64 {
                    // half the ids are shared across workers, half are unique to this worker
                    let id = if i % 2 == 0 { i } else { 10_000 + worker * 1_000 + i };
                    dedup.accept(id).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        // 250 shared even ids + 16 workers * 250 private odd ids
        assert_eq!(dedup.snapshot().await, 250 + 16 * 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resets_interleaved_with_accepts_lose_nothing() {
        let dedup = Arc::new(Deduplicator::new());
        let mut tasks = Vec::new();
        for worker in 0..8u64 {
            let dedup = dedup.clone();
            tasks.push(tokio::spawn(async move {
                let mut new_ids = 0u64;
                for i in 0..1_000u64 {
                    if dedup.accept(worker * 1_000_000 + i).await.is_new {
                        new_ids += 1;
                    }
                }
                new_ids
            }));
        }

        let mut reported = 0u64;
        for _ in 0..50 {
            reported += dedup.reset().await;
            tokio::task::yield_now().await;
        }

        let mut accepted = 0u64;
        for task in tasks {
            accepted += task.await.unwrap();
        }
        reported += dedup.reset().await;
        // every id is distinct, so each accept lands in exactly one window
        assert_eq!(accepted, 8_000);
        assert_eq!(reported, accepted);
    }
}
