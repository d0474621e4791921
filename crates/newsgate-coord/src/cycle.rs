use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::CoordError;
use crate::store::CoordinationStore;

const CYCLE_KEY: &str = "fetch:cycle";

/// Position in the rotation chosen for one fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSlot {
    /// Global cycle number, starting at 1.
    pub cycle: i64,
    /// Index into the rotation table.
    pub index: usize,
}

/// Global fetch-cycle counter.
///
/// Each call to [`FetchCycle::advance`] is one atomic increment in the
/// shared store, so concurrent workers never pick the same cycle number.
pub struct FetchCycle {
    store: Arc<dyn CoordinationStore>,
    local: AtomicI64,
}

impl FetchCycle {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            local: AtomicI64::new(0),
        }
    }

    /// Advances the counter and maps it onto a rotation of `rotation_len` slots.
    ///
    /// If the store is unreachable a process-local counter is used instead.
    pub async fn advance(&self, rotation_len: usize) -> CycleSlot {
        let cycle = match self.store.increment(CYCLE_KEY, None).await {
            Ok(n) => {
                self.local.fetch_max(n, Ordering::SeqCst);
                n
            }
            Err(e) => {
                let n = self.local.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(error = %e, cycle = n, "fetch cycle counter unavailable, using local counter");
                n
            }
        };
        CycleSlot {
            cycle,
            index: slot_index(cycle, rotation_len),
        }
    }

    /// Last cycle number handed out, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a non-integer.
    pub async fn current(&self) -> Result<Option<i64>, CoordError> {
        self.store
            .get(CYCLE_KEY)
            .await?
            .map(|raw| {
                raw.parse::<i64>().map_err(|e| CoordError::Corrupt {
                    key: CYCLE_KEY.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

fn slot_index(cycle: i64, rotation_len: usize) -> usize {
    if rotation_len == 0 {
        return 0;
    }
    let len = i64::try_from(rotation_len).unwrap_or(i64::MAX);
    usize::try_from((cycle - 1).rem_euclid(len)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::UnreachableStore;

    #[tokio::test]
    async fn advance_walks_the_rotation() {
        let cycle = FetchCycle::new(Arc::new(MemoryStore::new()));
        let mut indices = Vec::new();
        for _ in 0..5 {
            indices.push(cycle.advance(3).await.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 0, 1]);
        assert_eq!(cycle.current().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn concurrent_workers_get_distinct_cycles() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cycle = FetchCycle::new(Arc::clone(&store));
            handles.push(tokio::spawn(async move { cycle.advance(8).await.cycle }));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn store_down_uses_local_counter() {
        let cycle = FetchCycle::new(Arc::new(UnreachableStore::new()));
        assert_eq!(cycle.advance(4).await, CycleSlot { cycle: 1, index: 0 });
        assert_eq!(cycle.advance(4).await, CycleSlot { cycle: 2, index: 1 });
    }

    #[test]
    fn slot_index_handles_empty_rotation() {
        assert_eq!(slot_index(7, 0), 0);
        assert_eq!(slot_index(7, 3), 0);
    }
}
