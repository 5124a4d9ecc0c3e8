//! Resource manager - admission control for folder operations
//!
//! Bounds three things system-wide: concurrent folder operations, the number
//! of admissions allowed to wait, and estimated memory in use. Waiting past
//! the queue bound is a rejection, not an unbounded buffer. Permits are RAII:
//! dropping one — on success, failure, or panic unwind — always returns its
//! capacity, so a crashing task cannot leak a slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use scout_core::error::Rejection;

/// Resource manager configuration
#[derive(Clone, Debug)]
pub struct ResourceConfig {
    /// Maximum folder operations running at once
    pub max_concurrent_ops: usize,
    /// Admissions allowed to wait before new ones are rejected
    pub max_queued_ops: usize,
    /// Soft memory ceiling in MB (logged, admission still granted)
    pub memory_soft_limit_mb: u64,
    /// Hard memory ceiling in MB (admission rejected)
    pub memory_hard_limit_mb: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ops: 2,
            max_queued_ops: 8,
            memory_soft_limit_mb: 512,
            memory_hard_limit_mb: 1024,
        }
    }
}

/// Point-in-time load summary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLoad {
    pub active_ops: usize,
    pub queue_depth: usize,
    pub estimated_memory_mb: u64,
}

/// Shared accounting state
struct Accounting {
    queued: AtomicUsize,
    memory_mb: AtomicU64,
    rejected: AtomicU64,
}

/// Admission token; dropping it releases the slot and its memory estimate
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    memory_mb: u64,
    accounting: Arc<Accounting>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.accounting
            .memory_mb
            .fetch_sub(self.memory_mb, Ordering::Relaxed);
    }
}

/// Decrements the queue counter even if the waiting future is dropped
struct QueueSlot {
    accounting: Arc<Accounting>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.accounting.queued.fetch_sub(1, Ordering::Relaxed);
    }
}

/// System-wide admission control for folder operations
pub struct ResourceManager {
    semaphore: Arc<Semaphore>,
    accounting: Arc<Accounting>,
    config: ResourceConfig,
}

impl ResourceManager {
    /// Create a manager with default limits
    pub fn new() -> Self {
        Self::with_config(ResourceConfig::default())
    }

    /// Create a manager with custom limits
    pub fn with_config(config: ResourceConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_ops)),
            accounting: Arc::new(Accounting {
                queued: AtomicUsize::new(0),
                memory_mb: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
            config,
        }
    }

    /// Request admission for an operation with the given memory estimate.
    ///
    /// Waits only while the queue bound allows; beyond that the request is
    /// rejected immediately so callers see backpressure instead of an
    /// ever-growing wait list.
    pub async fn admit(
        &self,
        operation: &str,
        estimated_memory_mb: u64,
    ) -> Result<Permit, Rejection> {
        let current_mb = self.accounting.memory_mb.load(Ordering::Relaxed);
        if current_mb + estimated_memory_mb > self.config.memory_hard_limit_mb {
            self.accounting.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Rejecting {}: estimated memory {} MB over hard ceiling",
                operation, current_mb
            );
            return Err(Rejection::MemoryExhausted { current_mb });
        }

        if current_mb + estimated_memory_mb > self.config.memory_soft_limit_mb {
            warn!(
                "Memory pressure: {} MB estimated in use (soft ceiling {} MB)",
                current_mb, self.config.memory_soft_limit_mb
            );
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                // All slots busy: wait, but only within the queue bound
                let depth = self.accounting.queued.load(Ordering::Relaxed);
                if depth >= self.config.max_queued_ops {
                    self.accounting.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!("Rejecting {}: admission queue full ({})", operation, depth);
                    return Err(Rejection::QueueFull { depth });
                }

                self.accounting.queued.fetch_add(1, Ordering::Relaxed);
                let _slot = QueueSlot {
                    accounting: self.accounting.clone(),
                };

                self.semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Rejection::QueueFull { depth })?
            }
        };

        self.accounting
            .memory_mb
            .fetch_add(estimated_memory_mb, Ordering::Relaxed);

        debug!("Admitted {} ({} MB estimated)", operation, estimated_memory_mb);
        Ok(Permit {
            _permit: permit,
            memory_mb: estimated_memory_mb,
            accounting: self.accounting.clone(),
        })
    }

    /// Current load (active operations, waiters, estimated memory)
    pub fn current_load(&self) -> ResourceLoad {
        ResourceLoad {
            active_ops: self
                .config
                .max_concurrent_ops
                .saturating_sub(self.semaphore.available_permits()),
            queue_depth: self.accounting.queued.load(Ordering::Relaxed),
            estimated_memory_mb: self.accounting.memory_mb.load(Ordering::Relaxed),
        }
    }

    /// Total admissions rejected since startup
    pub fn rejected_count(&self) -> u64 {
        self.accounting.rejected.load(Ordering::Relaxed)
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ResourceConfig {
        ResourceConfig {
            max_concurrent_ops: 1,
            max_queued_ops: 1,
            memory_soft_limit_mb: 100,
            memory_hard_limit_mb: 200,
        }
    }

    #[tokio::test]
    async fn test_admit_and_release() {
        let rm = ResourceManager::with_config(small_config());

        let permit = rm.admit("scan /data/docs", 10).await.unwrap();
        let load = rm.current_load();
        assert_eq!(load.active_ops, 1);
        assert_eq!(load.estimated_memory_mb, 10);

        drop(permit);
        let load = rm.current_load();
        assert_eq!(load.active_ops, 0);
        assert_eq!(load.estimated_memory_mb, 0);
    }

    #[tokio::test]
    async fn test_queue_bound_rejects() {
        let rm = Arc::new(ResourceManager::with_config(small_config()));

        // Occupy the single slot
        let held = rm.admit("op-a", 0).await.unwrap();

        // One waiter is allowed
        let rm2 = rm.clone();
        let waiter = tokio::spawn(async move { rm2.admit("op-b", 0).await });

        // Wait until the waiter has actually entered the queue
        for _ in 0..100 {
            if rm.current_load().queue_depth == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rm.current_load().queue_depth, 1);

        // A second waiter is over the bound: rejected, not queued
        let result = rm.admit("op-c", 0).await;
        assert!(matches!(result, Err(Rejection::QueueFull { .. })));
        assert_eq!(rm.rejected_count(), 1);

        drop(held);
        let permit = waiter.await.unwrap().unwrap();
        drop(permit);
    }

    #[tokio::test]
    async fn test_memory_hard_ceiling_rejects() {
        let rm = ResourceManager::with_config(ResourceConfig {
            max_concurrent_ops: 4,
            ..small_config()
        });

        let _a = rm.admit("op-a", 150).await.unwrap();
        let result = rm.admit("op-b", 100).await;
        assert!(matches!(result, Err(Rejection::MemoryExhausted { .. })));
    }

    #[tokio::test]
    async fn test_permit_released_on_panic_unwind() {
        let rm = Arc::new(ResourceManager::with_config(small_config()));

        let rm2 = rm.clone();
        let task = tokio::spawn(async move {
            let _permit = rm2.admit("doomed", 25).await.unwrap();
            panic!("task blew up");
        });
        assert!(task.await.is_err());

        // The permit and its memory estimate must both be back
        let load = rm.current_load();
        assert_eq!(load.active_ops, 0);
        assert_eq!(load.estimated_memory_mb, 0);

        // And the slot is reusable
        let permit = rm.admit("next", 1).await.unwrap();
        drop(permit);
    }
}
