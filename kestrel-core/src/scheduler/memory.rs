//! Memory-token admission for encoding jobs.
//!
//! Encoder memory scales with resolution, so admission is weighted: an SD
//! job takes one token, HD two, UHD four. Capacity comes from the config or
//! is derived from system memory, and acquisition blocks until enough
//! tokens free up, waking on release and polling the cancel flag.

use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::ResourcesConfig;
use crate::error::{CoreError, CoreResult};

/// Token-counting semaphore with weighted acquisition.
pub struct MemoryTokens {
    inner: Arc<TokenInner>,
    capacity: usize,
}

#[derive(Debug)]
struct TokenInner {
    in_use: Mutex<usize>,
    released: Condvar,
}

impl MemoryTokens {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                in_use: Mutex::new(0),
                released: Condvar::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Build from config: explicit capacity wins, otherwise size from system
    /// memory. One token stands for roughly half the configured per-job
    /// memory (an HD job's two tokens equal one `memory_per_job`).
    pub fn from_config(resources: &ResourcesConfig) -> Self {
        if resources.max_memory_tokens > 0 {
            info!(
                "Memory admission: {} tokens (configured)",
                resources.max_memory_tokens
            );
            return Self::new(resources.max_memory_tokens);
        }

        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let total_mb = (system.total_memory() / 1024 / 1024) as usize;

        // Leave headroom for the OS and the coordinator; smaller systems get
        // a smaller share.
        let fraction = if total_mb < 8 * 1024 {
            0.5
        } else if total_mb < 16 * 1024 {
            0.6
        } else if total_mb < 32 * 1024 {
            0.65
        } else {
            0.7
        };

        let token_mb = (resources.memory_per_job.max(512) / 2).max(256);
        let capacity = ((total_mb as f64 * fraction) as usize / token_mb).max(4);
        info!(
            "Memory admission: {} tokens ({} MB each, {} MB system)",
            capacity, token_mb, total_mb
        );
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *self.inner.in_use.lock().unwrap()
    }

    /// Acquire `weight` tokens, blocking until they are available. Weights
    /// above capacity are clamped so a single oversized job can still run.
    pub fn acquire(&self, weight: usize, cancel: &CancelToken) -> CoreResult<TokenGuard> {
        let weight = weight.clamp(1, self.capacity);
        let mut in_use = self.inner.in_use.lock().unwrap();
        loop {
            cancel.check()?;
            if *in_use + weight <= self.capacity {
                *in_use += weight;
                debug!("acquired {} tokens ({}/{})", weight, *in_use, self.capacity);
                return Ok(TokenGuard {
                    inner: Arc::clone(&self.inner),
                    weight,
                });
            }
            let (guard, _timeout) = self
                .inner
                .released
                .wait_timeout(in_use, Duration::from_millis(200))
                .map_err(|_| CoreError::Cancelled)?;
            in_use = guard;
        }
    }
}

/// RAII token holder; dropping returns the tokens and wakes waiters.
#[derive(Debug)]
pub struct TokenGuard {
    inner: Arc<TokenInner>,
    weight: usize,
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        let mut in_use = self.inner.in_use.lock().unwrap();
        *in_use = in_use.saturating_sub(self.weight);
        drop(in_use);
        self.inner.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn weighted_acquire_and_release() {
        let tokens = MemoryTokens::new(4);
        let cancel = CancelToken::new();

        let a = tokens.acquire(2, &cancel).unwrap();
        let b = tokens.acquire(2, &cancel).unwrap();
        assert_eq!(tokens.in_use(), 4);
        drop(a);
        assert_eq!(tokens.in_use(), 2);
        drop(b);
        assert_eq!(tokens.in_use(), 0);
    }

    #[test]
    fn oversized_weight_is_clamped_to_capacity() {
        let tokens = MemoryTokens::new(2);
        let cancel = CancelToken::new();
        let guard = tokens.acquire(10, &cancel).unwrap();
        assert_eq!(tokens.in_use(), 2);
        drop(guard);
    }

    #[test]
    fn cancelled_waiter_errors_out() {
        let tokens = MemoryTokens::new(1);
        let cancel = CancelToken::new();
        let _held = tokens.acquire(1, &cancel).unwrap();

        cancel.cancel();
        let started = Instant::now();
        let err = tokens.acquire(1, &cancel).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn blocked_acquire_proceeds_after_release() {
        let tokens = Arc::new(MemoryTokens::new(2));
        let cancel = CancelToken::new();
        let acquired = Arc::new(AtomicUsize::new(0));

        let held = tokens.acquire(2, &cancel).unwrap();

        let tokens2 = Arc::clone(&tokens);
        let cancel2 = cancel.clone();
        let acquired2 = Arc::clone(&acquired);
        let waiter = std::thread::spawn(move || {
            let guard = tokens2.acquire(1, &cancel2).unwrap();
            acquired2.store(1, Ordering::SeqCst);
            drop(guard);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        drop(held);
        waiter.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }
}
