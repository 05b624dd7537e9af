use std::{
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;

use crate::{
    error::ScriptResult,
    runtime::{Runtime, RuntimeOptions},
};

/// Pool sizing and recycling thresholds.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// The maximum number of idle runtimes kept for reuse.
    pub capacity: usize,

    /// An idle runtime older than this is recycled at lease time.
    pub max_idle_millis: i64,

    /// A runtime returned with more live heap slots than this is recycled
    /// instead of parked.
    pub max_live_slots: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 4,
            max_idle_millis: 60_000,
            max_live_slots: 100_000,
        }
    }
}

struct Parked {
    runtime: Runtime,
    parked_at: i64,
}

struct PoolInner {
    runtime_options: RuntimeOptions,
    options: PoolOptions,
    idle: Mutex<Vec<Parked>>,
}

impl PoolInner {
    fn idle_entries(&self) -> MutexGuard<'_, Vec<Parked>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A pool of independent runtimes.
///
/// Leasing hands out an idle runtime or creates a fresh one; returning a
/// lease parks the runtime for reuse after a health check. Unhealthy
/// runtimes (heap growth past the threshold, or parked for too long) are
/// closed and replaced rather than reused.
pub struct RuntimePool {
    inner: Arc<PoolInner>,
}

impl RuntimePool {
    /// `runtime_options` is the template applied to every runtime the pool
    /// creates.
    pub fn new(runtime_options: RuntimeOptions, options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                runtime_options,
                options,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Leases a runtime, bound to the calling thread for the lease duration.
    pub fn lease(&self) -> ScriptResult<Lease> {
        let now = Utc::now().timestamp_millis();

        loop {
            let parked = self.inner.idle_entries().pop();

            let Some(parked) = parked else {
                break;
            };

            if now - parked.parked_at > self.inner.options.max_idle_millis {
                log::debug!("recycling pooled runtime past its idle age");

                if let Err(error) = parked.runtime.close() {
                    log::warn!("failed to close stale pooled runtime: {error}");
                }

                continue;
            }

            return Ok(Lease {
                runtime: Some(parked.runtime),
                pool: Arc::clone(&self.inner),
            });
        }

        let runtime = Runtime::new(self.inner.runtime_options.clone())?;

        Ok(Lease {
            runtime: Some(runtime),
            pool: Arc::clone(&self.inner),
        })
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle_entries().len()
    }
}

/// A leased runtime. Dereferences to [Runtime]; dropping the lease returns
/// the runtime to the pool (or recycles it if unhealthy).
pub struct Lease {
    runtime: Option<Runtime>,
    pool: Arc<PoolInner>,
}

impl Deref for Lease {
    type Target = Runtime;

    #[inline(always)]
    fn deref(&self) -> &Runtime {
        match &self.runtime {
            Some(runtime) => runtime,

            // The runtime is taken out only in drop.
            None => crate::report::debug_unreachable!("Lease dereferenced after drop."),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        if runtime.shared.is_closed() {
            return;
        }

        let healthy = match runtime.heap_statistics() {
            Ok(statistics) => statistics.live_values <= self.pool.options.max_live_slots,
            Err(_) => false,
        };

        if !healthy {
            log::debug!("recycling pooled runtime past its heap threshold");

            if let Err(error) = runtime.close() {
                log::warn!("failed to close unhealthy pooled runtime: {error}");
            }

            return;
        }

        let mut idle = self.pool.idle_entries();

        if idle.len() >= self.pool.options.capacity {
            drop(idle);

            if let Err(error) = runtime.close() {
                log::warn!("failed to close surplus pooled runtime: {error}");
            }

            return;
        }

        // Unbind thread ownership so the next lessee can claim the runtime.
        runtime.shared.unbind();

        idle.push(Parked {
            runtime,
            parked_at: Utc::now().timestamp_millis(),
        });
    }
}
