mod builder;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use self::builder::{Builder, NeedsDebugInfo, NeedsMappingProvider, Ready};
use crate::cache::{CacheStats, InfoCache};
use crate::debuginfo::{DebugInfoService, NoDebugInfo};
use crate::mapping::Mappings;
use crate::provider::MappingProvider;
use crate::upload::Uploader;
use crate::{Error, Result};

/// Default duration of a profiling round.
pub const DEFAULT_PROFILING_DURATION: Duration = Duration::from_secs(10);

/// Default number of profiling rounds a process' information survives
/// without being accessed.
pub const DEFAULT_TTL_MULTIPLIER: u32 = 10;

/// Default maximum number of processes whose information is cached.
pub const DEFAULT_MAX_ENTRIES: usize = 5000;

/// Information about a process, captured at a given point in time.
#[derive(Debug, Clone)]
pub struct Info {
    mappings: Mappings,
}

impl Info {
    /// Creates process information from its mappings.
    pub fn new(mappings: Mappings) -> Self {
        Self { mappings }
    }

    /// Returns the mappings of the process.
    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    /// Translates a virtual address of the process into the address space of
    /// the object file mapped at this address.
    pub fn normalize(&self, addr: u64) -> Result<u64> {
        self.mappings
            .mapping_for_addr(addr)
            .ok_or(Error::NoContainingMapping(addr))?
            .normalize(addr)
    }
}

/// Manager of per-process information.
///
/// Process information is computed on demand, cached for a bounded amount of
/// time, and the debug information of the process' object files is uploaded
/// as a side effect of the computation.
///
/// The manager is a cheap handle, which can be cloned and shared between
/// the workers of a profiler.
pub struct InfoManager<P, D = NoDebugInfo> {
    inner: Arc<Inner<P, D>>,
}

impl<P, D> Clone for InfoManager<P, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl InfoManager<(), NoDebugInfo> {
    /// Creates a new builder for an info manager.
    pub fn builder() -> Builder<NeedsMappingProvider> {
        Builder::new()
    }
}

type Computation = Shared<BoxFuture<'static, Result<()>>>;

/// Computation in flight for a process.
struct InFlight {
    /// Unique ID of the computation.
    id: u64,

    /// Cancellation token of the computation.
    token: CancellationToken,

    /// Outcome of the computation, shared by every coalesced caller.
    computation: Computation,
}

struct Inner<P, D> {
    provider: P,
    uploader: Option<Uploader<D>>,
    cache: InfoCache,
    in_flight: Mutex<HashMap<u32, InFlight>>,
    next_id: AtomicU64,
}

impl<P, D> InfoManager<P, D>
where
    P: MappingProvider + Send + Sync + 'static,
    D: DebugInfoService + Send + Sync + 'static,
{
    fn new(
        provider: P,
        uploader: Option<Uploader<D>>,
        max_entries: NonZeroUsize,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                uploader,
                cache: InfoCache::new(max_entries, ttl),
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Makes sure the information of the given process is cached.
    ///
    /// If the information is already cached, this returns immediately.
    /// Otherwise, the mappings of the process are discovered, the upload of
    /// their debug information is submitted, and the information is cached.
    ///
    /// Concurrent calls for the same process are coalesced onto a single
    /// computation, whose outcome is returned to every caller. The
    /// computation runs on its own task, so that it completes even if every
    /// caller stops waiting for it.
    ///
    /// # Note
    ///
    /// Upload failures are logged and never returned by this function.
    ///
    /// # Cancellation
    ///
    /// When `token` is cancelled, this function returns [Error::Cancelled].
    /// The computation itself is only cancelled by the token of the caller
    /// which started it, in which case nothing is cached and the other
    /// callers start a new computation.
    pub async fn obtain_info(&self, pid: u32, token: &CancellationToken) -> Result<()> {
        loop {
            if self.inner.cache.get(pid).is_some() {
                return Ok(());
            }

            let Some(computation) = self.join_or_start(pid, token) else {
                return Ok(());
            };

            let res = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                res = computation => res,
            };

            match res {
                Err(Error::Cancelled) if !token.is_cancelled() => {
                    tracing::debug!(pid, "joined computation was cancelled, restarting");
                }
                res => return res,
            }
        }
    }

    /// Returns the cached information of the given process.
    ///
    /// This never triggers a computation, and returns [Error::NotPresent]
    /// if the information was never computed or was evicted.
    pub fn info_for_pid(&self, pid: u32) -> Result<Arc<Info>> {
        self.inner.cache.get(pid).ok_or(Error::NotPresent(pid))
    }

    /// Returns a snapshot of the cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Returns the number of computations in flight.
    pub fn computations_in_flight(&self) -> usize {
        self.inner.lock_in_flight().len()
    }

    /// Returns the uploader used for debug information, if any.
    pub fn uploader(&self) -> Option<&Uploader<D>> {
        self.inner.uploader.as_ref()
    }

    /// Returns the computation in flight for the process, or starts a new one.
    ///
    /// Returns `None` if the information was cached in the meantime.
    fn join_or_start(&self, pid: u32, token: &CancellationToken) -> Option<Computation> {
        let mut in_flight = self.inner.lock_in_flight();

        if let Some(entry) = in_flight.get(&pid).filter(|entry| !entry.token.is_cancelled()) {
            tracing::trace!(pid, "joining in-flight computation");
            return Some(entry.computation.clone());
        }

        // the computation may have completed between the cache lookup and
        // the in-flight lookup
        if self.inner.cache.contains(pid) {
            return None;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(
            Inner::compute(self.inner.clone(), pid, id, token.clone())
                .instrument(tracing::info_span!("ObtainInfo", pid)),
        );

        let computation = task
            .map(move |res| {
                res.unwrap_or_else(|e| {
                    Err(Error::Aborted {
                        pid,
                        source: Arc::new(e),
                    })
                })
            })
            .boxed()
            .shared();

        in_flight.insert(
            pid,
            InFlight {
                id,
                token: token.clone(),
                computation: computation.clone(),
            },
        );

        Some(computation)
    }
}

impl<P, D> Inner<P, D>
where
    P: MappingProvider + Send + Sync + 'static,
    D: DebugInfoService + Send + Sync + 'static,
{
    async fn compute(self: Arc<Self>, pid: u32, id: u64, token: CancellationToken) -> Result<()> {
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            pid,
            id,
        };

        let res = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            res = self.discover_and_store(pid, &token) => res,
        };

        if let Err(e) = &res {
            tracing::debug!(error = %e, "failed to obtain process information");
        }

        res
    }

    async fn discover_and_store(&self, pid: u32, token: &CancellationToken) -> Result<()> {
        let mappings = self
            .provider
            .mappings_for_pid(pid)
            .await
            .map_err(|e| Error::MappingDiscovery {
                pid,
                source: Arc::new(e),
            })?;

        tracing::debug!(mappings = mappings.len(), "mappings discovered");

        let batch = match &self.uploader {
            Some(uploader) => Some(uploader.ensure_uploaded(pid, &mappings, token).await),
            None => None,
        };

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(batch) = batch {
            tokio::spawn(
                async move {
                    if let Err(e) = batch.wait().await {
                        tracing::warn!(error = %e, "failed to ensure debug information is uploaded");
                    }
                }
                .in_current_span(),
            );
        }

        self.cache.insert(pid, Arc::new(Info::new(mappings)));

        Ok(())
    }
}

impl<P, D> Inner<P, D> {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<u32, InFlight>> {
        lock(&self.in_flight)
    }
}

/// Removes the in-flight entry of a computation when the computation ends,
/// including when its task panics or is aborted.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<u32, InFlight>>,
    pid: u32,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = lock(self.in_flight);

        // a cancelled computation may already have been replaced
        if in_flight.get(&self.pid).is_some_and(|entry| entry.id == self.id) {
            in_flight.remove(&self.pid);
        }
    }
}

fn lock(in_flight: &Mutex<HashMap<u32, InFlight>>) -> MutexGuard<'_, HashMap<u32, InFlight>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}
