use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use super::{DEFAULT_MAX_ENTRIES, DEFAULT_PROFILING_DURATION, DEFAULT_TTL_MULTIPLIER, InfoManager};
use crate::debuginfo::{DebugInfoService, NoDebugInfo};
use crate::provider::MappingProvider;
use crate::retry::RetryPolicy;
use crate::upload::{DEFAULT_UPLOAD_CONCURRENCY, Uploader};

/// Builder for [InfoManager].
///
/// It is usually created by calling [InfoManager::builder], and allows to
/// specify the mapping provider and the debug information service used by
/// the manager, along with the cache and upload settings.
pub struct Builder<S> {
    state: S,
    options: Options,
}

struct Options {
    profiling_duration: Duration,
    ttl_multiplier: u32,
    max_entries: usize,
    upload_concurrency: usize,
    retry: RetryPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            profiling_duration: DEFAULT_PROFILING_DURATION,
            ttl_multiplier: DEFAULT_TTL_MULTIPLIER,
            max_entries: DEFAULT_MAX_ENTRIES,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl Builder<NeedsMappingProvider> {
    pub(super) fn new() -> Self {
        Self {
            state: NeedsMappingProvider,
            options: Options::default(),
        }
    }

    /// Specifies the provider used to discover the mappings of processes.
    pub fn with_mapping_provider<P: MappingProvider>(
        self,
        provider: P,
    ) -> Builder<NeedsDebugInfo<P>> {
        Builder {
            state: NeedsDebugInfo { provider },
            options: self.options,
        }
    }
}

impl<P> Builder<NeedsDebugInfo<P>> {
    /// Specifies the service used to extract and upload the debug
    /// information of mapped object files.
    pub fn with_debuginfo<D: DebugInfoService>(self, service: D) -> Builder<Ready<P, D>> {
        Builder {
            state: Ready {
                provider: self.state.provider,
                service: Some(service),
            },
            options: self.options,
        }
    }

    /// Specifies to never extract nor upload debug information.
    pub fn without_debuginfo(self) -> Builder<Ready<P, NoDebugInfo>> {
        Builder {
            state: Ready {
                provider: self.state.provider,
                service: None,
            },
            options: self.options,
        }
    }
}

impl<S> Builder<S> {
    /// Specifies the duration of a profiling round (10 seconds by default).
    pub fn profiling_duration(mut self, duration: Duration) -> Self {
        self.options.profiling_duration = duration;
        self
    }

    /// Specifies how many profiling rounds the information of a process
    /// survives without being accessed (10 by default).
    pub fn ttl_multiplier(mut self, multiplier: u32) -> Self {
        self.options.ttl_multiplier = multiplier;
        self
    }

    /// Specifies the maximum number of processes whose information is cached
    /// (5000 by default).
    ///
    /// A value of zero is treated as one.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.options.max_entries = max_entries;
        self
    }

    /// Specifies the maximum number of concurrent debug information uploads
    /// (4 by default).
    pub fn upload_concurrency(mut self, concurrency: usize) -> Self {
        self.options.upload_concurrency = concurrency;
        self
    }

    /// Specifies the retry policy of debug information uploads (no retry by
    /// default).
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }
}

impl<P, D> Builder<Ready<P, D>>
where
    P: MappingProvider + Send + Sync + 'static,
    D: DebugInfoService + Send + Sync + 'static,
{
    /// Builds the info manager.
    pub fn build(self) -> InfoManager<P, D> {
        let Options {
            profiling_duration,
            ttl_multiplier,
            max_entries,
            upload_concurrency,
            retry,
        } = self.options;

        let uploader = self
            .state
            .service
            .map(|service| Uploader::new(Arc::new(service), upload_concurrency, retry));

        let ttl = profiling_duration.saturating_mul(ttl_multiplier);

        InfoManager::new(
            self.state.provider,
            uploader,
            NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN),
            ttl,
        )
    }
}

/// Builder state awaiting a mapping provider.
pub struct NeedsMappingProvider;

/// Builder state awaiting a debug information service.
pub struct NeedsDebugInfo<P> {
    provider: P,
}

/// Builder state ready to build the info manager.
pub struct Ready<P, D> {
    provider: P,
    service: Option<D>,
}
