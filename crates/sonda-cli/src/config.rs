use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::IntoDiagnostic;
use sonda_debuginfo::LocalStore;
use sonda_process::{Backoff, RetryPolicy};
use sonda_procfs::DEFAULT_PROCFS_ROOT;

/// Configuration of the profiling agent.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct AgentConfig {
    /// Duration of a profiling round, in milliseconds.
    #[knus(child, default = 10_000, unwrap(argument))]
    pub profiling_duration_ms: u64,

    /// Number of profiling rounds the information of a process survives
    /// without being accessed.
    #[knus(child, default = 10, unwrap(argument))]
    pub ttl_multiplier: u32,

    /// Maximum number of processes whose information is cached.
    #[knus(child, default = 5000, unwrap(argument))]
    pub max_entries: usize,

    /// Debug information uploads.
    #[knus(child, default)]
    pub upload: UploadConfig,

    /// Directory where debug information is extracted.
    #[knus(child, unwrap(argument))]
    pub debuginfo_dir: Option<String>,

    /// Directory where debug information is uploaded.
    #[knus(child, unwrap(argument))]
    pub upload_dir: Option<String>,

    /// Mount point of procfs.
    #[knus(child, default = DEFAULT_PROCFS_ROOT.to_owned(), unwrap(argument))]
    pub procfs_root: String,
}

/// Configuration of debug information uploads.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct UploadConfig {
    /// Maximum number of concurrent uploads.
    #[knus(child, default = 4, unwrap(argument))]
    pub concurrency: usize,

    /// Maximum number of attempts per upload.
    #[knus(child, default = 1, unwrap(argument))]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds (doubled after each
    /// retry).
    #[knus(child, default = 250, unwrap(argument))]
    pub backoff_ms: u64,

    /// Upper bound of the delay between retries, in milliseconds.
    #[knus(child, default = 5000, unwrap(argument))]
    pub max_backoff_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 1,
            backoff_ms: 250,
            max_backoff_ms: 5000,
        }
    }
}

impl AgentConfig {
    /// Parses the configuration.
    ///
    /// If `config` ends with `.kdl`, it is treated as a path to a
    /// configuration file. Otherwise it is directly parsed as inline
    /// KDL-formatted configuration. When missing, the default configuration
    /// is used.
    pub fn parse(config: Option<&str>) -> miette::Result<Self> {
        let Some(config) = config else {
            return Ok(knus::parse("<default>", "")?);
        };

        let path = Path::new(config);

        let config = if let Some((filename, "kdl")) = path
            .file_name()
            .and_then(OsStr::to_str)
            .zip(path.extension().and_then(OsStr::to_str))
        {
            let content = std::fs::read_to_string(path).into_diagnostic()?;
            knus::parse(filename, &content)?
        } else {
            knus::parse("<content>", config)?
        };

        Ok(config)
    }

    /// Returns the duration of a profiling round.
    pub fn profiling_duration(&self) -> Duration {
        Duration::from_millis(self.profiling_duration_ms)
    }

    /// Returns the local debug information store, if both of its directories
    /// are configured.
    pub fn local_store(&self) -> Option<LocalStore> {
        let cache_dir = PathBuf::from(self.debuginfo_dir.as_ref()?);
        let store_dir = PathBuf::from(self.upload_dir.as_ref()?);

        Some(LocalStore::new(cache_dir, store_dir))
    }
}

impl UploadConfig {
    /// Returns the retry policy of uploads.
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff_ms {
            0 => Backoff::None,
            backoff_ms => Backoff::Exponential {
                initial: Duration::from_millis(backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms.max(backoff_ms)),
            },
        };

        RetryPolicy::new(self.max_attempts, backoff)
    }
}
