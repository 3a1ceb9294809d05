//! This crate maintains per-process information for a profiler.
//!
//! Given a process ID, the [InfoManager] discovers the memory mappings of
//! the process, makes sure the debug information of the mapped object files
//! is uploaded, and caches the result so that sampled addresses can later be
//! normalized into the address space of their object file.
//!
//! The manager relies on two collaborators, provided as traits:
//! - [MappingProvider], responsible for discovering the mappings of a
//!   process (e.g., `sonda-procfs` on Linux).
//! - [DebugInfoService], responsible for extracting and uploading debug
//!   information (e.g., `sonda-debuginfo`).
//!
//! ```no_run
//! use sonda_process::{InfoManager, MappingProvider, Mappings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = InfoManager::builder()
//!         .with_mapping_provider(CustomProvider)
//!         .without_debuginfo()
//!         .build();
//!
//!     let pid = std::process::id();
//!
//!     // sampling path
//!     manager.obtain_info(pid, &CancellationToken::new()).await.unwrap();
//!
//!     // symbolization path
//!     let info = manager.info_for_pid(pid).unwrap();
//!     let _normalized = info.normalize(0x5555_5555_1234).unwrap();
//! }
//!
//! struct CustomProvider;
//!
//! impl MappingProvider for CustomProvider {
//!     type Error = std::io::Error;
//!
//!     async fn mappings_for_pid(&self, _pid: u32) -> Result<Mappings, Self::Error> {
//!         //
//!         // discover the mappings of the process
//!         //
//!
//!         Ok(Mappings::default())
//!     }
//! }
//! ```

mod cache;
mod debuginfo;
mod error;
mod manager;
mod mapping;
mod provider;
mod retry;
mod upload;

pub use self::cache::CacheStats;
pub use self::debuginfo::{DebugInfoService, NoDebugInfo};
pub use self::error::{Error, Result};
pub use self::manager::{
    Builder, DEFAULT_MAX_ENTRIES, DEFAULT_PROFILING_DURATION, DEFAULT_TTL_MULTIPLIER, Info,
    InfoManager, NeedsDebugInfo, NeedsMappingProvider, Ready,
};
pub use self::mapping::{BuildId, Mapping, Mappings, ObjectFile};
pub use self::provider::MappingProvider;
pub use self::retry::{Backoff, RetryPolicy};
pub use self::upload::{DEFAULT_UPLOAD_CONCURRENCY, UploadBatch, UploadError, UploadErrors, Uploader};
