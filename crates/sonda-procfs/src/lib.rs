//! This crate provides a [MappingProvider](sonda_process::MappingProvider)
//! for Linux processes, based on procfs.
//!
//! The mappings of a process are read from `/proc/<pid>/maps`, and their
//! backing files are opened through `/proc/<pid>/root`, so that processes
//! running in another mount namespace (e.g., containers) are supported.
//!
//! ```no_run
//! use sonda_process::InfoManager;
//! use sonda_procfs::ProcfsMappingProvider;
//!
//! let manager = InfoManager::builder()
//!     .with_mapping_provider(ProcfsMappingProvider::default())
//!     .without_debuginfo()
//!     .build();
//! ```

mod elf;
mod error;
mod maps;
mod provider;

pub use self::error::{Error, Result};
pub use self::provider::{DEFAULT_PROCFS_ROOT, ProcfsMappingProvider};
