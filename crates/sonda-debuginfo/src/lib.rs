//! This crate provides a [DebugInfoService](sonda_process::DebugInfoService)
//! backed by local directories.
//!
//! Debug information is extracted into a cache directory, and uploaded into
//! a store directory which stands in for a remote debug information server.
//! Both directories are indexed by build ID.

mod error;
mod store;

pub use self::error::{Error, Result};
pub use self::store::LocalStore;
