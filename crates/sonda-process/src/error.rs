use std::sync::Arc;

/// Error type of this crate.
///
/// The error is cheaply clonable, so that every caller coalesced onto the
/// same computation receives the same outcome.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// No information is cached for the process (never computed, or evicted).
    #[error("no information cached for pid {0}")]
    NotPresent(u32),

    /// The mapping provider failed to discover the process' mappings.
    #[error("failed to discover mappings of pid {pid}")]
    MappingDiscovery {
        /// ID of the process.
        pid: u32,

        /// Error returned by the mapping provider.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// No mapping of the process contains the address.
    #[error("no mapping contains address {0:#x}")]
    NoContainingMapping(u64),

    /// The address cannot be normalized with the given mapping.
    #[error("address {addr:#x} is not mapped by {pathname}")]
    AddressNotMapped {
        /// Address to normalize.
        addr: u64,

        /// Path name of the mapping.
        pathname: String,
    },

    /// The computation of the process' information panicked or was aborted.
    #[error("computation of pid {pid} did not complete")]
    Aborted {
        /// ID of the process.
        pid: u32,

        /// Error of the computation's task.
        #[source]
        source: Arc<tokio::task::JoinError>,
    },

    /// The operation was canceled.
    #[error("operation canceled")]
    Cancelled,
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
