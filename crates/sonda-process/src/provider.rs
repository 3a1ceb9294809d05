use std::future::Future;

use crate::mapping::Mappings;

/// Trait implementing the discovery of a process' memory mappings.
pub trait MappingProvider {
    /// Error returned by this trait.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the current mappings of the process with the given ID.
    fn mappings_for_pid(
        &self,
        pid: u32,
    ) -> impl Future<Output = Result<Mappings, Self::Error>> + Send;
}
