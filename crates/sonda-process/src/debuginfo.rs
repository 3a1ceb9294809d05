use std::convert::Infallible;
use std::future::Future;
use std::path::Path;

use crate::mapping::ObjectFile;

/// Trait implementing the extraction and upload of debug information.
pub trait DebugInfoService {
    /// Error returned by this trait.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Extracts the debug information of the given object file, or finds it
    /// if it was previously extracted.
    ///
    /// `root` is the directory from which the object file's path is
    /// reachable (see [Mapping::root](crate::Mapping::root)).
    ///
    /// # Note
    ///
    /// Implementors are expected to be idempotent.
    fn extract_or_find(
        &self,
        root: &Path,
        object_file: &ObjectFile,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Uploads the debug information of the given object file to the remote
    /// store.
    ///
    /// # Note
    ///
    /// Distinct processes may upload object files with the same build ID
    /// concurrently, so the remote store must tolerate concurrent writers of
    /// identical content.
    fn upload(
        &self,
        object_file: &ObjectFile,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Debug information service that cannot be instantiated.
///
/// This is the service type of an [InfoManager](crate::InfoManager) built
/// without debug information uploads.
#[derive(Debug)]
pub enum NoDebugInfo {}

impl DebugInfoService for NoDebugInfo {
    type Error = Infallible;

    async fn extract_or_find(
        &self,
        _root: &Path,
        _object_file: &ObjectFile,
    ) -> Result<(), Infallible> {
        match *self {}
    }

    async fn upload(&self, _object_file: &ObjectFile) -> Result<(), Infallible> {
        match *self {}
    }
}
