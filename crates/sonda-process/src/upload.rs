use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::debuginfo::DebugInfoService;
use crate::mapping::{BuildId, Mappings, ObjectFile};
use crate::retry::RetryPolicy;

/// Default maximum number of concurrent uploads.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Error related to the debug information of a single mapping.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    /// The mapping has no backing object file.
    #[error("mapping {pathname} is not open")]
    MappingNotOpen {
        /// Path name of the mapping.
        pathname: String,
    },

    /// The debug information service failed to upload the object file.
    #[error("failed to upload debug information of {} ({attempts} attempts)", .path.display())]
    Upload {
        /// Path of the object file.
        path: PathBuf,

        /// Build ID of the object file.
        build_id: Option<BuildId>,

        /// Number of performed attempts.
        attempts: u32,

        /// Error of the last attempt.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The upload was canceled before completion.
    #[error("upload of {} canceled", .path.display())]
    Cancelled {
        /// Path of the object file.
        path: PathBuf,
    },

    /// The upload task panicked or was aborted.
    #[error(transparent)]
    Task(#[from] tokio::task::JoinError),
}

/// Aggregate of the errors of an upload batch.
#[derive(Debug)]
pub struct UploadErrors(Vec<UploadError>);

impl UploadErrors {
    /// Returns the aggregated errors.
    pub fn errors(&self) -> &[UploadError] {
        &self.0
    }

    /// Returns the aggregated errors.
    pub fn into_errors(self) -> Vec<UploadError> {
        self.0
    }

    fn into_result(errors: Vec<UploadError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self(errors))
        }
    }
}

impl fmt::Display for UploadErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;

        for (i, e) in self.0.iter().enumerate() {
            write!(f, "\n  {i}: {e}")?;

            let mut source = std::error::Error::source(e);
            while let Some(e) = source {
                write!(f, ": {e}")?;
                source = e.source();
            }
        }

        Ok(())
    }
}

impl std::error::Error for UploadErrors {}

/// Pipeline ensuring that the debug information of mapped object files is
/// uploaded.
///
/// Uploads are performed by a pool of bounded size, which is shared by all
/// the clones of an uploader.
pub struct Uploader<D> {
    /// Debug information service.
    service: Arc<D>,

    /// Upload slots.
    pool: Arc<Semaphore>,

    /// Retry policy applied to each upload.
    retry: RetryPolicy,
}

impl<D> Clone for Uploader<D> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            pool: self.pool.clone(),
            retry: self.retry,
        }
    }
}

impl<D> Uploader<D>
where
    D: DebugInfoService + Send + Sync + 'static,
{
    /// Creates a new uploader with at most `concurrency` concurrent uploads.
    ///
    /// A `concurrency` of zero is treated as one.
    pub fn new(service: Arc<D>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            service,
            pool: Arc::new(Semaphore::new(concurrency.max(1))),
            retry,
        }
    }

    /// Returns the debug information service.
    pub fn service(&self) -> &Arc<D> {
        &self.service
    }

    /// Extracts the debug information of every open mapping and submits it
    /// for upload.
    ///
    /// Extraction is performed sequentially, then each upload is submitted
    /// to the pool. This call never waits for a slot of the pool: submitted
    /// uploads wait for their slot in the background, and the returned batch
    /// tracks them.
    ///
    /// A failing mapping never prevents the other mappings from being
    /// processed.
    #[tracing::instrument(name = "EnsureUploaded", skip(self, mappings, token))]
    pub async fn ensure_uploaded(
        &self,
        pid: u32,
        mappings: &Mappings,
        token: &CancellationToken,
    ) -> UploadBatch {
        let mut batch = UploadBatch {
            pid,
            rejected: Vec::new(),
            tasks: JoinSet::new(),
        };

        for mapping in mappings {
            let Some(object_file) = mapping.object_file() else {
                tracing::debug!(pathname = mapping.pathname(), "mapping not open");

                batch.rejected.push(UploadError::MappingNotOpen {
                    pathname: mapping.pathname().to_owned(),
                });
                continue;
            };

            let span = tracing::error_span!(
                "ObjectFile",
                build_id = object_file.build_id().map(BuildId::as_str),
                path = %object_file.path().display(),
            );

            let extracted = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                res = self.service.extract_or_find(mapping.root(), object_file) => Some(res),
            };

            match extracted {
                Some(Ok(())) => (),
                Some(Err(e)) => span.in_scope(|| {
                    tracing::error!(error = %e, "failed to extract debug information")
                }),
                None => {
                    batch.rejected.push(UploadError::Cancelled {
                        path: object_file.path().to_path_buf(),
                    });
                    continue;
                }
            }

            let upload = upload_object_file(
                self.service.clone(),
                self.pool.clone(),
                object_file.clone(),
                self.retry,
                token.clone(),
            );

            batch.tasks.spawn(upload.instrument(span));
        }

        batch
    }
}

async fn upload_object_file<D: DebugInfoService>(
    service: Arc<D>,
    pool: Arc<Semaphore>,
    object_file: Arc<ObjectFile>,
    retry: RetryPolicy,
    token: CancellationToken,
) -> Result<(), UploadError> {
    let cancelled = || UploadError::Cancelled {
        path: object_file.path().to_path_buf(),
    };

    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = pool.acquire_owned() => permit.ok(),
    };

    let Some(_permit) = permit else {
        return Err(cancelled());
    };

    let (res, attempts) = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(cancelled()),
        res = retry.run(|| service.upload(&object_file)) => res,
    };

    match res {
        Ok(()) => {
            tracing::debug!(attempts, "debug information uploaded");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(attempts, error = %e, "failed to upload debug information");

            Err(UploadError::Upload {
                path: object_file.path().to_path_buf(),
                build_id: object_file.build_id().cloned(),
                attempts,
                source: Box::new(e),
            })
        }
    }
}

/// Debug information uploads submitted for the mappings of a process.
///
/// # Note
///
/// Dropping the batch aborts the uploads still in flight.
pub struct UploadBatch {
    /// ID of the process.
    pid: u32,

    /// Errors detected before any upload was submitted.
    rejected: Vec<UploadError>,

    /// Submitted uploads.
    tasks: JoinSet<Result<(), UploadError>>,
}

impl UploadBatch {
    /// Returns the ID of the process.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the errors detected while submitting the uploads (e.g.,
    /// mappings which are not open).
    pub fn dispatch_errors(&self) -> &[UploadError] {
        &self.rejected
    }

    /// Returns the number of submitted uploads not yet collected.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every submitted upload to complete.
    ///
    /// Errors detected while submitting the uploads are aggregated with the
    /// upload failures.
    pub async fn wait(mut self) -> Result<(), UploadErrors> {
        let mut errors = std::mem::take(&mut self.rejected);

        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(Ok(())) => (),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(e.into()),
            }
        }

        UploadErrors::into_result(errors)
    }
}
