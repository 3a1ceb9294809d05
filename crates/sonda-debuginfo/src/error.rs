/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// File open/create error.
    #[error("{0}: {1}")]
    File(std::path::PathBuf, std::io::Error),

    /// The object file has no build ID, so its debug information cannot be
    /// indexed.
    #[error("{0}: missing build ID")]
    MissingBuildId(std::path::PathBuf),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
