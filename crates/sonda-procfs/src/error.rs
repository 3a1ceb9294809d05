/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// File open/read error.
    #[error("{0}: {1}")]
    File(std::path::PathBuf, std::io::Error),

    /// Line of a `maps` file which cannot be parsed.
    #[error("malformed maps line {line}: {content:?}")]
    MalformedMapsLine {
        /// Line number (1-based).
        line: usize,

        /// Content of the line.
        content: String,
    },

    /// Error from the [goblin] crate.
    #[error(transparent)]
    Goblin(#[from] goblin::error::Error),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
