use std::path::PathBuf;

use helios_gossip::{BackendError, NodeError};

/// Errors of the node binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input file cannot be read.
    #[error("reading {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// OS error.
        source: std::io::Error,
    },
    /// An input file is not valid JSON of the expected shape.
    #[error("parsing {path}: {source}")]
    Json {
        /// File path.
        path: PathBuf,
        /// Decoder error.
        source: serde_json::Error,
    },
    /// A line of the transaction file does not decode.
    #[error("transaction on line {line}: {reason}")]
    Tx {
        /// One-based line number.
        line: usize,
        /// Decoder message.
        reason: String,
    },
    /// The output cannot be written.
    #[error("writing output: {0}")]
    Write(#[source] std::io::Error),
    /// The log file cannot be created.
    #[error("log file: {0}")]
    Log(#[source] std::io::Error),
    /// The node failed.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// A query failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
