/// Errors returned by key-value stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// The store was closed or dropped.
    #[error("database closed")]
    Closed,
    /// The requested statistics property is not known to the driver.
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    /// A stored value could not be decoded.
    #[error("corrupted entry under key 0x{key}: {reason}")]
    Corrupted {
        /// Hex-encoded key of the broken entry.
        key: String,
        /// Decoder message.
        reason: String,
    },
    /// Underlying driver failure.
    #[error("database I/O: {0}")]
    Io(String),
}

impl KvError {
    /// Builds a [`KvError::Corrupted`] for the given raw key.
    pub fn corrupted(key: &[u8], reason: impl ToString) -> Self {
        let key = key.iter().map(|b| format!("{b:02x}")).collect();
        Self::Corrupted { key, reason: reason.to_string() }
    }
}

/// Result alias used throughout the storage layer.
pub type KvResult<T> = Result<T, KvError>;
