use thiserror::Error;

/// Failures while turning an inbound command string into state changes.
///
/// The `Display` text is what the operator sees: it is echoed back over the
/// wireless link and returned in the HTTP 400 body.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid grow light color: {0}")]
    InvalidColor(String),

    #[error("Missing payload for {0}")]
    MissingPayload(&'static str),

    #[error("Message is not valid UTF-8")]
    InvalidEncoding,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Failed to persist {key}: {source}")]
    Persist {
        key: &'static str,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
