use thiserror::Error;

/// Why an inbound callback failed authentication. Every variant is treated
/// the same way by the handler; the distinction only feeds the security log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("malformed header {header}: {reason}")]
    MalformedHeader {
        header: &'static str,
        reason: String,
    },

    #[error("timestamp outside tolerance ({age_secs}s)")]
    StaleTimestamp { age_secs: i64 },

    #[error("client identifier mismatch")]
    ClientMismatch,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Failures after a callback has been authenticated
#[derive(Error, Debug)]
pub enum InboundError {
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Failed to apply update: {0}")]
    Sink(String),
}
