use tandem_store::StoreError;
use tandem_types::UserId;

/// Everything a session operation can fail with. Nothing here is
/// retried by the core; retry, if any, belongs to the store client.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Blank or unknown identifiers, or an operation issued outside the
    /// Ready state. Rejected before any store call.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Asynchronous write failure from the store. Logged and surfaced,
    /// never retried.
    #[error("store write failed: {0}")]
    StoreWrite(#[from] StoreError),

    /// The store cancelled a subscription. Sticky until the next
    /// successful read.
    #[error("subscription cancelled: {0}")]
    ReadCancelled(String),

    /// The local identity maps to no configured partner. Terminal for
    /// the session.
    #[error("no counterpart configured for {0}")]
    UnknownCounterpart(UserId),
}
