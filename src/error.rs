//! Main crate error.

/// Main error enum, covering every failure a feed can surface.
///
/// Failures during stream startup are returned from
/// [`crate::feed::Feed::enable`]; failures after a stream has become ready are
/// delivered as [`crate::feed::FeedMessage::Error`].
#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    /// Transport could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),
    /// Data received from the feed could not be understood.
    #[error("payload error: {0}")]
    Payload(String),
    /// Error condition reported by the feed provider.
    #[error("remote error {code}: {msg}")]
    Remote {
        /// Error code returned by the venue.
        code: i64,
        /// Error message returned by the venue.
        msg: String,
    },
    /// Rate limit exceeded in an unrecoverable way.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),
    /// Operation exceeded allocated time.
    #[error("timed out: {0}")]
    Timeout(String),
}
