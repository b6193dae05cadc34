use thiserror::Error;

#[derive(Debug, Error)]
/// # Relay Error
///
/// Everything that can go wrong inside the relay core. None of these are fatal
/// to the process: they end one upstream attempt and feed the reconnect
/// supervisor.
pub enum RelayError {
    /// No upstream credential is configured, so no connection is attempted.
    #[error("Upstream credential is not configured")]
    MissingCredential,

    /// The upstream endpoint could not be reached or refused the handshake.
    #[error("Upstream connect error: {0}")]
    Connect(String),

    /// The live upstream session failed while sending or receiving.
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// A subscription payload could not be serialized.
    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
