use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Everything that can end (or interrupt) a chat session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The transport failed to establish or dropped unexpectedly.
    #[error("WebSocket error: {0}")]
    Connection(String),

    /// The server rejected our token; carries the server's reason verbatim.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("malformed envelope: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Recoverable, only ever reported back at the prompt.
    #[error("Invalid DM format. Use: @username message")]
    UserInput,

    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
}

impl From<tungstenite::Error> for ChatError {
    fn from(err: tungstenite::Error) -> Self {
        ChatError::Connection(err.to_string())
    }
}

/// True for the errors tungstenite reports once the peer has hung up.
pub fn is_connection_closed(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(
                tungstenite::error::ProtocolError::ResetWithoutClosingHandshake
            )
    )
}
