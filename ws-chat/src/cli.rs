use std::net::SocketAddr;

use clap::{Args, Parser};

use crate::credentials::Username;

/// Terminal chat client for the local relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Who to chat as: alice, bob or charlie (case-insensitive).
    pub username: Username,
}

/// WebSocket relay routing chat between the preset users.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct RelayCli {
    #[command(flatten)]
    pub relay: RelayArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
}
