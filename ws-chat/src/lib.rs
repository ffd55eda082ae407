//! Terminal chat over a single WebSocket connection.
//!
//! A client authenticates as one of three preset users and then chats through
//! a relay: plain lines are broadcast, `@user text` is a direct message and
//! `/quit` leaves. Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the command line of the client and relay binaries.
//! - [`credentials`] holds the static username → token table.
//! - [`envelope`] defines the JSON envelopes, one per WebSocket text frame.
//! - [`input`] parses prompt input and reads stdin off the async runtime.
//! - [`console`] serializes terminal output from the two session loops.
//! - [`session`] drives one client connection: connect, authenticate, then
//!   the concurrent send and receive loops.
//! - [`relay`] accepts clients, checks tokens and routes messages.
//! - [`error`] is the client-side error taxonomy.

pub mod cli;
pub mod console;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod input;
pub mod relay;
pub mod session;
