//! Static username → bearer token table shared by the client and the relay.

use std::{fmt, str::FromStr};

/// The preset users that can join the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Username {
    Alice,
    Bob,
    Charlie,
}

const CREDENTIALS: [(Username, &str); 3] = [
    (Username::Alice, "token-alice"),
    (Username::Bob, "token-bob"),
    (Username::Charlie, "token-charlie"),
];

impl Username {
    pub const ALL: [Username; 3] = [Username::Alice, Username::Bob, Username::Charlie];

    pub fn as_str(self) -> &'static str {
        match self {
            Username::Alice => "alice",
            Username::Bob => "bob",
            Username::Charlie => "charlie",
        }
    }

    /// Bearer token presented during the handshake.
    pub fn token(self) -> &'static str {
        CREDENTIALS
            .iter()
            .find(|(user, _)| *user == self)
            .map(|(_, token)| *token)
            .unwrap_or_default()
    }

    /// Reverse lookup used by the relay when a client authenticates.
    pub fn from_token(token: &str) -> Option<Self> {
        CREDENTIALS
            .iter()
            .find(|(_, known)| *known == token)
            .map(|(user, _)| *user)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUser(pub String);

impl fmt::Display for UnknownUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown username: {}. Available usernames: alice, bob, charlie",
            self.0
        )
    }
}

impl std::error::Error for UnknownUser {}

impl FromStr for Username {
    type Err = UnknownUser;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Username::ALL
            .into_iter()
            .find(|user| user.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownUser(s.to_string()))
    }
}
