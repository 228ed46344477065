//! Session identifiers, container naming, and slug/token minting.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix shared by every container and network the platform owns. Recovery
/// and teardown filter on this, so nothing else on the host may use it.
pub const CONTAINER_PREFIX: &str = "exam";

/// Alphabet for slugs and task tokens. Ambiguous glyphs (i, l, o, 0, 1) are
/// excluded because candidates occasionally have to type these by hand.
const SLUG_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

const SLUG_LEN: usize = 12;
const TOKEN_LEN: usize = 16;

/// Unique identifier for one candidate session.
///
/// The full id names the session state directory; the first eight hex chars
/// form the container namespace (`exam-<prefix8>-<node>`), matching what the
/// runtime can recover from `docker ps` after a crash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight characters of the simple (dash-free) representation.
    pub fn prefix8(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }

    /// Container/network namespace for this session, e.g. `exam-1a2b3c4d`.
    pub fn namespace(&self) -> String {
        format!("{}-{}", CONTAINER_PREFIX, self.prefix8())
    }

    /// Name of the per-session Docker network.
    pub fn network_name(&self) -> String {
        format!("{}-net", self.namespace())
    }

    /// Container name for a topology node.
    pub fn container_name(&self, node: &str) -> String {
        format!("{}-{}", self.namespace(), node)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

fn random_chars(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SLUG_ALPHABET[rng.gen_range(0..SLUG_ALPHABET.len())] as char)
        .collect()
}

/// Mint a candidate slug (used in URLs and container naming).
pub fn make_slug() -> String {
    random_chars(SLUG_LEN)
}

/// Mint a per-task access token.
pub fn make_token() -> String {
    random_chars(TOKEN_LEN)
}
