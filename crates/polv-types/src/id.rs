use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry identity of a miner.
///
/// Opaque to the coordinator; the registry decides what it encodes (a
/// hotkey, a UID, a URL). Ordered so that ranking tie-breaks are stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinerId(String);

impl MinerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MinerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MinerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MinerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
