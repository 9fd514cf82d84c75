//! Writer identity

use std::fmt;
use uuid::Uuid;

/// Random identity of one writer instance, used to tell writers apart in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterId(Uuid);

impl WriterId {
    /// Mint a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WriterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
