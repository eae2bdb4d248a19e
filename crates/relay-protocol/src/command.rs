//! Accepted drawing and control commands.

use std::fmt;
use std::sync::Arc;

/// A protocol line that passed validation.
///
/// The text is kept exactly as received (minus its line terminator) and is
/// never re-parsed by the relay. The only way to obtain a `Command` is
/// [`Validator::accept`](crate::Validator::accept), so anything holding one
/// has been through the format gate.
///
/// Cloning is a reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(Arc<str>);

impl Command {
    pub(crate) fn new(line: &str) -> Self {
        Self(Arc::from(line))
    }

    /// Returns the command text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Command {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Command {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}
