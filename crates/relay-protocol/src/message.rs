//! Server-originated lines and the per-client outbound queue item.

use std::fmt;

use crate::command::Command;

/// Notices the relay sends to a single client.
///
/// Notices are never recorded in history and never broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The client's last line failed validation.
    InvalidFormat,
}

impl Notice {
    /// Wire form of the notice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "ERROR;INVALID_FORMAT",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line queued for delivery to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A command from the shared history (replayed or live).
    Command(Command),

    /// A notice addressed to this client only.
    Notice(Notice),
}

impl Outbound {
    /// Returns the line text, without terminator.
    pub fn as_line(&self) -> &str {
        match self {
            Self::Command(command) => command.as_str(),
            Self::Notice(notice) => notice.as_str(),
        }
    }
}

impl From<Command> for Outbound {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<Notice> for Outbound {
    fn from(notice: Notice) -> Self {
        Self::Notice(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_format_wire_text() {
        assert_eq!(Notice::InvalidFormat.as_str(), "ERROR;INVALID_FORMAT");
        assert_eq!(Notice::InvalidFormat.to_string(), "ERROR;INVALID_FORMAT");
    }

    #[test]
    fn test_outbound_line() {
        let notice: Outbound = Notice::InvalidFormat.into();
        assert_eq!(notice.as_line(), "ERROR;INVALID_FORMAT");

        let command: Outbound = Command::new("ACTION;CLEAR").into();
        assert_eq!(command.as_line(), "ACTION;CLEAR");
    }
}
