//! Relay Protocol - Line protocol for the collaborative canvas relay
//!
//! This crate defines what may travel over a relay connection:
//! - `validate` - the format gate every incoming line passes before it can
//!   enter the shared history
//! - `command` - the accepted-command type, only obtainable from the validator
//! - `message` - server-originated lines (rejection notices) and the outbound
//!   line type queued for each connected client
//!
//! The relay never interprets coordinates, colors or shapes. A command is
//! checked for syntactic shape and then forwarded verbatim.
//!
//! # Wire Format
//!
//! ```text
//! ACTION;CLEAR
//! ACTION;UNDO
//! DRAW;PENCIL;<color>;<thickness>;<x1>;<y1>;<x2>;<y2>
//! DRAW;LINE;<color>;<thickness>;<x1>;<y1>;<x2>;<y2>
//! DRAW;RECT;<color>;<thickness>;<x>;<y>;<w>;<h>
//! DRAW;OVAL;<color>;<thickness>;<x>;<y>;<w>;<h>
//! DRAW;TEXT;<color>;<size>;<x>;<y>;<content...>
//! ERROR;INVALID_FORMAT            (server -> sender only)
//! ```

pub mod command;
pub mod message;
pub mod validate;

pub use command::Command;
pub use message::{Notice, Outbound};
pub use validate::{
    is_valid, Action, Arity, CommandKind, ToolLayout, ValidationError, Validator,
    DEFAULT_SHAPE_TOOLS, EXTENDED_SHAPE_TOOLS, FIELD_SEPARATOR,
};
