//! Command format validation.
//!
//! The validator is the gate in front of the shared history. It checks only
//! syntactic shape: field counts and which fields must be 32-bit integers.
//! It never looks at colors, coordinate ranges or text content.
//!
//! # Field Layouts
//!
//! ```text
//! index:    0      1        2       3          4    5    6    7
//! segment:  DRAW ; PENCIL ; color ; thickness ; x1 ; y1 ; x2 ; y2     (exactly 8)
//! bounds:   DRAW ; RECT   ; color ; thickness ; x  ; y  ; w  ; h      (exactly 8)
//! text:     DRAW ; TEXT   ; color ; size      ; x  ; y  ; content...  (at least 7)
//! action:   ACTION ; CLEAR | UNDO
//! ```
//!
//! Trailing empty fields are dropped before counting, so `ACTION;CLEAR;` is
//! an ordinary two-field action and `DRAW;TEXT;red;12;1;2;` has no content
//! field at all.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::command::Command;

/// Separator between protocol fields.
pub const FIELD_SEPARATOR: char = ';';

/// Shape tools accepted by a default validator.
pub const DEFAULT_SHAPE_TOOLS: [&str; 2] = ["RECT", "OVAL"];

/// Additional tool names some clients emit with the same 4-coordinate
/// layout as `RECT`. Not accepted unless configured.
pub const EXTENDED_SHAPE_TOOLS: [&str; 4] = ["SQUARE", "RECTANGLE", "TRIANGLE", "HEXAGON"];

const TYPE_ACTION: &str = "ACTION";
const TYPE_DRAW: &str = "DRAW";

const TOOL_PENCIL: &str = "PENCIL";
const TOOL_LINE: &str = "LINE";
const TOOL_TEXT: &str = "TEXT";

/// Tools with a built-in layout; these can't be redefined as shapes.
const RESERVED_TOOLS: [&str; 3] = [TOOL_PENCIL, TOOL_LINE, TOOL_TEXT];

const MIN_DRAW_FIELDS: usize = 5;
const FIXED_DRAW_FIELDS: usize = 8;
const MIN_TEXT_FIELDS: usize = 7;

const THICKNESS_FIELD: usize = 3;
const FIRST_COORDINATE_FIELD: usize = 4;

// ============================================================================
// Classification
// ============================================================================

/// Control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Clear,
    Undo,
}

impl Action {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "CLEAR" => Some(Self::Clear),
            "UNDO" => Some(Self::Undo),
            _ => None,
        }
    }
}

/// Field layout a drawing tool must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolLayout {
    /// Two coordinate pairs: `x1;y1;x2;y2`.
    Segment,
    /// Origin and extent: `x;y;w;h`.
    Bounds,
    /// Position followed by free-form content.
    Text,
}

/// What a valid line turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind<'a> {
    Action(Action),
    Draw { tool: &'a str, layout: ToolLayout },
}

/// Expected number of fields for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    fn admits(self, found: usize) -> bool {
        match self {
            Self::Exactly(n) => found == n,
            Self::AtLeast(n) => found >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("blank line")]
    Blank,

    #[error("expected at least 2 fields, found {found}")]
    TooFewFields { found: usize },

    #[error("unknown command type: {0}")]
    UnknownType(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown drawing tool: {0}")]
    UnknownTool(String),

    #[error("{tool} expects {expected} fields, found {found}")]
    FieldCount {
        tool: String,
        expected: Arity,
        found: usize,
    },

    #[error("field {index} is not a 32-bit integer: {value:?}")]
    NotAnInteger { index: usize, value: String },
}

// ============================================================================
// Validator
// ============================================================================

/// Format validator with a configurable set of 4-coordinate shape tools.
#[derive(Debug, Clone)]
pub struct Validator {
    shape_tools: HashSet<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::with_shape_tools(DEFAULT_SHAPE_TOOLS)
    }
}

impl Validator {
    /// Creates a validator that accepts the given names as shape tools.
    ///
    /// Names are trimmed; empty names and the built-in tools (`PENCIL`,
    /// `LINE`, `TEXT`) are ignored.
    pub fn with_shape_tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let shape_tools = tools
            .into_iter()
            .map(|tool| tool.as_ref().trim().to_string())
            .filter(|tool| !tool.is_empty() && !RESERVED_TOOLS.contains(&tool.as_str()))
            .collect();

        Self { shape_tools }
    }

    /// Returns the configured shape tools, sorted.
    pub fn shape_tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self.shape_tools.iter().map(String::as_str).collect();
        tools.sort_unstable();
        tools
    }

    /// Checks whether `tool` uses the `x;y;w;h` layout.
    pub fn is_shape_tool(&self, tool: &str) -> bool {
        self.shape_tools.contains(tool)
    }

    /// Classifies a line or explains why it is rejected.
    pub fn validate<'a>(&self, line: &'a str) -> Result<CommandKind<'a>, ValidationError> {
        if line.trim().is_empty() {
            return Err(ValidationError::Blank);
        }

        let fields = split_fields(line);
        let [kind, sub, ..] = fields.as_slice() else {
            return Err(ValidationError::TooFewFields {
                found: fields.len(),
            });
        };

        match *kind {
            TYPE_ACTION => Action::parse(sub)
                .map(CommandKind::Action)
                .ok_or_else(|| ValidationError::UnknownAction(sub.to_string())),
            TYPE_DRAW => self.validate_draw(*sub, &fields),
            other => Err(ValidationError::UnknownType(other.to_string())),
        }
    }

    /// Validates a line and wraps it as a [`Command`].
    pub fn accept(&self, line: &str) -> Result<Command, ValidationError> {
        self.validate(line)?;
        Ok(Command::new(line))
    }

    /// Returns `true` if the line is a well-formed command.
    pub fn is_valid(&self, line: &str) -> bool {
        self.validate(line).is_ok()
    }

    fn validate_draw<'a>(
        &self,
        tool: &'a str,
        fields: &[&'a str],
    ) -> Result<CommandKind<'a>, ValidationError> {
        expect_arity(tool, fields, Arity::AtLeast(MIN_DRAW_FIELDS))?;
        expect_integers(fields, THICKNESS_FIELD, 1)?;

        let layout = match tool {
            TOOL_PENCIL | TOOL_LINE => ToolLayout::Segment,
            TOOL_TEXT => ToolLayout::Text,
            shape if self.is_shape_tool(shape) => ToolLayout::Bounds,
            other => return Err(ValidationError::UnknownTool(other.to_string())),
        };

        match layout {
            ToolLayout::Segment | ToolLayout::Bounds => {
                expect_arity(tool, fields, Arity::Exactly(FIXED_DRAW_FIELDS))?;
                expect_integers(fields, FIRST_COORDINATE_FIELD, 4)?;
            }
            ToolLayout::Text => {
                expect_arity(tool, fields, Arity::AtLeast(MIN_TEXT_FIELDS))?;
                expect_integers(fields, FIRST_COORDINATE_FIELD, 2)?;
            }
        }

        Ok(CommandKind::Draw { tool, layout })
    }
}

/// Checks a line against the default validator.
pub fn is_valid(line: &str) -> bool {
    static DEFAULT: OnceLock<Validator> = OnceLock::new();
    DEFAULT.get_or_init(Validator::default).is_valid(line)
}

// ============================================================================
// Field helpers
// ============================================================================

fn split_fields(line: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    while fields.last().is_some_and(|field| field.is_empty()) {
        fields.pop();
    }
    fields
}

fn expect_arity(tool: &str, fields: &[&str], expected: Arity) -> Result<(), ValidationError> {
    if expected.admits(fields.len()) {
        Ok(())
    } else {
        Err(ValidationError::FieldCount {
            tool: tool.to_string(),
            expected,
            found: fields.len(),
        })
    }
}

fn expect_integers(fields: &[&str], start: usize, count: usize) -> Result<(), ValidationError> {
    for index in start..start + count {
        let value = fields.get(index).copied().unwrap_or_default();
        if value.parse::<i32>().is_err() {
            return Err(ValidationError::NotAnInteger {
                index,
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject(line: &str) -> ValidationError {
        Validator::default()
            .validate(line)
            .expect_err("line should be rejected")
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    #[test]
    fn test_actions_accepted() {
        assert!(is_valid("ACTION;CLEAR"));
        assert!(is_valid("ACTION;UNDO"));
        assert_eq!(
            Validator::default().validate("ACTION;UNDO"),
            Ok(CommandKind::Action(Action::Undo))
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert_eq!(
            reject("ACTION;REDO"),
            ValidationError::UnknownAction("REDO".to_string())
        );
        assert!(!is_valid("ACTION;clear"));
        assert!(!is_valid("ACTION;ANYTHING_ELSE"));
    }

    #[test]
    fn test_action_extra_fields_not_checked() {
        assert!(is_valid("ACTION;CLEAR;whatever;else"));
    }

    // ------------------------------------------------------------------------
    // Blank and malformed lines
    // ------------------------------------------------------------------------

    #[test]
    fn test_blank_lines_rejected() {
        assert_eq!(reject(""), ValidationError::Blank);
        assert_eq!(reject("   "), ValidationError::Blank);
        assert_eq!(reject("\t \t"), ValidationError::Blank);
    }

    #[test]
    fn test_single_field_rejected() {
        assert_eq!(reject("ACTION"), ValidationError::TooFewFields { found: 1 });
        assert_eq!(reject(";;;"), ValidationError::TooFewFields { found: 0 });
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            reject("ERASE;ALL"),
            ValidationError::UnknownType("ERASE".to_string())
        );
        assert!(!is_valid("draw;PENCIL;red;2;0;0;10;10"));
        assert!(!is_valid(" DRAW;PENCIL;red;2;0;0;10;10"));
    }

    #[test]
    fn test_trailing_empty_fields_dropped() {
        assert!(is_valid("ACTION;CLEAR;"));
        assert!(is_valid("DRAW;PENCIL;red;2;0;0;10;10;"));
        assert!(is_valid("DRAW;PENCIL;red;2;0;0;10;10;;;"));
        // An empty field in the middle still counts.
        assert!(!is_valid("DRAW;PENCIL;red;2;0;;10;10"));
        // Content-less text collapses below the minimum.
        assert_eq!(
            reject("DRAW;TEXT;red;12;1;2;"),
            ValidationError::FieldCount {
                tool: "TEXT".to_string(),
                expected: Arity::AtLeast(7),
                found: 6,
            }
        );
    }

    // ------------------------------------------------------------------------
    // Segment tools
    // ------------------------------------------------------------------------

    #[test]
    fn test_segment_tools_accepted() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate("DRAW;PENCIL;red;2;0;0;10;10"),
            Ok(CommandKind::Draw {
                tool: "PENCIL",
                layout: ToolLayout::Segment,
            })
        );
        assert!(validator.is_valid("DRAW;LINE;#00ff00;5;-3;4;+7;2147483647"));
    }

    #[test]
    fn test_segment_field_count_exact() {
        assert_eq!(
            reject("DRAW;LINE;red;2;0;0;10"),
            ValidationError::FieldCount {
                tool: "LINE".to_string(),
                expected: Arity::Exactly(8),
                found: 7,
            }
        );
        assert!(!is_valid("DRAW;PENCIL;red;2;0;0;10;10;11"));
    }

    #[test]
    fn test_segment_non_integer_rejected() {
        for index in 3..8 {
            let mut fields = vec!["DRAW", "PENCIL", "red", "2", "0", "0", "10", "10"];
            fields[index] = "x";
            let line = fields.join(";");
            assert_eq!(
                reject(&line),
                ValidationError::NotAnInteger {
                    index,
                    value: "x".to_string(),
                },
                "line {line}"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Shape tools
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_shapes_accepted() {
        assert!(is_valid("DRAW;RECT;blue;1;10;20;30;40"));
        assert!(is_valid("DRAW;OVAL;blue;1;10;20;-30;-40"));
        assert!(!is_valid("DRAW;OVAL;blue;1;10;20;30"));
        assert!(!is_valid("DRAW;RECT;blue;1;10;20;30;4.5"));
    }

    #[test]
    fn test_extended_shapes_need_opt_in() {
        assert_eq!(
            reject("DRAW;HEXAGON;blue;1;10;20;30;40"),
            ValidationError::UnknownTool("HEXAGON".to_string())
        );

        let validator = Validator::with_shape_tools(
            DEFAULT_SHAPE_TOOLS.iter().chain(EXTENDED_SHAPE_TOOLS.iter()),
        );
        for tool in EXTENDED_SHAPE_TOOLS {
            let line = format!("DRAW;{tool};blue;1;10;20;30;40");
            assert!(validator.is_valid(&line), "{line}");
        }
        assert!(!validator.is_valid("DRAW;SQUARE;blue;1;10;20;30"));
    }

    #[test]
    fn test_reserved_tools_cannot_become_shapes() {
        let validator = Validator::with_shape_tools([" RECT ", "", "TEXT", "LINE"]);
        assert_eq!(validator.shape_tools(), vec!["RECT"]);
        // TEXT keeps its own layout.
        assert!(validator.is_valid("DRAW;TEXT;red;12;1;2;hi"));
    }

    #[test]
    fn test_shape_set_replaces_defaults() {
        let validator = Validator::with_shape_tools(["TRIANGLE"]);
        assert!(validator.is_valid("DRAW;TRIANGLE;red;1;0;0;5;5"));
        assert!(!validator.is_valid("DRAW;RECT;red;1;0;0;5;5"));
    }

    // ------------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------------

    #[test]
    fn test_text_accepted_with_any_content() {
        assert!(is_valid("DRAW;TEXT;red;12;100;200;hello"));
        assert!(is_valid("DRAW;TEXT;red;12;100;200;hello;with;semicolons"));
        assert!(is_valid("DRAW;TEXT;red;12;100;200;  spaced  "));
        assert!(is_valid("DRAW;TEXT;red;12;100;200;héllo wörld"));
    }

    #[test]
    fn test_text_requires_integer_position() {
        assert_eq!(
            reject("DRAW;TEXT;red;12;a;200;hello"),
            ValidationError::NotAnInteger {
                index: 4,
                value: "a".to_string(),
            }
        );
        assert!(!is_valid("DRAW;TEXT;red;12;100;b;hello"));
        assert!(!is_valid("DRAW;TEXT;red;big;100;200;hello"));
        assert!(!is_valid("DRAW;TEXT;red;12;100;200"));
    }

    // ------------------------------------------------------------------------
    // Draw prelude
    // ------------------------------------------------------------------------

    #[test]
    fn test_draw_requires_five_fields() {
        assert_eq!(
            reject("DRAW;PENCIL;red;2"),
            ValidationError::FieldCount {
                tool: "PENCIL".to_string(),
                expected: Arity::AtLeast(5),
                found: 4,
            }
        );
    }

    #[test]
    fn test_thickness_checked_before_tool() {
        assert_eq!(
            reject("DRAW;BRUSH;red;thick;0;0;1;1"),
            ValidationError::NotAnInteger {
                index: 3,
                value: "thick".to_string(),
            }
        );
        assert_eq!(
            reject("DRAW;BRUSH;red;2;0;0;1;1"),
            ValidationError::UnknownTool("BRUSH".to_string())
        );
    }

    #[test]
    fn test_integer_parsing_matches_i32() {
        assert!(is_valid("DRAW;LINE;red;-2147483648;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red;2147483648;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red;-2147483649;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red; 2;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red;2 ;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red;0x10;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red;-;0;0;1;1"));
        assert!(!is_valid("DRAW;LINE;red;+;0;0;1;1"));
        assert!(is_valid("DRAW;LINE;red;+2;0;0;1;1"));
        assert!(is_valid("DRAW;LINE;red;007;0;0;1;1"));
    }

    #[test]
    fn test_no_semantic_range_checks() {
        assert!(is_valid("DRAW;RECT;not-a-color;-50;-1;-1;-100;-100"));
    }

    #[test]
    fn test_accept_wraps_verbatim() {
        let command = Validator::default()
            .accept("DRAW;TEXT;red;12;1;2;a;b;")
            .expect("valid text");
        assert_eq!(command.as_str(), "DRAW;TEXT;red;12;1;2;a;b;");
    }

    #[test]
    fn test_error_display() {
        let err = ValidationError::FieldCount {
            tool: "RECT".to_string(),
            expected: Arity::Exactly(8),
            found: 9,
        };
        assert_eq!(err.to_string(), "RECT expects exactly 8 fields, found 9");

        let err = ValidationError::NotAnInteger {
            index: 5,
            value: "y".to_string(),
        };
        assert_eq!(err.to_string(), "field 5 is not a 32-bit integer: \"y\"");
    }
}
