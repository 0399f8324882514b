// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tool output parsers.
//!
//! Parsers are pure functions from a [`CommandOutput`] to a
//! [`ParseOutcome`]. They never fail past this boundary: output that cannot
//! be read in any tolerated format becomes [`ParseOutcome::Empty`] and a
//! warning is logged.

pub mod bluetoothctl;
pub mod brightness;
pub mod hyprctl;
pub mod nmcli;
pub mod pactl;
pub mod variables;

use crate::exec::CommandOutput;
use tracing::warn;

/// Result of parsing one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    /// The output was read successfully (possibly as an empty list).
    Parsed(T),
    /// The tool was unavailable or its output was unreadable.
    Empty,
}

impl<T> ParseOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Parsed(value) => ParseOutcome::Parsed(f(value)),
            ParseOutcome::Empty => ParseOutcome::Empty,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(value) => Some(value),
            ParseOutcome::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ParseOutcome::Empty)
    }
}

impl<T> From<Option<T>> for ParseOutcome<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => ParseOutcome::Parsed(v),
            None => ParseOutcome::Empty,
        }
    }
}

/// Stdout worth parsing.
///
/// `Some("")` means the tool succeeded with nothing to say; `None` means it
/// failed without output (typically a missing program).
pub(crate) fn usable_stdout(out: &CommandOutput) -> Option<&str> {
    if out.is_blank() {
        out.success().then_some("")
    } else {
        Some(out.stdout.as_str())
    }
}

/// Log a parse failure and degrade.
pub(crate) fn unreadable<T>(what: &str, out: &CommandOutput) -> ParseOutcome<T> {
    let first_line = out.stdout.lines().next().unwrap_or("").trim();
    warn!(
        "Could not parse {} output (exit {}): {:?}",
        what, out.exit_code, first_line
    );
    ParseOutcome::Empty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_stdout() {
        assert_eq!(usable_stdout(&CommandOutput::ok("x\n")), Some("x\n"));
        assert_eq!(usable_stdout(&CommandOutput::ok("  \n")), Some(""));
        assert_eq!(usable_stdout(&CommandOutput::not_found("pactl")), None);
    }

    #[test]
    fn test_outcome_helpers() {
        let parsed: ParseOutcome<Vec<u32>> = ParseOutcome::Parsed(vec![1]);
        assert_eq!(parsed.clone().map(|v| v.len()), ParseOutcome::Parsed(1));
        assert!(!parsed.is_empty());
        let empty: ParseOutcome<Vec<u32>> = None.into();
        assert!(empty.is_empty());
        assert_eq!(empty.unwrap_or_default(), Vec::<u32>::new());
    }
}
