// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parser for `brightnessctl get` / `brightnessctl max`.

use super::{unreadable, usable_stdout, ParseOutcome};
use crate::exec::CommandOutput;

/// Parse a single raw brightness value.
pub fn parse_raw(out: &CommandOutput) -> ParseOutcome<u32> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };
    match text.trim().parse::<u32>() {
        Ok(value) => ParseOutcome::Parsed(value),
        Err(_) => unreadable("brightnessctl", out),
    }
}
