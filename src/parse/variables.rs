// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parser for the compositor variables file (`$name = value` lines).

use super::{usable_stdout, ParseOutcome};
use crate::exec::CommandOutput;
use regex::Regex;
use shellsync_ipc::ConfigVariable;
use std::sync::OnceLock;

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$").expect("static regex")
    })
}

/// Whether `name` can be used as a variable name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Parse every `$name = value` assignment in file order.
///
/// Later assignments of the same name override earlier ones but keep the
/// original position.
pub fn parse_variables(out: &CommandOutput) -> ParseOutcome<Vec<ConfigVariable>> {
    let Some(text) = usable_stdout(out) else {
        return ParseOutcome::Empty;
    };

    let mut variables: Vec<ConfigVariable> = Vec::new();
    for caps in text.lines().filter_map(|l| assignment_re().captures(l)) {
        let name = caps[1].to_string();
        let value = caps[2].to_string();
        match variables.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.value = value,
            None => variables.push(ConfigVariable { name, value }),
        }
    }
    ParseOutcome::Parsed(variables)
}
