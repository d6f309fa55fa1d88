//! Property-Set Normalizer
//!
//! Turns `KEY=value` probe text (udevadm, `os-release` style files) into a
//! [`PropertySet`].

use crate::domain::ports::PropertySet;

/// Parse `KEY=value` lines.
///
/// - leading/trailing whitespace around keys and values is dropped
/// - the `E: ` record prefix of `udevadm info` database dumps is accepted
/// - one level of matching single or double quotes around a value is removed
/// - lines without `=` or with an empty key are ignored
/// - a later duplicate key replaces the earlier value
pub fn parse_properties(text: &str) -> PropertySet {
    let mut properties = PropertySet::new();

    for line in text.lines() {
        let line = line.trim();
        let line = line.strip_prefix("E:").map(str::trim_start).unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        properties.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    properties
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// First non-blank value among `keys`, trimmed.
pub fn first_non_empty<'a>(properties: &'a PropertySet, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| properties.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}
