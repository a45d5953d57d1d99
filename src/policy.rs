//! Ambient helper for the `key=value` policy file format (spec §6:
//! "Policy files are plain UTF-8 with line format `key=value`").
//!
//! Reading `general.policy`/`brokerstate.policy`/`topicauth.policy` off
//! disk is outside the core's scope (spec §1 Non-goals); this module only
//! owns the line-format grammar so callers that do own file I/O hand the
//! core typed values instead of raw text.

use std::collections::HashMap;

/// Parses `key=value` lines, skipping blank lines and `#`-prefixed
/// comments. Later duplicate keys overwrite earlier ones. Whitespace
/// around `key` and `value` is trimmed; the value itself is taken verbatim
/// otherwise (no quoting, no escapes).
pub fn parse_kv_lines(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}
