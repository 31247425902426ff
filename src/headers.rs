//! Raw header block parsing.
//!
//! Mail headers are only loosely structured: every MTA folds, indents and
//! repeats headers slightly differently, so the parser here is deliberately
//! lenient. Malformed lines degrade to partial output instead of errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Multi-valued header map keyed by lowercase header name.
///
/// Values for a given name are kept in document order (top of the header
/// block first). Repeated headers are common and meaningful, most notably
/// the `Received` trace lines.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMap {
    entries: HashMap<String, Vec<String>>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`. The key is lowercased on insertion so
    /// the lowercase-key invariant holds no matter what callers pass.
    pub fn append(&mut self, name: &str, value: String) {
        self.entries
            .entry(name.to_lowercase())
            .or_default()
            .push(value);
    }

    /// All values for `name` (case-insensitive), in document order.
    pub fn get(&self, name: &str) -> Option<&Vec<String>> {
        self.entries.get(&name.to_lowercase())
    }

    /// First value for `name`, if present.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sorted header names, useful when debugging unfamiliar messages.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Slice a full raw message down to its header block: everything before the
/// first blank line. Input that is already just headers passes through.
pub fn header_block(raw: &str) -> &str {
    if let Some(idx) = raw.find("\r\n\r\n") {
        &raw[..idx]
    } else if let Some(idx) = raw.find("\n\n") {
        &raw[..idx]
    } else {
        raw
    }
}

/// Parse a raw header block into a [`HeaderMap`]. Never fails: empty or
/// malformed input yields an empty or partial map.
///
/// A line starting with whitespace continues the current header (unfolding
/// with a single space). Any other line closes out the current header and,
/// if it contains a colon past position zero, starts a new one. A line with
/// no colon resets the current header and silently drops whatever value was
/// being accumulated; real-world blocks contain enough stray separator lines
/// that treating this as an error would reject otherwise usable input.
pub fn parse_headers(raw: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, String)> = None;

    for line in raw.lines() {
        if line.starts_with([' ', '\t']) && current.is_some() {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            headers.append(&name, value.trim().to_string());
        }

        match line.find(':') {
            Some(idx) if idx > 0 => {
                let name = line[..idx].trim().to_lowercase();
                let value = line[idx + 1..].trim().to_string();
                current = Some((name, value));
            }
            _ => {
                log::debug!("skipping non-header line: {line:?}");
            }
        }
    }

    if let Some((name, value)) = current.take() {
        headers.append(&name, value.trim().to_string());
    }

    headers
}
