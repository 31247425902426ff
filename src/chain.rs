//! Receiving chain reconstruction from `Received` trace headers.
//!
//! MTAs prepend their `Received` line as a message passes through, so the
//! top of the header block is the newest hop. The builder walks the stored
//! values in reverse to recover chronological transit order.
//!
//! There is no formal grammar behind a `Received` line; every MTA writes it
//! a little differently. Each field below is extracted by its own
//! best-effort rule so drift in one MTA's format cannot break the others.

use crate::headers::HeaderMap;
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Whether the relaying MTA recorded the session as authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthResult {
    Authenticated,
    Unauthenticated,
}

/// One relay event in a message's path. `order` runs 1..=N with 1 being the
/// origin hop; every other field is independently optional — a hop that
/// yields nothing extractable is still a hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub order: u32,
    pub server: Option<String>,
    pub ip: Option<String>,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub protocol: Option<String>,
    pub encryption: Option<String>,
    pub auth_result: Option<AuthResult>,
}

/// Build the ordered receiving chain from the `received` values in
/// `headers`. The stored list is newest-first, so it is processed in
/// reverse and hops are numbered from 1 (oldest) upward.
pub fn extract_receiving_chain(headers: &HeaderMap) -> Vec<Hop> {
    let received = match headers.get("received") {
        Some(values) => values,
        None => return Vec::new(),
    };

    let mut chain = Vec::with_capacity(received.len());
    for value in received.iter().rev() {
        let order = chain.len() as u32 + 1;
        chain.push(parse_received_header(value, order));
    }

    log::debug!("built receiving chain with {} hop(s)", chain.len());
    chain
}

/// Parse a single `Received` value into a hop record. Every extraction rule
/// is best-effort; fields that cannot be recovered stay unset.
pub fn parse_received_header(received: &str, order: u32) -> Hop {
    Hop {
        order,
        server: extract_server(received),
        ip: extract_ip(received),
        timestamp: extract_timestamp(received),
        protocol: extract_protocol(received),
        encryption: extract_encryption(received),
        auth_result: extract_auth_result(received),
    }
}

/// First token after the literal `from`, stopping at whitespace, `[` or `(`.
fn extract_server(received: &str) -> Option<String> {
    let re = Regex::new(r"(?i)from\s+([^\s\[\(]+)").unwrap();
    re.captures(received)
        .map(|caps| caps[1].to_string())
}

/// First IPv4 dotted quad enclosed in square brackets.
fn extract_ip(received: &str) -> Option<String> {
    let re = Regex::new(r"\[([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3})\]").unwrap();
    re.captures(received)
        .map(|caps| caps[1].to_string())
}

/// Everything after the final semicolon is the MTA's date stamp. Parsed as
/// RFC 2822 after stripping a trailing comment like `(UTC)`; anything the
/// parser rejects leaves the timestamp unset rather than failing the hop.
fn extract_timestamp(received: &str) -> Option<DateTime<FixedOffset>> {
    let fragment = received.rsplit_once(';').map(|(_, rest)| rest.trim())?;
    if fragment.is_empty() {
        return None;
    }

    let candidate = match fragment.rsplit_once('(') {
        Some((before, after)) if after.ends_with(')') => before.trim_end(),
        _ => fragment,
    };

    match DateTime::parse_from_rfc2822(candidate) {
        Ok(ts) => Some(ts),
        Err(e) => {
            log::debug!("unparsable received timestamp {fragment:?}: {e}");
            None
        }
    }
}

/// Token after the literal `with`, upper-cased (ESMTP, ESMTPS, SMTP, ...).
fn extract_protocol(received: &str) -> Option<String> {
    let re = Regex::new(r"(?i)with\s+([A-Za-z]+)").unwrap();
    re.captures(received)
        .map(|caps| caps[1].to_uppercase())
}

/// STARTTLS is checked first: the plain TLS/SSL scan would match inside it.
fn extract_encryption(received: &str) -> Option<String> {
    if received.contains("STARTTLS") {
        Some("STARTTLS".to_string())
    } else if received.contains("TLS") || received.contains("SSL") {
        Some("TLS/SSL".to_string())
    } else {
        None
    }
}

/// `unauthenticated` is checked first: it contains `authenticated` as a
/// substring, so the reversed order would never report an unauthenticated
/// session.
fn extract_auth_result(received: &str) -> Option<AuthResult> {
    if received.contains("unauthenticated") {
        Some(AuthResult::Unauthenticated)
    } else if received.contains("authenticated") {
        Some(AuthResult::Authenticated)
    } else {
        None
    }
}
