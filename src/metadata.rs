//! Auxiliary header metadata used by ESP detection and reporting.

use crate::headers::HeaderMap;
use serde::{Deserialize, Serialize};

/// Fixed set of auxiliary fields copied straight out of the header map.
/// Values are not validated or transformed; absence of a header leaves the
/// field unset.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub spf: Option<String>,
    pub dkim: Vec<String>,
    pub authentication_results: Vec<String>,
    pub return_path: Option<String>,
    pub message_id: Option<String>,
    pub originating_ip: Option<String>,
    pub mailer: Option<String>,
    pub user_agent: Option<String>,
    pub priority: Option<String>,
    pub content_type: Option<String>,
}

pub fn extract_metadata(headers: &HeaderMap) -> Metadata {
    Metadata {
        spf: headers.first("received-spf").map(str::to_string),
        dkim: headers.get("dkim-signature").cloned().unwrap_or_default(),
        authentication_results: headers
            .get("authentication-results")
            .cloned()
            .unwrap_or_default(),
        return_path: headers.first("return-path").map(str::to_string),
        message_id: headers.first("message-id").map(str::to_string),
        originating_ip: headers.first("x-originating-ip").map(str::to_string),
        mailer: headers.first("x-mailer").map(str::to_string),
        user_agent: headers.first("user-agent").map(str::to_string),
        priority: headers.first("x-priority").map(str::to_string),
        content_type: headers.first("content-type").map(str::to_string),
    }
}
