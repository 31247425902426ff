//! Built-in ESP provider definitions.
//!
//! Weights reflect how specific a signal is: a provider-private header like
//! `X-SG-EID` is near-certain (100), shared infrastructure hints like an IP
//! prefix are weak (60-80). Patterns are compiled case-insensitively by the
//! detector.

use crate::detector::{EspDefinition, EspPattern, PatternKind};

fn header(key: &str, pattern: &str, weight: u32) -> EspPattern {
    EspPattern {
        kind: PatternKind::Header,
        header_key: Some(key.to_string()),
        pattern: pattern.to_string(),
        weight,
    }
}

fn domain(pattern: &str, weight: u32) -> EspPattern {
    EspPattern {
        kind: PatternKind::Domain,
        header_key: None,
        pattern: pattern.to_string(),
        weight,
    }
}

fn ip(pattern: &str, weight: u32) -> EspPattern {
    EspPattern {
        kind: PatternKind::Ip,
        header_key: None,
        pattern: pattern.to_string(),
        weight,
    }
}

fn definition(provider: &str, patterns: Vec<EspPattern>) -> EspDefinition {
    EspDefinition {
        provider: provider.to_string(),
        patterns,
    }
}

pub fn builtin_definitions() -> Vec<EspDefinition> {
    vec![
        definition(
            "Gmail",
            vec![
                header("received", r"mail\.gmail\.com", 90),
                header("message-id", r"@gmail\.com", 95),
                header("x-google-smtp-source", r".+", 100),
                domain(r"gmail\.com$", 85),
                ip(r"^(74\.125\.|173\.194\.|209\.85\.|64\.233\.)", 80),
            ],
        ),
        definition(
            "Outlook/Hotmail",
            vec![
                header("received", r"outlook\.com|hotmail\.com|live\.com", 90),
                header("message-id", r"@(outlook|hotmail|live)\.com", 95),
                header("x-ms-exchange-organization", r".+", 85),
                domain(r"(outlook|hotmail|live)\.com$", 85),
                header("x-originating-ip", r".+", 70),
            ],
        ),
        definition(
            "Yahoo Mail",
            vec![
                header("received", r"yahoo\.com", 90),
                header("message-id", r"@yahoo\.com", 95),
                header("x-yahoo-smtp", r".+", 100),
                domain(r"yahoo\.com$", 85),
                header("x-rocket-received", r".+", 80),
            ],
        ),
        definition(
            "Amazon SES",
            vec![
                header("received", r"amazonses\.com", 95),
                header("x-ses-outgoing", r".+", 100),
                header("message-id", r"@amazonses\.com", 90),
                domain(r"amazonses\.com$", 85),
                ip(r"^(54\.|52\.|18\.)", 60),
            ],
        ),
        definition(
            "SendGrid",
            vec![
                header("received", r"sendgrid\.net", 95),
                header("x-sg-eid", r".+", 100),
                header("x-sg-id", r".+", 100),
                domain(r"sendgrid\.net$", 85),
            ],
        ),
        definition(
            "Mailgun",
            vec![
                header("received", r"mailgun\.org", 95),
                header("x-mailgun-sid", r".+", 100),
                header("message-id", r"@mailgun\.org", 90),
                domain(r"mailgun\.org$", 85),
            ],
        ),
        definition(
            "Zoho Mail",
            vec![
                header("received", r"zoho\.com", 90),
                header("message-id", r"@zoho\.com", 95),
                header("x-zoho-virus-status", r".+", 85),
                domain(r"zoho\.com$", 85),
            ],
        ),
        definition(
            "Mandrill",
            vec![
                header("received", r"mandrillapp\.com", 95),
                header("x-mandrill-user", r".+", 100),
                domain(r"mandrillapp\.com$", 85),
            ],
        ),
        definition(
            "Postmark",
            vec![
                header("received", r"postmarkapp\.com", 95),
                header("x-pm-message-id", r".+", 100),
                domain(r"postmarkapp\.com$", 85),
            ],
        ),
    ]
}
