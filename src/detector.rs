//! ESP detection over parsed headers.
//!
//! A registry of provider definitions is scored against the header map,
//! extracted metadata and the sender address. Each definition carries a
//! handful of weighted regex patterns; matched weights are summed, clipped
//! to 100, and the best-scoring provider wins if it clears the acceptance
//! threshold. Anything weaker falls through to a heuristic "Unknown"
//! classification whose confidence is capped below the threshold, so the
//! two branches can never contradict each other.

use crate::headers::HeaderMap;
use crate::metadata::Metadata;
use crate::providers;
use anyhow::{bail, Context};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Minimum clipped score a provider definition must reach to be accepted.
const ACCEPT_THRESHOLD: u32 = 50;

/// Per-indicator confidence granted by the Unknown heuristic.
const UNKNOWN_INDICATOR_POINTS: u32 = 10;

/// Cap on Unknown-branch confidence; kept below [`ACCEPT_THRESHOLD`] so an
/// Unknown result can never outrank an accepted provider.
const UNKNOWN_CONFIDENCE_CAP: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Header,
    Domain,
    Ip,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternKind::Header => "header",
            PatternKind::Domain => "domain",
            PatternKind::Ip => "ip",
        };
        f.write_str(s)
    }
}

/// One weighted signal. `header_key` is required for `Header` patterns and
/// ignored for the other kinds; `weight` must sit in [1, 100].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EspPattern {
    pub kind: PatternKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_key: Option<String>,
    pub pattern: String,
    pub weight: u32,
}

/// A provider and its signal patterns. Pattern order is significant: the
/// reported detection method depends on it (see [`EspDetector::detect_esp`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EspDefinition {
    pub provider: String,
    pub patterns: Vec<EspPattern>,
}

/// Ordered collection of provider definitions. Registration order doubles
/// as the tie-break order when two providers score identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EspRegistry {
    pub definitions: Vec<EspDefinition>,
}

impl Default for EspRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EspRegistry {
    /// The built-in provider set (Gmail, Outlook/Hotmail, Yahoo Mail,
    /// Amazon SES, SendGrid, Mailgun, Zoho Mail, Mandrill, Postmark).
    pub fn builtin() -> Self {
        EspRegistry {
            definitions: providers::builtin_definitions(),
        }
    }

    pub fn empty() -> Self {
        EspRegistry {
            definitions: Vec::new(),
        }
    }

    /// Load additional definitions from a YAML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ESP registry file: {path}"))?;
        let registry: EspRegistry = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid ESP registry file: {path}"))?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write ESP registry file: {path}"))?;
        Ok(())
    }

    /// Check structural constraints: weights in [1, 100] and a header key on
    /// every header pattern. Regex validity is checked at compile time in
    /// [`EspDetector::new`].
    pub fn validate(&self) -> anyhow::Result<()> {
        for def in &self.definitions {
            validate_definition(def)?;
        }
        Ok(())
    }
}

fn validate_definition(def: &EspDefinition) -> anyhow::Result<()> {
    for pattern in &def.patterns {
        if pattern.weight == 0 || pattern.weight > 100 {
            bail!(
                "provider {:?}: pattern weight {} outside [1, 100]",
                def.provider,
                pattern.weight
            );
        }
        if pattern.kind == PatternKind::Header && pattern.header_key.is_none() {
            bail!(
                "provider {:?}: header pattern {:?} is missing header_key",
                def.provider,
                pattern.pattern
            );
        }
    }
    Ok(())
}

/// How the winning evidence was found. Serialized form is part of the
/// external contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    HeaderAnalysis,
    DomainLookup,
    IpAnalysis,
    AuthenticationRecords,
    Error,
}

/// One matched pattern, recorded for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub kind: PatternKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub provider: String,
    pub confidence: u32,
    pub detection_method: DetectionMethod,
    pub indicators: Vec<String>,
    pub details: Vec<MatchDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ScoredDefinition {
    total: u32,
    primary_method: DetectionMethod,
    indicators: Vec<String>,
    details: Vec<MatchDetail>,
}

/// ESP detector holding a registry snapshot and its pre-compiled patterns.
///
/// Detection takes `&self` and never mutates, so a detector can be shared
/// across threads freely; adding a definition takes `&mut self`, which gives
/// callers the read/write exclusion the registry needs.
pub struct EspDetector {
    registry: EspRegistry,
    compiled: HashMap<String, Regex>,
}

impl EspDetector {
    /// Build a detector over `registry`, validating it and pre-compiling
    /// every pattern. All patterns are matched case-insensitively.
    pub fn new(registry: EspRegistry) -> anyhow::Result<Self> {
        registry.validate()?;

        let mut compiled = HashMap::new();
        for def in &registry.definitions {
            for pattern in &def.patterns {
                compile_into(&mut compiled, &def.provider, &pattern.pattern)?;
            }
        }

        log::debug!(
            "ESP detector ready: {} provider(s), {} compiled pattern(s)",
            registry.definitions.len(),
            compiled.len()
        );
        Ok(EspDetector { registry, compiled })
    }

    /// Detector over the built-in provider registry.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::new(EspRegistry::builtin())
    }

    pub fn registry(&self) -> &EspRegistry {
        &self.registry
    }

    pub fn supported_providers(&self) -> Vec<&str> {
        self.registry
            .definitions
            .iter()
            .map(|def| def.provider.as_str())
            .collect()
    }

    /// Register an additional provider definition. Patterns are validated
    /// and compiled eagerly so later detections cannot hit a bad regex.
    pub fn add_definition(&mut self, definition: EspDefinition) -> anyhow::Result<()> {
        validate_definition(&definition)?;
        for pattern in &definition.patterns {
            compile_into(&mut self.compiled, &definition.provider, &pattern.pattern)?;
        }
        self.registry.definitions.push(definition);
        Ok(())
    }

    /// Score every registered provider and return the best match, falling
    /// back to the Unknown heuristic when nothing clears the threshold.
    ///
    /// Never fails: internal faults are converted into a zero-confidence,
    /// error-tagged Unknown result.
    pub fn detect_esp(
        &self,
        headers: &HeaderMap,
        metadata: &Metadata,
        from_address: &str,
    ) -> DetectionResult {
        match self.detect_inner(headers, metadata, from_address) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("ESP detection failed: {e:#}");
                DetectionResult {
                    provider: "Unknown".to_string(),
                    confidence: 0,
                    detection_method: DetectionMethod::Error,
                    indicators: Vec::new(),
                    details: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn detect_inner(
        &self,
        headers: &HeaderMap,
        metadata: &Metadata,
        from_address: &str,
    ) -> anyhow::Result<DetectionResult> {
        let mut results = Vec::new();

        for def in &self.registry.definitions {
            let scored = self.score_definition(def, headers, metadata, from_address)?;
            if scored.total > 0 {
                results.push(DetectionResult {
                    provider: def.provider.clone(),
                    confidence: scored.total.min(100),
                    detection_method: scored.primary_method,
                    indicators: scored.indicators,
                    details: scored.details,
                    error: None,
                });
            }
        }

        // Stable sort: equal scores keep registration order, so the
        // earliest-registered provider wins ties.
        results.sort_by(|a, b| b.confidence.cmp(&a.confidence));

        if let Some(best) = results.into_iter().next() {
            if best.confidence >= ACCEPT_THRESHOLD {
                log::debug!(
                    "detected ESP {:?} with confidence {}",
                    best.provider,
                    best.confidence
                );
                return Ok(best);
            }
        }

        Ok(self.detect_unknown(headers, from_address))
    }

    /// Sum the weights of all matching patterns for one definition.
    ///
    /// The primary method starts as header analysis and is overwritten by
    /// every matching domain or ip pattern, so the reported method is the
    /// kind of the last non-header pattern that matched, in declaration
    /// order. Callers observe this field; the overwrite order stays as-is
    /// even though it is not the strongest-signal attribution one might
    /// expect.
    fn score_definition(
        &self,
        def: &EspDefinition,
        headers: &HeaderMap,
        metadata: &Metadata,
        from_address: &str,
    ) -> anyhow::Result<ScoredDefinition> {
        let mut total = 0u32;
        let mut primary_method = DetectionMethod::HeaderAnalysis;
        let mut indicators = Vec::new();
        let mut details = Vec::new();

        for pattern in &def.patterns {
            let regex = match self.compiled.get(&pattern.pattern) {
                Some(regex) => regex,
                None => bail!(
                    "provider {:?}: pattern {:?} was never compiled",
                    def.provider,
                    pattern.pattern
                ),
            };

            let mut matched: Option<String> = None;
            match pattern.kind {
                PatternKind::Header => {
                    let key = pattern.header_key.as_deref().unwrap_or_default();
                    if let Some(values) = headers.get(key) {
                        for value in values {
                            if regex.is_match(value) {
                                matched = Some(value.clone());
                                break;
                            }
                        }
                    }
                }
                PatternKind::Domain => {
                    // Matched against the full address string, not an
                    // isolated domain.
                    if !from_address.is_empty() && regex.is_match(from_address) {
                        matched = Some(from_address.to_string());
                        primary_method = DetectionMethod::DomainLookup;
                    }
                }
                PatternKind::Ip => {
                    // Only the advertised originating IP counts; hop IPs
                    // from the receiving chain are ignored.
                    if let Some(ip) = &metadata.originating_ip {
                        if regex.is_match(ip) {
                            matched = Some(ip.clone());
                            primary_method = DetectionMethod::IpAnalysis;
                        }
                    }
                }
            }

            if let Some(value) = matched {
                total += pattern.weight;
                indicators.push(format!(
                    "{}:{}",
                    pattern.kind,
                    pattern.header_key.as_deref().unwrap_or("match")
                ));
                details.push(MatchDetail {
                    kind: pattern.kind,
                    key: pattern.header_key.clone(),
                    value,
                    weight: pattern.weight,
                });
            }
        }

        Ok(ScoredDefinition {
            total,
            primary_method,
            indicators,
            details,
        })
    }

    /// Heuristic classification for senders no definition recognizes.
    /// Confidence is 10 points per indicator, capped at 40, which keeps it
    /// strictly below the acceptance threshold.
    fn detect_unknown(&self, headers: &HeaderMap, from_address: &str) -> DetectionResult {
        let mut indicators = Vec::new();
        let mut detection_method = DetectionMethod::HeaderAnalysis;

        if !from_address.is_empty() {
            let domain_re = Regex::new(r"@([^>]+)").unwrap();
            if let Some(caps) = domain_re.captures(from_address) {
                indicators.push(format!("domain:{}", caps[1].to_lowercase()));
                detection_method = DetectionMethod::DomainLookup;
            }
        }

        // Sorted for determinism; the header map does not preserve key
        // insertion order.
        let mut custom_headers: Vec<&str> = headers
            .keys()
            .filter(|key| key.starts_with("x-") && !key.starts_with("x-received"))
            .collect();
        custom_headers.sort_unstable();
        for key in custom_headers {
            indicators.push(format!("custom_header:{key}"));
        }

        // Case-sensitive on purpose, unlike the pattern matching above.
        if let Some(received) = headers.get("received") {
            if received
                .iter()
                .any(|value| value.contains("mta") || value.contains("relay"))
            {
                indicators.push("mta_detected".to_string());
            }
        }

        let confidence =
            (indicators.len() as u32 * UNKNOWN_INDICATOR_POINTS).min(UNKNOWN_CONFIDENCE_CAP);

        log::debug!(
            "no provider cleared the threshold; Unknown with {} indicator(s)",
            indicators.len()
        );

        DetectionResult {
            provider: "Unknown".to_string(),
            confidence,
            detection_method,
            indicators,
            details: Vec::new(),
            error: None,
        }
    }
}

fn compile_into(
    cache: &mut HashMap<String, Regex>,
    provider: &str,
    pattern: &str,
) -> anyhow::Result<()> {
    if cache.contains_key(pattern) {
        return Ok(());
    }
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("provider {provider:?}: invalid pattern {pattern:?}"))?;
    cache.insert(pattern.to_string(), regex);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::parse_headers;
    use crate::metadata::extract_metadata;

    fn detector() -> EspDetector {
        EspDetector::builtin().unwrap()
    }

    fn detect(raw: &str, from: &str) -> DetectionResult {
        let headers = parse_headers(raw);
        let metadata = extract_metadata(&headers);
        detector().detect_esp(&headers, &metadata, from)
    }

    #[test]
    fn gmail_detected_from_headers_with_clipped_confidence() {
        // received (90) + x-google-smtp-source (100) = 190, clipped to 100.
        let raw = "Received: from mail-sor-f41.google.com by mail.gmail.com with ESMTPS; Mon, 15 Jan 2024 08:30:00 -0800\r\nX-Google-Smtp-Source: ABC123DEF456";
        let result = detect(raw, "");

        assert_eq!(result.provider, "Gmail");
        assert_eq!(result.confidence, 100);
        assert_eq!(result.detection_method, DetectionMethod::HeaderAnalysis);
        assert_eq!(
            result.indicators,
            vec!["header:received", "header:x-google-smtp-source"]
        );
        assert_eq!(result.details.len(), 2);
        assert!(result.error.is_none());
    }

    #[test]
    fn sendgrid_detected_from_sender_domain_alone() {
        let result = detect("Subject: invoice", "billing@sendgrid.net");

        assert_eq!(result.provider, "SendGrid");
        assert_eq!(result.confidence, 85);
        assert_eq!(result.detection_method, DetectionMethod::DomainLookup);
        assert_eq!(result.indicators, vec!["domain:match"]);
    }

    #[test]
    fn ip_patterns_only_consult_originating_ip() {
        // A Gmail-range IP in a received header must not count.
        let raw = "Received: from somewhere [74.125.0.1] by mx.example.org; Mon, 15 Jan 2024 08:30:00 -0800";
        let result = detect(raw, "user@unrelated.example");
        assert_ne!(result.provider, "Gmail");

        let raw = "X-Originating-IP: 74.125.0.1\r\nMessage-ID: <a@gmail.com>";
        let result = detect(raw, "");
        assert_eq!(result.provider, "Gmail");
        // message-id (95) + ip (80) = 175, clipped; last matching
        // non-header pattern was the ip one.
        assert_eq!(result.confidence, 100);
        assert_eq!(result.detection_method, DetectionMethod::IpAnalysis);
    }

    #[test]
    fn confidence_is_always_within_bounds() {
        let inputs = [
            ("Received: via mail.gmail.com; x\r\nX-Google-Smtp-Source: y\r\nMessage-ID: <z@gmail.com>", "user@gmail.com"),
            ("Subject: hi", "user@unknown-host.example"),
            ("", ""),
        ];
        for (raw, from) in inputs {
            let result = detect(raw, from);
            assert!(result.confidence <= 100);
        }
    }

    #[test]
    fn accepted_results_clear_threshold_and_unknown_stays_below() {
        let accepted = detect("Received: by mail.yahoo.com; x", "someone@yahoo.com");
        assert!(accepted.confidence >= 50);

        let unknown = detect("Subject: hi", "user@unknown-host.example");
        assert_eq!(unknown.provider, "Unknown");
        assert!(unknown.confidence <= 40);
    }

    #[test]
    fn below_threshold_score_falls_through_to_unknown() {
        let mut detector = EspDetector::new(EspRegistry::empty()).unwrap();
        detector
            .add_definition(EspDefinition {
                provider: "Weak".to_string(),
                patterns: vec![EspPattern {
                    kind: PatternKind::Domain,
                    header_key: None,
                    pattern: r"weak\.example$".to_string(),
                    weight: 45,
                }],
            })
            .unwrap();

        let headers = parse_headers("");
        let metadata = Metadata::default();
        let result = detector.detect_esp(&headers, &metadata, "user@weak.example");

        // 45 < 50: the definition matched but still loses to the threshold,
        // and the Unknown heuristic computes its own, independent score.
        assert_eq!(result.provider, "Unknown");
        assert_eq!(result.confidence, 10);
        assert_eq!(result.indicators, vec!["domain:weak.example"]);
        assert_eq!(result.detection_method, DetectionMethod::DomainLookup);
    }

    #[test]
    fn unknown_heuristic_extracts_domain_indicator() {
        let result = detect("Subject: hi", "user@unknown-host.example");

        assert_eq!(result.provider, "Unknown");
        assert_eq!(result.confidence, 10);
        assert_eq!(result.detection_method, DetectionMethod::DomainLookup);
        assert_eq!(result.indicators, vec!["domain:unknown-host.example"]);
    }

    #[test]
    fn unknown_heuristic_counts_custom_headers() {
        let raw = "X-Campaign-Id: 42\r\nX-Internal-Tag: beta\r\nX-Received: skip me\r\nSubject: hi";
        let result = detect(raw, "");

        assert_eq!(result.provider, "Unknown");
        assert_eq!(
            result.indicators,
            vec!["custom_header:x-campaign-id", "custom_header:x-internal-tag"]
        );
        assert_eq!(result.confidence, 20);
        assert_eq!(result.detection_method, DetectionMethod::HeaderAnalysis);
    }

    #[test]
    fn unknown_heuristic_flags_mta_once() {
        let raw = "Received: from mta1.bulk.example by mx; x\r\nReceived: from relay.bulk.example by mta1.bulk.example; y";
        let result = detect(raw, "");

        let count = result
            .indicators
            .iter()
            .filter(|i| i.as_str() == "mta_detected")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn mta_scan_is_case_sensitive() {
        let result = detect("Received: from MTA1.bulk.example by mx; x", "");
        assert!(!result.indicators.iter().any(|i| i == "mta_detected"));
    }

    #[test]
    fn unknown_confidence_caps_at_forty() {
        let raw = "X-A: 1\r\nX-B: 2\r\nX-C: 3\r\nX-D: 4\r\nX-E: 5\r\nX-F: 6";
        let result = detect(raw, "user@nowhere.example");
        assert_eq!(result.provider, "Unknown");
        assert_eq!(result.confidence, 40);
    }

    #[test]
    fn empty_input_yields_zero_indicator_unknown() {
        let result = detect("", "");
        assert_eq!(result.provider, "Unknown");
        assert_eq!(result.confidence, 0);
        assert_eq!(result.detection_method, DetectionMethod::HeaderAnalysis);
        assert!(result.indicators.is_empty());
    }

    #[test]
    fn domain_is_lowercased_and_angle_bracket_is_trimmed() {
        let result = detect("Subject: hi", "Some One <User@Mixed-Case.Example>");
        assert_eq!(result.indicators, vec!["domain:mixed-case.example"]);
    }

    #[test]
    fn ties_resolve_by_registration_order() {
        let mut detector = EspDetector::new(EspRegistry::empty()).unwrap();
        for provider in ["First", "Second"] {
            detector
                .add_definition(EspDefinition {
                    provider: provider.to_string(),
                    patterns: vec![EspPattern {
                        kind: PatternKind::Domain,
                        header_key: None,
                        pattern: r"tie\.example$".to_string(),
                        weight: 60,
                    }],
                })
                .unwrap();
        }

        let headers = parse_headers("");
        let metadata = Metadata::default();
        let result = detector.detect_esp(&headers, &metadata, "user@tie.example");
        assert_eq!(result.provider, "First");
        assert_eq!(result.confidence, 60);
    }

    #[test]
    fn detection_method_reflects_last_matching_non_header_pattern() {
        let mut detector = EspDetector::new(EspRegistry::empty()).unwrap();
        detector
            .add_definition(EspDefinition {
                provider: "OrderSensitive".to_string(),
                patterns: vec![
                    EspPattern {
                        kind: PatternKind::Ip,
                        header_key: None,
                        pattern: r"^198\.51\.".to_string(),
                        weight: 30,
                    },
                    EspPattern {
                        kind: PatternKind::Domain,
                        header_key: None,
                        pattern: r"ordersensitive\.example$".to_string(),
                        weight: 30,
                    },
                ],
            })
            .unwrap();

        let headers = parse_headers("");
        let metadata = Metadata {
            originating_ip: Some("198.51.100.7".to_string()),
            ..Metadata::default()
        };
        let result = detector.detect_esp(&headers, &metadata, "a@ordersensitive.example");

        // Both matched; the domain pattern is declared last, so it owns the
        // reported method.
        assert_eq!(result.provider, "OrderSensitive");
        assert_eq!(result.confidence, 60);
        assert_eq!(result.detection_method, DetectionMethod::DomainLookup);
    }

    #[test]
    fn invalid_weight_is_rejected() {
        let registry = EspRegistry {
            definitions: vec![EspDefinition {
                provider: "Bad".to_string(),
                patterns: vec![EspPattern {
                    kind: PatternKind::Domain,
                    header_key: None,
                    pattern: r"bad\.example$".to_string(),
                    weight: 0,
                }],
            }],
        };
        assert!(EspDetector::new(registry).is_err());
    }

    #[test]
    fn header_pattern_without_key_is_rejected() {
        let registry = EspRegistry {
            definitions: vec![EspDefinition {
                provider: "Bad".to_string(),
                patterns: vec![EspPattern {
                    kind: PatternKind::Header,
                    header_key: None,
                    pattern: r".+".to_string(),
                    weight: 50,
                }],
            }],
        };
        assert!(EspDetector::new(registry).is_err());
    }

    #[test]
    fn invalid_regex_is_rejected_at_construction() {
        let registry = EspRegistry {
            definitions: vec![EspDefinition {
                provider: "Bad".to_string(),
                patterns: vec![EspPattern {
                    kind: PatternKind::Domain,
                    header_key: None,
                    pattern: r"(unclosed".to_string(),
                    weight: 50,
                }],
            }],
        };
        assert!(EspDetector::new(registry).is_err());
    }

    #[test]
    fn registry_round_trips_through_yaml() {
        let registry = EspRegistry::builtin();
        let yaml = serde_yaml::to_string(&registry).unwrap();
        let parsed: EspRegistry = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(registry, parsed);
    }

    #[test]
    fn supported_providers_lists_builtins_in_order() {
        let detector = detector();
        let providers = detector.supported_providers();
        assert_eq!(providers.len(), 9);
        assert_eq!(providers[0], "Gmail");
        assert!(providers.contains(&"Postmark"));
    }
}
