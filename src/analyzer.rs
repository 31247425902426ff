//! Pipeline orchestration: raw header block + sender address in, complete
//! analysis record out.

use crate::chain::{extract_receiving_chain, Hop};
use crate::detector::{DetectionResult, EspDetector};
use crate::headers::{parse_headers, HeaderMap};
use crate::metadata::{extract_metadata, Metadata};
use serde::{Deserialize, Serialize};

/// Everything the pipeline produces for one message, as plain serializable
/// data. `success`/`error` are part of the caller contract: parsing
/// degrades to partial output instead of failing, so `success` reports the
/// pipeline outcome rather than an exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAnalysis {
    pub headers: HeaderMap,
    pub receiving_chain: Vec<Hop>,
    pub metadata: Metadata,
    pub detection: DetectionResult,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the full pipeline against an owned detector. Construct one per
/// registry snapshot; `analyze` is `&self` and safe to call concurrently.
pub struct HeaderAnalyzer {
    detector: EspDetector,
}

impl HeaderAnalyzer {
    pub fn new(detector: EspDetector) -> Self {
        HeaderAnalyzer { detector }
    }

    /// Analyzer over the built-in provider registry.
    pub fn builtin() -> anyhow::Result<Self> {
        Ok(HeaderAnalyzer {
            detector: EspDetector::builtin()?,
        })
    }

    pub fn detector(&self) -> &EspDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut EspDetector {
        &mut self.detector
    }

    /// Run parse → chain → metadata → detection. `raw_headers` is the
    /// header block only (see [`crate::headers::header_block`] for slicing a
    /// full message); `from_address` is the sender as a plain string and is
    /// not re-parsed from the headers.
    pub fn analyze(&self, raw_headers: &str, from_address: &str) -> EmailAnalysis {
        let headers = parse_headers(raw_headers);
        let receiving_chain = extract_receiving_chain(&headers);
        let metadata = extract_metadata(&headers);
        let detection = self.detector.detect_esp(&headers, &metadata, from_address);

        log::info!(
            "analyzed message: {} header(s), {} hop(s), ESP {:?} ({}%)",
            headers.len(),
            receiving_chain.len(),
            detection.provider,
            detection.confidence
        );

        EmailAnalysis {
            headers,
            receiving_chain,
            metadata,
            detection,
            success: true,
            error: None,
        }
    }
}
