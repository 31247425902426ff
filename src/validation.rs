//! Advisory validation over built chains and detection results.
//!
//! Warnings never change an outcome; they exist so callers can surface
//! quality concerns (missing timestamps, weak detections) alongside the
//! data itself.

use crate::chain::Hop;
use crate::detector::DetectionResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValidation {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Validate a receiving chain. Only an empty chain is invalid; everything
/// else is advisory.
pub fn validate_receiving_chain(chain: &[Hop]) -> ChainValidation {
    let mut validation = ChainValidation {
        is_valid: true,
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    if chain.is_empty() {
        validation.is_valid = false;
        validation.errors.push("No receiving chain found".to_string());
        return validation;
    }

    let missing_timestamps = chain.iter().filter(|hop| hop.timestamp.is_none()).count();
    if missing_timestamps > 0 {
        validation
            .warnings
            .push(format!("{missing_timestamps} hop(s) missing timestamps"));
    }

    let missing_servers = chain.iter().filter(|hop| hop.server.is_none()).count();
    if missing_servers > 0 {
        validation
            .warnings
            .push(format!("{missing_servers} hop(s) missing server information"));
    }

    // Chronological inversions stay warnings; whether they should ever be
    // hard errors is unresolved, so only the first one found is reported.
    for pair in chain.windows(2) {
        if let (Some(earlier), Some(later)) = (&pair[0].timestamp, &pair[1].timestamp) {
            if later < earlier {
                validation
                    .warnings
                    .push("Timestamps not in chronological order".to_string());
                break;
            }
        }
    }

    validation
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionValidation {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub confidence: u32,
}

/// Validate a detection result. Always valid; low-quality results only
/// collect warnings.
pub fn validate_detection(result: &DetectionResult) -> DetectionValidation {
    let mut validation = DetectionValidation {
        is_valid: true,
        warnings: Vec::new(),
        confidence: result.confidence,
    };

    if result.confidence < 30 {
        validation
            .warnings
            .push("Low confidence detection".to_string());
    }

    if result.indicators.is_empty() {
        validation.warnings.push("No indicators found".to_string());
    }

    if result.provider == "Unknown" {
        validation
            .warnings
            .push("ESP could not be identified".to_string());
    }

    validation
}
