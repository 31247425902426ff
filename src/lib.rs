pub mod analyzer;
pub mod chain;
pub mod detector;
pub mod headers;
pub mod metadata;
pub mod providers;
pub mod validation;


pub use analyzer::{EmailAnalysis, HeaderAnalyzer};
pub use chain::{extract_receiving_chain, parse_received_header, AuthResult, Hop};
pub use detector::{
    DetectionMethod, DetectionResult, EspDefinition, EspDetector, EspPattern, EspRegistry,
    MatchDetail, PatternKind,
};
pub use headers::{header_block, parse_headers, HeaderMap};
pub use metadata::{extract_metadata, Metadata};
pub use validation::{
    validate_detection, validate_receiving_chain, ChainValidation, DetectionValidation,
};
