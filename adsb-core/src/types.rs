//! Shared types, error enum, and ICAO helpers for adsb-core.

use thiserror::Error;

/// All errors produced by adsb-core.
#[derive(Debug, Error)]
pub enum AdsbError {
    #[error("invalid SBS message: {0}")]
    InvalidMessage(String),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("unknown transmission type: {0}")]
    UnknownTransmissionType(String),
    #[error("invalid value for field '{field}': {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AdsbError>;

/// A `(lat, lon)` pair in decimal degrees.
pub type Position = (f64, f64);

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// Placeholder address some receivers emit for frames with no usable ICAO.
pub const INVALID_ICAO: &str = "000000";

/// True when `hex_ident` names a real aircraft.
///
/// dump1090 prefixes non-ICAO (TIS-B) addresses with `~`; those are kept.
pub fn is_valid_icao(hex_ident: &str) -> bool {
    !hex_ident.is_empty() && hex_ident != INVALID_ICAO
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_icao() {
        assert!(is_valid_icao("7C79B7"));
        assert!(is_valid_icao("~2A0011"));
        assert!(!is_valid_icao("000000"));
        assert!(!is_valid_icao(""));
    }

    #[test]
    fn test_error_display() {
        let err = AdsbError::InvalidField {
            field: "altitude",
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "invalid value for field 'altitude': abc");
    }
}
