//! Error taxonomy for the plate pipeline
//!
//! Set-up code (configuration, model loading, server start-up) uses `anyhow`.
//! The frame pipeline reports failures with [`PlateError`] so callers can tell a
//! bad input apart from a failing collaborator.

use thiserror::Error;

/// Errors raised while reading frames or analyzing them
#[derive(Debug, Error)]
pub enum PlateError {
    /// Unreadable image, video frame or live frame bytes
    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// Video file, camera or network source could not be opened
    #[error("failed to open video source {source_name}: {reason}")]
    Open { source_name: String, reason: String },

    /// Text recognizer invocation failed for one candidate
    #[error("text recognizer failed: {0}")]
    Recognizer(String),

    /// Object detector invocation failed for a frame
    #[error("object detector failed: {0}")]
    Detector(String),

    /// Frame violates the detector contract (zero area)
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PlateError {
    /// Build a decode error for the named input
    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        PlateError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an open error for the named source
    pub fn open(source_name: impl Into<String>, reason: impl ToString) -> Self {
        PlateError::Open {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error is caused by the caller's input rather than the service
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PlateError::Decode { .. } | PlateError::Open { .. } | PlateError::InvalidFrame(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_message() {
        let err = PlateError::decode("image 'car.jpg'", "unexpected end of file");
        assert_eq!(
            err.to_string(),
            "failed to decode image 'car.jpg': unexpected end of file"
        );
        assert!(err.is_input_error());
    }

    #[test]
    fn test_collaborator_errors_are_not_input_errors() {
        assert!(!PlateError::Recognizer("session poisoned".into()).is_input_error());
        assert!(!PlateError::Detector("bad output shape".into()).is_input_error());
    }
}
