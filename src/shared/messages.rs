//! Message types sent to API clients

use serde::{Deserialize, Serialize};

use crate::vision::Detection;

/// Reply to an upload request
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub results: Vec<Detection>,
}

/// Reply to a live frame
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LiveReply {
    /// Plates found in a sampled frame
    Results { frame: u64, results: Vec<Detection> },
    /// The frame could not be decoded or analyzed
    Error { detail: String },
}

/// Error body shared by every endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::PixelBox;

    #[test]
    fn test_live_reply_shapes() {
        let results = LiveReply::Results {
            frame: 5,
            results: vec![Detection {
                plate_text: "AB1234C".into(),
                bounds: PixelBox::new(1, 2, 30, 10),
                angle: 0.0,
                confidence: None,
                frame_index: Some(5),
            }],
        };
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["frame"], 5);
        assert_eq!(value["results"][0]["plate"], "AB1234C");

        let error = LiveReply::Error {
            detail: "bad frame".into(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({"detail": "bad frame"})
        );
    }
}
