//! Image and video upload endpoint

use axum::extract::{Multipart, State};
use axum::Json;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::errors::ApiError;
use super::AppState;
use crate::capture::{decode_image_bytes, iterate_video};
use crate::shared::{SharedState, UploadResponse};
use crate::stream::process_video;
use crate::vision::{Detection, PlatePipeline};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "gif"];

/// How an upload is processed, decided by its file extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    /// Lower-cased extension kept for the scratch file
    Video(String),
}

impl UploadKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(UploadKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(UploadKind::Video(ext))
        } else {
            None
        }
    }
}

/// `POST /upload/` with a multipart `file` field
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Upload has no filename"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;
    let kind = UploadKind::from_filename(&filename).ok_or_else(|| {
        ApiError::bad_request("Unsupported file type. Please upload an image or video file.")
    })?;

    info!("Upload {:?} ({} bytes, {:?})", filename, bytes.len(), kind);
    let start = Instant::now();

    let pipeline = state.pipeline.clone();
    let shared = state.shared.clone();
    let result = tokio::task::spawn_blocking(move || match kind {
        UploadKind::Image => analyze_image(&pipeline, &shared, &bytes),
        UploadKind::Video(ext) => analyze_video(&pipeline, &shared, &bytes, &ext),
    })
    .await
    .map_err(ApiError::from)
    .and_then(|r| r);

    let results = match result {
        Ok(results) => results,
        Err(e) => {
            state.shared.write().stats.set_error(e.detail.clone());
            return Err(e);
        }
    };

    debug!("Upload {:?}: {} plates in {:?}", filename, results.len(), start.elapsed());
    Ok(Json(UploadResponse { filename, results }))
}

fn analyze_image(pipeline: &PlatePipeline, shared: &SharedState, bytes: &[u8]) -> Result<Vec<Detection>, ApiError> {
    let frame = decode_image_bytes(bytes)?;
    let detections = pipeline.analyze_frame(&frame)?;

    let mut state = shared.write();
    state.stats.images_processed += 1;
    state.stats.record_frame(detections.len());
    Ok(detections)
}

fn analyze_video(
    pipeline: &PlatePipeline,
    shared: &SharedState,
    bytes: &[u8],
    ext: &str,
) -> Result<Vec<Detection>, ApiError> {
    // Deleted when dropped, after the decoder has been released
    let mut scratch = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!(".{}", ext))
        .tempfile()?;
    scratch.write_all(bytes)?;
    scratch.flush()?;

    let interval = shared.read().config.pipeline.video_sample_interval;
    let frames = iterate_video(scratch.path())?;

    let mut results = Vec::new();
    process_video(pipeline, frames, interval, |_, detections| {
        shared.write().stats.record_frame(detections.len());
        results.extend_from_slice(detections);
    })?;

    shared.write().stats.videos_processed += 1;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_kind() {
        assert_eq!(UploadKind::from_filename("car.JPG"), Some(UploadKind::Image));
        assert_eq!(UploadKind::from_filename("a.b.webp"), Some(UploadKind::Image));
        assert_eq!(
            UploadKind::from_filename("dashcam.MKV"),
            Some(UploadKind::Video("mkv".to_string()))
        );
        assert_eq!(UploadKind::from_filename("notes.txt"), None);
        assert_eq!(UploadKind::from_filename("noextension"), None);
    }
}
