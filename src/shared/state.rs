//! Shared application state between request handlers

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use crate::config::AppConfig;

/// Handle to the state shared by every handler
pub type SharedState = Arc<RwLock<SharedAppState>>;

/// Central state shared by the server tasks
#[derive(Debug, Clone, Default)]
pub struct SharedAppState {
    /// Application configuration
    pub config: AppConfig,
    /// Runtime counters (not persisted)
    pub stats: ServiceStats,
}

impl SharedAppState {
    /// Create a new shared state with the given configuration
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            stats: ServiceStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}

/// Service counters reported by `/health`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    /// Uploaded images analyzed
    pub images_processed: u64,
    /// Uploaded videos analyzed
    pub videos_processed: u64,
    /// Live streams currently connected
    pub live_streams_active: u64,
    /// Live streams accepted since start-up
    pub live_streams_total: u64,
    /// Frames that went through the pipeline
    pub frames_analyzed: u64,
    /// Plates reported to clients
    pub detections_emitted: u64,
    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl ServiceStats {
    /// Count one analyzed frame and its plates
    pub fn record_frame(&mut self, detections: usize) {
        self.frames_analyzed += 1;
        self.detections_emitted += detections as u64;
    }

    pub fn live_stream_opened(&mut self) {
        self.live_streams_active += 1;
        self.live_streams_total += 1;
    }

    pub fn live_stream_closed(&mut self) {
        self.live_streams_active = self.live_streams_active.saturating_sub(1);
    }

    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}
