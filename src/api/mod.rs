//! HTTP and WebSocket API
//!
//! - `POST /upload/`: multipart image or video upload
//! - `GET /live/`: WebSocket live frames
//! - `GET /health`: service counters

pub mod errors;
pub mod live;
pub mod server;
pub mod upload;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::shared::SharedState;
use crate::vision::PlatePipeline;

pub use errors::ApiError;
pub use server::{build_router, run_server};

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PlatePipeline>,
    pub shared: SharedState,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<PlatePipeline>, shared: SharedState) -> Self {
        Self {
            pipeline,
            shared,
            shutdown: CancellationToken::new(),
        }
    }
}
