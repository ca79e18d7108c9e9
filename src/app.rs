//! Application Coordinator
//!
//! Loads the configured models once per process and wires them into the
//! shared pipeline used by the CLI and the server.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::AppState;
use crate::config::{AppConfig, DetectorStrategy};
use crate::shared::{SharedAppState, SharedState};
use crate::vision::{
    CrnnRecognizer, ModelKind, ModelManager, ObjectDetector, PlatePipeline, TextRecognizer, YoloPlateDetector,
};

/// Main application coordinator
pub struct PlateReaderApp {
    /// Shared state for request handlers
    pub shared_state: SharedState,
    /// Pipeline shared by every request and stream
    pub pipeline: Arc<PlatePipeline>,
}

impl PlateReaderApp {
    /// Validate the configuration, fetch missing models and build the pipeline
    pub async fn load(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let models = ModelManager::new(&config.models)?;
        let threads = config.models.intra_threads;
        for (kind, available, size) in models.get_model_status() {
            debug!("{}: available={} size={:?}", kind.display_name(), available, size);
        }

        let recognizer_path = models.ensure_model(ModelKind::Recognizer).await?;
        let dictionary = models.dictionary_path();
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(
            CrnnRecognizer::load(&recognizer_path, dictionary.as_deref(), &config.models.recognizer, threads)
                .context("Failed to load plate recognizer")?,
        );

        let object_detector: Option<Arc<dyn ObjectDetector>> = match config.pipeline.detector_strategy {
            DetectorStrategy::Geometric => None,
            DetectorStrategy::Learned => {
                let detector_path = models.ensure_model(ModelKind::Detector).await?;
                Some(Arc::new(
                    YoloPlateDetector::load(&detector_path, &config.models.detector, threads)
                        .context("Failed to load plate detector")?,
                ))
            }
        };

        let pipeline = PlatePipeline::new(&config.pipeline, recognizer, object_detector)?;
        info!("Pipeline ready ({} detector)", pipeline.detector_name());

        Ok(Self {
            shared_state: SharedAppState::new(config).into_shared(),
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn config(&self) -> AppConfig {
        self.shared_state.read().config.clone()
    }

    /// Handler state for the HTTP server
    pub fn app_state(&self) -> AppState {
        AppState::new(self.pipeline.clone(), self.shared_state.clone())
    }
}
