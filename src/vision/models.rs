//! Model management for ONNX Runtime
//!
//! Handles locating, downloading, and loading of the plate detector and text
//! recognizer models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ModelsConfig;

/// Set to skip all network access for models
pub const OFFLINE_ENV: &str = "PLATE_READER_OFFLINE";

/// Model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// CRNN plate text recognizer
    Recognizer,
    /// YOLO-style plate detector
    Detector,
}

impl ModelKind {
    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Recognizer => "Plate Text Recognizer",
            ModelKind::Detector => "Plate Detector",
        }
    }
}

/// Where a model file lives and where it can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub filename: String,
    pub url: Option<String>,
    pub sha256: Option<String>,
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_kind: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: String,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    config: ModelsConfig,
}

impl ModelManager {
    /// Create a model manager for the configured (or default) directory
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let models_dir = match &config.dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        Self::with_dir(models_dir, config)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf, config: &ModelsConfig) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            config: config.clone(),
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// File name and download location of a model
    pub fn source(&self, kind: ModelKind) -> ModelSource {
        match kind {
            ModelKind::Recognizer => ModelSource {
                filename: self.config.recognizer.file.clone(),
                url: self.config.recognizer.url.clone(),
                sha256: self.config.recognizer.sha256.clone(),
            },
            ModelKind::Detector => ModelSource {
                filename: self.config.detector.file.clone(),
                url: self.config.detector.url.clone(),
                sha256: self.config.detector.sha256.clone(),
            },
        }
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(self.source(kind).filename)
    }

    /// Recognizer dictionary, when one is configured and present
    pub fn dictionary_path(&self) -> Option<PathBuf> {
        let name = self.config.recognizer.dictionary_file.as_ref()?;
        let path = self.models_dir.join(name);
        path.is_file().then_some(path)
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        std::fs::metadata(self.model_path(kind))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Availability and size of every model
    pub fn get_model_status(&self) -> Vec<(ModelKind, bool, Option<u64>)> {
        [ModelKind::Recognizer, ModelKind::Detector]
            .iter()
            .map(|&kind| {
                let size = std::fs::metadata(self.model_path(kind)).ok().map(|m| m.len());
                (kind, self.is_model_available(kind), size)
            })
            .collect()
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub async fn ensure_model(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.model_path(kind);

        if self.is_model_available(kind) {
            info!("Model {:?} already available at {:?}", kind, path);
            return Ok(path);
        }

        let source = self.source(kind);
        let Some(url) = source.url.as_deref() else {
            anyhow::bail!(
                "{} model not found at {:?} and no download url is configured",
                kind.display_name(),
                path
            );
        };

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", kind.display_name(), url);
        self.download_file_async(url, &path, source.sha256.as_deref()).await?;

        if !self.is_model_available(kind) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(kind)?;

        info!("Successfully downloaded {} model", kind.display_name());
        Ok(path)
    }

    /// Async download implementation
    async fn download_file_async(&self, url: &str, path: &Path, expected_sha256: Option<&str>) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;

            file.write_all(&chunk).context("Failed to write to temp file")?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            debug!("{} / {:?} bytes", downloaded, total_size);
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected) = expected_sha256 {
            if !hash.eq_ignore_ascii_case(expected) {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!("Checksum mismatch for {:?}: expected {}, got {}", path, expected, hash);
            }
            info!("Checksum verified for {:?}", path);
        }

        std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;

        Ok(())
    }

    /// Update manifest after successful download
    fn update_manifest_for_model(&self, kind: ModelKind) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let path = self.model_path(kind);
        let data = std::fs::read(&path)?;
        let hash = format!("{:x}", Sha256::digest(&data));

        let model_info = ModelInfo {
            model_kind: format!("{:?}", kind),
            filename: self.source(kind).filename,
            size_bytes: data.len() as u64,
            sha256: Some(hash),
            downloaded_at: unix_timestamp(),
        };

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Name of the first model input
    pub fn first_input(&self) -> Result<&str> {
        self.input_names
            .first()
            .map(String::as_str)
            .context("Model declares no inputs")
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

/// Seconds since the Unix epoch as a string
fn unix_timestamp() -> String {
    use std::time::SystemTime;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    format!("{}", now)
}
