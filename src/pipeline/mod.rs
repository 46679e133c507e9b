//! Inference pipelines - the shared text-to-image resource and its lock

#[cfg(feature = "flux")]
pub mod flux;
pub mod serial;
pub mod stub;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{PipelineConfig, PipelineKind};
use crate::error::Result;

pub use serial::SerialPipeline;
pub use stub::StubPipeline;

/// A generate request after defaults have been applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Non-empty text prompt
    pub prompt: String,
    pub inference_steps: u32,
    pub guidance_scale: f64,
    pub max_sequence_length: usize,
}

/// A loaded model that turns a prompt into an image.
///
/// Implementations are not expected to tolerate concurrent calls; the server
/// only ever reaches them through [`SerialPipeline`].
pub trait TextToImage: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run inference. Blocks the calling thread until the image is ready.
    fn generate(&mut self, params: &GenerationParams) -> Result<DynamicImage>;
}

/// Build the pipeline selected by configuration
pub async fn load(config: &PipelineConfig) -> Result<Box<dyn TextToImage>> {
    info!(pipeline = %config.kind, "Loading pipeline");

    match config.kind {
        PipelineKind::Stub => Ok(Box::new(StubPipeline::from_config(config))),
        PipelineKind::Flux => load_flux(config).await,
    }
}

#[cfg(feature = "flux")]
async fn load_flux(config: &PipelineConfig) -> Result<Box<dyn TextToImage>> {
    let pipeline = flux::FluxPipeline::load(config).await?;
    Ok(Box::new(pipeline))
}

#[cfg(not(feature = "flux"))]
async fn load_flux(_config: &PipelineConfig) -> Result<Box<dyn TextToImage>> {
    Err(crate::error::AppError::Config(::config::ConfigError::Message(
        "pipeline.kind = \"flux\" requires building with the `flux` feature".to_string(),
    )))
}
