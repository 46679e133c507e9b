//! Placeholder pipeline: waits, then returns a black image

use image::{DynamicImage, RgbImage};
use std::time::Duration;
use tracing::debug;

use super::{GenerationParams, TextToImage};
use crate::config::PipelineConfig;
use crate::error::Result;

pub struct StubPipeline {
    width: u32,
    height: u32,
    delay: Duration,
}

impl StubPipeline {
    pub fn new(width: u32, height: u32, delay: Duration) -> Self {
        Self {
            width,
            height,
            delay,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.width,
            config.height,
            Duration::from_millis(config.stub_delay_ms),
        )
    }
}

impl TextToImage for StubPipeline {
    fn name(&self) -> &str {
        "stub"
    }

    fn generate(&mut self, params: &GenerationParams) -> Result<DynamicImage> {
        debug!(
            prompt_len = params.prompt.len(),
            delay_ms = self.delay.as_millis() as u64,
            "Stub inference"
        );
        std::thread::sleep(self.delay);
        // RgbImage::new zero-fills, which is black.
        Ok(DynamicImage::ImageRgb8(RgbImage::new(self.width, self.height)))
    }
}
