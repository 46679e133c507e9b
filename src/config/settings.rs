//! Application settings and configuration management

use crate::error::{AppError, Result};
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub defaults: GenerationDefaults,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Which inference resource the server holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Sleeps, then returns a black image
    Stub,
    /// FLUX diffusion pipeline (requires the `flux` feature)
    Flux,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Stub => f.write_str("stub"),
            PipelineKind::Flux => f.write_str("flux"),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_kind")]
    pub kind: PipelineKind,
    /// Hugging Face model id, used by the flux pipeline
    #[serde(default = "default_model")]
    pub model: String,
    /// Force CPU inference even when an accelerator is available
    #[serde(default)]
    pub cpu: bool,
    #[serde(default = "default_image_size")]
    pub width: u32,
    #[serde(default = "default_image_size")]
    pub height: u32,
    #[serde(default = "default_stub_delay")]
    pub stub_delay_ms: u64,
}

fn default_pipeline_kind() -> PipelineKind {
    PipelineKind::Stub
}

fn default_model() -> String {
    "black-forest-labs/FLUX.1-schnell".to_string()
}

fn default_image_size() -> u32 {
    512
}

fn default_stub_delay() -> u64 {
    5000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kind: default_pipeline_kind(),
            model: default_model(),
            cpu: false,
            width: default_image_size(),
            height: default_image_size(),
            stub_delay_ms: default_stub_delay(),
        }
    }
}

/// Hyperparameters applied when a request leaves them out
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_inference_steps")]
    pub inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
}

fn default_inference_steps() -> u32 {
    60
}

fn default_guidance_scale() -> f64 {
    7.5
}

fn default_max_sequence_length() -> usize {
    512
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            inference_steps: default_inference_steps(),
            guidance_scale: default_guidance_scale(),
            max_sequence_length: default_max_sequence_length(),
        }
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::Config(::config::ConfigError::Message(message.into()))
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path = path
            .to_str()
            .ok_or_else(|| invalid(format!("Config path is not valid UTF-8: {:?}", path)))?;

        let config = Config::builder()
            // Load from configuration file
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefixed with TXT2IMG__)
            .add_source(
                Environment::with_prefix("TXT2IMG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(invalid(format!(
                "Invalid log format '{}'. Must be 'json' or 'pretty'",
                self.logging.format
            )));
        }

        let pipeline = &self.pipeline;
        if pipeline.width == 0 || pipeline.height == 0 {
            return Err(invalid("Image width and height must be positive"));
        }
        if pipeline.kind == PipelineKind::Flux && (pipeline.width % 16 != 0 || pipeline.height % 16 != 0) {
            return Err(invalid(format!(
                "Flux image size must be a multiple of 16, got {}x{}",
                pipeline.width, pipeline.height
            )));
        }

        let defaults = &self.defaults;
        if defaults.inference_steps == 0 || defaults.max_sequence_length == 0 {
            return Err(invalid("Default inference_steps and max_sequence_length must be positive"));
        }
        if !(defaults.guidance_scale > 0.0) {
            return Err(invalid("Default guidance_scale must be positive"));
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the file and environment layers
    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        port: Option<u16>,
        pipeline: Option<PipelineKind>,
    ) {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(kind) = pipeline {
            self.pipeline.kind = kind;
        }
    }

    /// Address the HTTP listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
