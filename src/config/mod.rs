//! Configuration module

pub mod settings;

pub use settings::{
    GenerationDefaults, LoggingConfig, PipelineConfig, PipelineKind, ServerConfig, Settings,
};
