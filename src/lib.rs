//! Text-to-image serving
//!
//! A small HTTP front end for a text-to-image pipeline: one `POST /generate`
//! route whose inferences are serialized behind a single lock, a `GET /health`
//! route, and a client for smoke-testing a running server.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;

use pipeline::{SerialPipeline, TextToImage};

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub pipeline: SerialPipeline,
}

impl AppState {
    pub fn new(settings: config::Settings, pipeline: Box<dyn TextToImage>) -> Self {
        Self {
            settings: Arc::new(settings),
            pipeline: SerialPipeline::new(pipeline),
        }
    }
}
