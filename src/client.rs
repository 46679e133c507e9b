//! HTTP client for smoke-testing a running server

use image::DynamicImage;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::api::GenerateRequest;
use crate::error::{AppError, Result};
use crate::response::decode_png;

/// Raw success body; tolerant of a missing image so the caller can report it
#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    image_base64: Option<String>,
}

pub struct GenerationClient {
    client: Client,
    base_url: String,
}

impl GenerationClient {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:5000`)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Inference has no server-side timeout, so none is set here either.
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `GET /health`, returning the body text
    pub async fn health(&self) -> Result<String> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// `POST /generate` and decode the returned PNG
    pub async fn generate(&self, request: &GenerateRequest) -> Result<DynamicImage> {
        let url = format!("{}/generate", self.base_url);
        debug!(url = %url, "Sending generate request");

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body: ApiGenerateResponse = response.json().await?;
        let encoded = body.image_base64.ok_or(AppError::MissingImage)?;
        decode_png(&encoded)
    }
}
