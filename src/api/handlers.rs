//! Request handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GenerationDefaults;
use crate::error::{AppError, Result};
use crate::pipeline::GenerationParams;
use crate::response::GenerateResponse;
use crate::AppState;

/// Body of `POST /generate`.
///
/// Deserialization never fails on field contents: hyperparameters that are
/// not usable positive numbers (or numeric strings) read as absent and fall
/// back to the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, deserialize_with = "lenient::prompt")]
    pub prompt: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::count",
        skip_serializing_if = "Option::is_none"
    )]
    pub inference_steps: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient::scale",
        skip_serializing_if = "Option::is_none"
    )]
    pub guidance_scale: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient::count",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_sequence_length: Option<usize>,
}

mod lenient {
    use super::*;

    fn positive_integer(value: &Value) -> Option<u64> {
        let n = match value {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<u64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= u64::MAX as f64)
                        .map(|f| f as u64)
                })
            }
            _ => None,
        };
        n.filter(|n| *n > 0)
    }

    fn positive_float(value: &Value) -> Option<f64> {
        let f = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        f.filter(|f| f.is_finite() && *f > 0.0)
    }

    /// Any integer type a positive count fits into
    pub fn count<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(positive_integer)
            .and_then(|n| T::try_from(n).ok()))
    }

    pub fn scale<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(positive_float))
    }

    /// Strings pass through; other values count as present when truthy
    pub fn prompt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => None,
            Some(Value::Array(a)) if a.is_empty() => None,
            Some(Value::Object(o)) if o.is_empty() => None,
            Some(other) => Some(other.to_string()),
        })
    }
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Fill in missing hyperparameters. Fails only when the prompt is missing or empty.
    pub fn into_params(self, defaults: &GenerationDefaults) -> Result<GenerationParams> {
        let prompt = match self.prompt {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => return Err(AppError::PromptRequired),
        };

        Ok(GenerationParams {
            prompt,
            inference_steps: self.inference_steps.unwrap_or(defaults.inference_steps),
            guidance_scale: self.guidance_scale.unwrap_or(defaults.guidance_scale),
            max_sequence_length: self
                .max_sequence_length
                .unwrap_or(defaults.max_sequence_length),
        })
    }
}

/// `POST /generate`: run one inference and return the image as base64 PNG
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<GenerateResponse>> {
    let request_id = Uuid::new_v4();

    let Json(body) = payload.map_err(|rejection| {
        warn!(%request_id, error = %rejection.body_text(), "Rejected generate request body");
        AppError::InvalidRequest(rejection.body_text())
    })?;
    if !body.is_object() {
        warn!(%request_id, "Generate request body is not a JSON object");
        return Err(AppError::InvalidRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }
    let request: GenerateRequest = serde_json::from_value(body)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let params = request.into_params(&state.settings.defaults).map_err(|e| {
        warn!(%request_id, "Generate request without prompt");
        e
    })?;

    info!(
        %request_id,
        pipeline = %state.pipeline.name(),
        prompt_len = params.prompt.len(),
        inference_steps = params.inference_steps,
        guidance_scale = params.guidance_scale,
        max_sequence_length = params.max_sequence_length,
        "Generating image"
    );

    let start = Instant::now();
    let image = state.pipeline.run(params).await.map_err(|e| {
        warn!(%request_id, error = %e, "Inference failed");
        e
    })?;
    let response = GenerateResponse::from_image(&image)?;

    info!(
        %request_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Image generated"
    );

    Ok(Json(response))
}

/// `GET /health`: liveness only, never waits on the pipeline lock
pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
