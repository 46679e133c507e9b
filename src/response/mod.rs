//! Response encoding - PNG serialization and base64 transport

pub mod base64;

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// Successful generate response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub image_base64: String,
}

/// Encode an image as PNG and wrap the bytes in base64
pub fn encode_png(image: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(base64::encode(&bytes))
}

/// Decode a base64 PNG string back into an image
pub fn decode_png(encoded: &str) -> Result<DynamicImage> {
    let bytes = base64::decode(encoded)?;
    if image::guess_format(&bytes).ok() != Some(ImageFormat::Png) {
        return Err(AppError::InvalidRequest("Payload is not a PNG image".to_string()));
    }
    Ok(image::load_from_memory_with_format(&bytes, ImageFormat::Png)?)
}

impl GenerateResponse {
    /// Build a response body from an in-memory image
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        Ok(Self {
            image_base64: encode_png(image)?,
        })
    }
}
