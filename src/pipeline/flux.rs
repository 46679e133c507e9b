//! FLUX text-to-image pipeline on candle

use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Module, VarBuilder};
use candle_transformers::models::{
    clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
    flux::{autoencoder::{self, AutoEncoder}, model::{self, Flux}, sampling},
    t5::{self, T5EncoderModel},
};
use hf_hub::api::tokio::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use image::{DynamicImage, ImageBuffer};
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use super::{GenerationParams, TextToImage};
use crate::config::PipelineConfig;
use crate::error::{AppError, Result};

const CLIP_MAX_TOKENS: usize = 77;
/// Longest T5 sequence the FLUX text path accepts
pub const T5_MAX_SEQUENCE_LENGTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxVariant {
    Schnell,
    Dev,
}

impl FluxVariant {
    /// Detect the variant from a model id, defaulting to schnell
    pub fn from_name(model: &str) -> Self {
        if model.to_uppercase().contains("DEV") {
            FluxVariant::Dev
        } else {
            FluxVariant::Schnell
        }
    }

    fn weights_file(self) -> &'static str {
        match self {
            FluxVariant::Schnell => "flux1-schnell.safetensors",
            FluxVariant::Dev => "flux1-dev.safetensors",
        }
    }
}

pub struct FluxPipeline {
    variant: FluxVariant,
    device: Device,
    dtype: DType,
    width: usize,
    height: usize,
    t5_model: T5EncoderModel,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
}

fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        warn!("No accelerator available, running on CPU; build with `--features cuda` or `--features metal`");
        Ok(Device::Cpu)
    }
}

fn load_error(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::ModelLoad(format!("failed to {}: {}", what, e))
}

async fn fetch(repo: &ApiRepo, file: &str) -> Result<PathBuf> {
    debug!(file, "Fetching model file");
    repo.get(file)
        .await
        .map_err(|e| load_error(&format!("fetch {}", file), e))
}

fn var_builder(file: PathBuf, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    // SAFETY: the weights are memory-mapped read-only and the hub cache is not
    // modified while the server runs.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[file], dtype, device)? };
    Ok(vb)
}

fn tokenizer(file: PathBuf, what: &str) -> Result<Tokenizer> {
    Tokenizer::from_file(file).map_err(|e| load_error(what, e))
}

fn tokenize(tokenizer: &Tokenizer, prompt: &str) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| AppError::Inference(format!("tokenization failed: {}", e)))?;
    Ok(encoding.get_ids().to_vec())
}

/// Pad or truncate T5 token ids to `max_sequence_length`, rejecting lengths
/// past what the encoder supports before anything is allocated.
fn pad_t5_tokens(mut tokens: Vec<u32>, max_sequence_length: usize) -> Result<Vec<u32>> {
    if max_sequence_length > T5_MAX_SEQUENCE_LENGTH {
        return Err(AppError::Inference(format!(
            "max_sequence_length must be at most {}, got {}",
            T5_MAX_SEQUENCE_LENGTH, max_sequence_length
        )));
    }
    tokens.resize(max_sequence_length, 0);
    Ok(tokens)
}

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        return Err(AppError::Inference(format!(
            "expected an image with 3 channels, got {}",
            channels
        )));
    }
    let pixels = img.permute((1, 2, 0))?.flatten_all()?.to_vec1::<u8>()?;
    let buffer = ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| AppError::Inference("error converting tensor to image buffer".to_string()))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

impl FluxPipeline {
    /// Download (or reuse cached) weights from the Hugging Face hub and load every model
    pub async fn load(config: &PipelineConfig) -> Result<Self> {
        let variant = FluxVariant::from_name(&config.model);
        let device = select_device(config.cpu)?;
        let dtype = device.bf16_default_to_f32();
        info!(model = %config.model, ?variant, ?device, ?dtype, "Loading FLUX pipeline");

        let api = Api::new().map_err(|e| load_error("create hub client", e))?;

        // T5 text encoder
        let t5_repo = api.repo(Repo::with_revision(
            "google/t5-v1_1-xxl".to_string(),
            RepoType::Model,
            "refs/pr/2".to_string(),
        ));
        let t5_vb = var_builder(fetch(&t5_repo, "model.safetensors").await?, dtype, &device)?;
        let t5_config_file = fetch(&t5_repo, "config.json").await?;
        let t5_config = std::fs::read_to_string(&t5_config_file)?;
        let t5_config: t5::Config = serde_json::from_str(&t5_config)
            .map_err(|e| load_error("parse T5 config", e))?;
        let t5_model = T5EncoderModel::load(t5_vb, &t5_config)?;
        let t5_tokenizer = tokenizer(
            fetch(
                &api.model("lmz/mt5-tokenizers".to_string()),
                "t5-v1_1-xxl.tokenizer.json",
            )
            .await?,
            "load T5 tokenizer",
        )?;

        // CLIP text encoder
        let clip_repo = api.repo(Repo::model("openai/clip-vit-large-patch14".to_string()));
        let clip_vb = var_builder(fetch(&clip_repo, "model.safetensors").await?, dtype, &device)?;
        let clip_config = ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: CLIP_MAX_TOKENS,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let clip_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)?;
        let clip_tokenizer = tokenizer(
            fetch(&clip_repo, "tokenizer.json").await?,
            "load CLIP tokenizer",
        )?;

        // Autoencoder and transformer
        let bf_repo = api.repo(Repo::model(config.model.clone()));
        let ae_vb = var_builder(fetch(&bf_repo, "ae.safetensors").await?, dtype, &device)?;
        let (ae_config, flux_config) = match variant {
            FluxVariant::Schnell => (autoencoder::Config::schnell(), model::Config::schnell()),
            FluxVariant::Dev => (autoencoder::Config::dev(), model::Config::dev()),
        };
        let autoencoder = AutoEncoder::new(&ae_config, ae_vb)?;
        let flux_vb = var_builder(fetch(&bf_repo, variant.weights_file()).await?, dtype, &device)?;
        let flux_model = Flux::new(&flux_config, flux_vb)?;

        info!(?variant, "FLUX pipeline ready");

        Ok(Self {
            variant,
            device,
            dtype,
            width: config.width as usize,
            height: config.height as usize,
            t5_model,
            t5_tokenizer,
            clip_model,
            clip_tokenizer,
            autoencoder,
            flux_model,
        })
    }
}

impl TextToImage for FluxPipeline {
    fn name(&self) -> &str {
        match self.variant {
            FluxVariant::Schnell => "flux-schnell",
            FluxVariant::Dev => "flux-dev",
        }
    }

    fn generate(&mut self, params: &GenerationParams) -> Result<DynamicImage> {
        let (width, height) = (self.width, self.height);

        let noise = sampling::get_noise(1, height, width, &self.device)?.to_dtype(self.dtype)?;

        let t5_tokens = pad_t5_tokens(
            tokenize(&self.t5_tokenizer, &params.prompt)?,
            params.max_sequence_length,
        )?;
        let t5_ids = Tensor::new(t5_tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let t5_emb = self.t5_model.forward(&t5_ids)?;

        let mut clip_tokens = tokenize(&self.clip_tokenizer, &params.prompt)?;
        clip_tokens.truncate(CLIP_MAX_TOKENS);
        let clip_ids = Tensor::new(clip_tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let clip_emb = self.clip_model.forward(&clip_ids)?;

        let state = sampling::State::new(&t5_emb, &clip_emb, &noise)?;
        let steps = params.inference_steps as usize;
        let timesteps = match self.variant {
            FluxVariant::Schnell => sampling::get_schedule(steps, None),
            FluxVariant::Dev => sampling::get_schedule(steps, Some((state.img.dim(1)?, 0.5, 1.15))),
        };
        debug!(steps, guidance = params.guidance_scale, "Denoising");

        let latent = sampling::denoise(
            &self.flux_model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            params.guidance_scale,
        )?;
        let unpacked = sampling::unpack(&latent, height, width)?;
        let decoded = self.autoencoder.decode(&unpacked)?;

        let img = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }
}
