//! Smoke-test client: send one prompt to a running server and save the result

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use txt2img_serving::{api::GenerateRequest, client::GenerationClient, AppError};

const DEFAULT_PROMPT: &str = "Given this image style: A whimsical and richly detailed style inspired \
by classic storybook illustrations, combining realistic character rendering with a vibrant, \
fantastical color palette. Generate an image for the following description: a sunlit castle \
courtyard bustling with students saying goodbyes and packing for their summer vacations, \
rendered with warm lighting that evokes closure and anticipation for the year ahead.";

#[derive(Parser, Debug)]
#[command(author, version, about = "Send a test prompt to a text-to-image server")]
struct Args {
    /// Base URL of the server
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Prompt to generate
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    #[arg(long, default_value_t = 50)]
    inference_steps: u32,

    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f64,

    #[arg(long, default_value_t = 512)]
    max_sequence_length: usize,

    /// Where to write the decoded PNG
    #[arg(long, short, default_value = "generated.png")]
    output: PathBuf,
}

/// True once the server answered, whatever the status or body
fn got_response<T>(result: &Result<T, AppError>) -> bool {
    !matches!(result, Err(AppError::HttpClient(e)) if e.is_request())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let client = GenerationClient::new(&args.url)?;

    let request = GenerateRequest {
        prompt: Some(args.prompt),
        inference_steps: Some(args.inference_steps),
        guidance_scale: Some(args.guidance_scale),
        max_sequence_length: Some(args.max_sequence_length),
    };

    let start = Instant::now();
    let result = client.generate(&request).await;
    if got_response(&result) {
        println!(
            "Request sent. Time taken: {:.2} seconds",
            start.elapsed().as_secs_f64()
        );
    }

    match result {
        Ok(image) => {
            image.save(&args.output)?;
            println!(
                "Saved {}x{} image to {}",
                image.width(),
                image.height(),
                args.output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(AppError::MissingImage) => {
            println!("Error: Image data not found in response.");
            Ok(ExitCode::FAILURE)
        }
        Err(e @ AppError::Server { .. }) => {
            println!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
