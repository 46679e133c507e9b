//! Main entry point for the text-to-image server

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use txt2img_serving::{
    api,
    config::{settings::DEFAULT_CONFIG_PATH, LoggingConfig, PipelineKind, Settings},
    pipeline, AppState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Text-to-image generation server")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Host address to bind the server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the server to
    #[arg(long)]
    port: Option<u16>,

    /// Pipeline to serve
    #[arg(long, value_enum)]
    pipeline: Option<PipelineKind>,
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Load configuration
    let mut settings = Settings::load_from_path(&args.config)?;
    settings.apply_overrides(args.host, args.port, args.pipeline);
    settings.validate()?;

    init_logging(&settings.logging);
    info!(
        "Loaded configuration: server={}:{} pipeline={}",
        settings.server.host, settings.server.port, settings.pipeline.kind
    );

    // Load the model once; every request shares it
    let pipeline = pipeline::load(&settings.pipeline).await?;

    let addr = settings.bind_address();
    let app_state = Arc::new(AppState::new(settings, pipeline));
    let app = api::routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
