//! Command-line front end for the classification service.
//!
//! Usage:
//! ```
//! img-classify info
//! img-classify classify --model resnet18 cat.jpg
//! img-classify upload --model mobilenet_v2 ~/Pictures/dog.png
//! ```
//!
//! Results are printed to stdout as JSON. Set `RUST_LOG=info` for progress logs.

use clap::{Parser, Subcommand};
use img_classify::prelude::*;
use std::path::PathBuf;
use tracing::{error, info};

/// Command-line arguments
#[derive(Parser)]
#[command(name = "img-classify")]
#[command(about = "Top-5 ImageNet classification with pretrained ONNX models")]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Image library directory, overriding the configuration
    #[arg(long, global = true)]
    image_dir: Option<PathBuf>,

    /// Directory holding `<model_id>.onnx` exports, overriding the configuration
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// ONNX Runtime intra-op threads per session
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available models and library images
    Info,
    /// Classify an image from the library
    Classify {
        /// Model id, e.g. resnet18
        #[arg(short, long)]
        model: String,
        /// File name of the image inside the library
        image_id: String,
    },
    /// Upload a local image and classify it
    Upload {
        /// Model id, e.g. resnet18
        #[arg(short, long)]
        model: String,
        /// Path of the image to upload
        path: PathBuf,
    },
}

fn load_config(args: &Args) -> ClassifyResult<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_json_file(path)?,
        None => ServiceConfig::new(),
    };
    if let Some(dir) = &args.image_dir {
        config = config.with_image_dir(dir);
    }
    if let Some(dir) = &args.models_dir {
        config = config.with_models_dir(dir);
    }
    if let Some(threads) = args.threads {
        config.inference.ort_session = config.inference.ort_session.with_intra_threads(threads);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = load_config(&args)?;
    let service = ClassificationService::start(config).await?;

    let output = run(&service, &args.command).await;
    // Pending upload dirs must go before the runtime exits.
    let drained = service.shutdown().await;
    info!("removed {drained} upload dirs on exit");

    println!("{}", output?);
    Ok(())
}

async fn run(
    service: &ClassificationService,
    command: &Command,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Info => serde_json::to_string_pretty(&service.info()?)?,
        Command::Classify { model, image_id } => {
            let result = service.classify_async(model, image_id).await;
            serde_json::to_string_pretty(&report(result)?)?
        }
        Command::Upload { model, path } => {
            let bytes = tokio::fs::read(path).await?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!("uploading '{}' ({} bytes)", path.display(), bytes.len());
            let upload = service.classify_upload(&bytes, &filename, model).await;
            serde_json::to_string_pretty(&report(upload.map(|upload| upload.result))?)?
        }
    };
    Ok(output)
}

/// Logs a failed classification and converts it into a message safe to show
/// callers. Internal failures keep their detail in the log only.
fn report(
    result: ClassifyResult<ClassificationResult>,
) -> Result<ClassificationResult, Box<dyn std::error::Error>> {
    result.map_err(|e| {
        if e.is_client_error() {
            error!("rejected request: {e}");
        } else {
            error!("classification failed: {e:?}");
        }
        e.public_message().into()
    })
}
