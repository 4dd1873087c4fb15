use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, ValueHint};
use iocraft::prelude::*;
use mpup::{HttpTransport, S3ControlPlane, UploadOrchestrator, UploadProgress, UploadTarget};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::ui::{ErrorMessage, ProgressBar, SuccessMessage, UploadSummary};

mod config;
mod ui;

#[derive(Parser)]
#[command(name = "mpup")]
#[command(version)]
#[command(about = "Upload a file to S3 as a multipart upload")]
struct Cli {
    /// File to upload, stored under its file name
    #[arg(value_hint = ValueHint::FilePath)]
    target_file: PathBuf,
    /// Destination bucket
    #[arg(short, long)]
    bucket: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    if let Err(e) = rt.block_on(upload_file(cli)) {
        element!(ErrorMessage(message: format!("{:#}", e))).print();
        std::process::exit(1);
    }
    Ok(())
}

async fn upload_file(cli: Cli) -> Result<()> {
    let config = config::read_config()?;

    let key = cli
        .target_file
        .file_name()
        .ok_or_else(|| anyhow!("'{}' does not name a file", cli.target_file.display()))?
        .to_string_lossy()
        .into_owned();
    let target = UploadTarget::new(cli.bucket, key)?;

    let control_plane = S3ControlPlane::new(&config.s3).await;
    let mut orchestrator = UploadOrchestrator::new(control_plane, HttpTransport::new())
        .with_part_url_ttl(config.part_url_ttl);

    let (tx, rx) = watch::channel(UploadProgress::default());
    let mut progress_bar =
        element!(ProgressBar(title: format!("Uploading to {}", target), progress: Some(rx)));

    let upload = orchestrator.upload_file(&cli.target_file, target, &tx);
    tokio::pin!(upload);

    let result = tokio::select! {
        result = &mut upload => result,
        _ = progress_bar.render_loop() => upload.await,
    };

    let completed = result
        .with_context(|| format!("Failed to upload {}", cli.target_file.display()))?;

    element!(SuccessMessage(
        message: format!("Uploaded {}", cli.target_file.display())
    ))
    .print();
    element!(UploadSummary(upload: Some(completed))).print();

    Ok(())
}
