use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, AnalysisOutcome, ClassifierService, HttpClassifierService, UploadedFile,
    Workflow, WorkflowEvent,
};
use shared::domain::ExplanationMethod;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Classify brain MRI scans and fetch visual explanations")]
struct Cli {
    /// Base URL of the classification service.
    #[arg(long)]
    api_url: Option<String>,
    /// Settings file; defaults to ./neuroscan.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predict one image and fetch its explanation.
    Analyze {
        path: PathBuf,
        #[arg(long, default_value = "gradcam")]
        method: ExplanationMethod,
        /// Where to write the decoded explanation image.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Predict several images one after another.
    Batch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show service status and supported labels.
    Health,
}

async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());
    let media_type = mime_guess::from_path(path).first().map(|mime| mime.to_string());
    Ok(UploadedFile::new(name, media_type, bytes))
}

async fn analyze(
    workflow: &Workflow,
    path: &Path,
    method: ExplanationMethod,
    out: Option<&Path>,
) -> Result<()> {
    workflow.initialize().await;
    workflow.upload(read_upload(path).await?)?;
    workflow.select_method(method).await;

    let outcome = workflow.analyze().await;
    let state = workflow.snapshot();
    if let Some(notice) = &state.notice {
        eprintln!("{notice}");
    }
    if let Some(prediction) = &state.prediction {
        println!("{}", serde_json::to_string_pretty(prediction)?);
    }

    if outcome != AnalysisOutcome::Completed {
        bail!(state
            .last_error
            .unwrap_or_else(|| "analysis did not complete".to_string()));
    }

    if let (Some(explanation), Some(out)) = (&state.explanation, out) {
        let image = explanation.decode_image()?;
        tokio::fs::write(out, image)
            .await
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!(method = %explanation.method, path = %out.display(), "wrote explanation image");
    }
    Ok(())
}

async fn batch(workflow: Workflow, paths: &[PathBuf]) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(read_upload(path).await?);
    }

    let mut events = workflow.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkflowEvent::BatchProgress(progress) => {
                    eprintln!("{}/{}", progress.done, progress.total);
                }
                WorkflowEvent::BatchFinished(_) => break,
                _ => {}
            }
        }
    });

    workflow.run_batch(files).await;
    let state = workflow.snapshot();
    // Closing the event channel ends the printer if no finish event arrived.
    drop(workflow);
    let _ = printer.await;

    println!("{}", serde_json::to_string_pretty(&state.batch_items)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref());
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    info!(api_url = %settings.api_base_url, "using classification service");

    match cli.command {
        Command::Analyze { path, method, out } => {
            let workflow = Workflow::from_settings(&settings)?;
            analyze(&workflow, &path, method, out.as_deref()).await?;
        }
        Command::Batch { paths } => {
            let workflow = Workflow::from_settings(&settings)?;
            batch(workflow, &paths).await?;
        }
        Command::Health => {
            let service =
                HttpClassifierService::new(settings.base_url()?, settings.request_timeout())?;
            let health = service.capabilities().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }
    Ok(())
}
