use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use segjob::cli::{Cli, Command, ImportArgs, ResidualArg, default_model_name};
use segjob::config::AppConfig;
use segjob::importer::{ImportOptions, import_mask};
use segjob::metadata::{model_info, suggested_parameters};
use segjob::orchestrator::{JobOrchestrator, ResidualDecision};
use segjob::runner::ProcessRunner;
use segjob::state_machine::{BaseModel, JobParams, JobRequest, JobResult, JobSpec, Mode};
use segjob::store::{FsImageStore, ImageRecord};
use segjob::ui::JobProgress;
use segjob::workspace::{Workspace, tif_files};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "segjob=debug" } else { "segjob=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;
    let store = Arc::new(FsImageStore::new(&cli.project));

    match cli.command {
        Command::Predict {
            images,
            model,
            resolution,
            threshold,
            class,
            import,
            json,
        } => {
            let suggested = suggested_parameters(&model);
            let request = JobRequest {
                mode: Some(Mode::Predict),
                images: select_images(&store, images)?,
                model_path: Some(model),
                resolution: Some(resolution.unwrap_or(suggested.resolution)),
                threshold: Some(threshold.unwrap_or(suggested.threshold)),
                target_class: Some(class),
                split: import.split,
                remove_existing: import.remove_existing,
                ..Default::default()
            };
            let result = run_job(&cli.project, &config, store, request, ResidualArg::Keep).await?;
            finish(result, json)
        }
        Command::Train {
            images,
            base_model,
            epochs,
            crop_class,
            foreground_class,
            name,
            on_residual,
            json,
        } => {
            let base = BaseModel::from(base_model);
            let request = JobRequest {
                mode: Some(Mode::Train),
                images: select_images(&store, images)?,
                base_model: Some(base.to_string()),
                epochs: Some(epochs),
                crop_class,
                foreground_class: Some(foreground_class),
                model_name: Some(name.unwrap_or_else(|| default_model_name(base, epochs))),
                ..Default::default()
            };
            let result = run_job(&cli.project, &config, store, request, on_residual).await?;
            finish(result, json)
        }
        Command::Run { file, on_residual } => {
            let request = read_request(&file)?;
            let result = run_job(&cli.project, &config, store, request, on_residual).await?;
            finish(result, true)
        }
        Command::LoadMask {
            mask,
            image,
            labels,
            import: ImportArgs { split, remove_existing },
        } => {
            let classes: BTreeMap<u16, String> = labels.into_iter().collect();
            let record = ImageRecord::new(image);
            let result = import_mask(
                store.as_ref(),
                &mask,
                &record,
                &classes,
                ImportOptions { split, remove_existing },
            )?;
            for (class, count) in &result.per_class {
                println!("{record}: {count} {class} annotation(s)");
            }
            for label in &result.empty_labels {
                println!("{record}: label {label} not present in mask");
            }
            Ok(())
        }
        Command::ModelInfo { model } => {
            match model_info(&model) {
                Ok(info) => {
                    println!("Metadata: {}", info.source.display());
                    let describe = |p: Option<segjob::metadata::BestParameters>| match p {
                        Some(p) => format!("threshold = {}; resolution = {}", p.threshold, p.resolution),
                        None => "no metadata found".to_string(),
                    };
                    println!("Model parameters:           {}", describe(info.model));
                    println!("Best checkpoint parameters: {}", describe(info.checkpoint));
                }
                Err(e) => println!("{e}"),
            }
            Ok(())
        }
        Command::Status => print_status(&cli.project, &config),
    }
}

/// Named images, or every image of the project when none are given.
fn select_images(store: &FsImageStore, images: Vec<String>) -> Result<Vec<String>> {
    if !images.is_empty() {
        return Ok(images);
    }
    let all = store
        .list_images()
        .with_context(|| format!("failed to list images in {}", store.root().display()))?;
    Ok(all.into_iter().map(|r| r.name().to_string()).collect())
}

fn read_request(path: &Path) -> Result<JobRequest> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let request = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?
    };
    Ok(request)
}

async fn run_job(
    project: &Path,
    config: &AppConfig,
    store: Arc<FsImageStore>,
    request: JobRequest,
    on_residual: ResidualArg,
) -> Result<JobResult> {
    let spec = JobSpec::new(request).context("invalid job")?;
    let epochs = match spec.params() {
        JobParams::Train(t) => Some(t.epochs),
        JobParams::Predict(_) => None,
    };
    let runner = ProcessRunner::new(config.runner.clone(), config.tool.clone());
    let orchestrator = JobOrchestrator::new(store, runner, project)
        .with_residual_policy(Arc::new(ResidualDecision::from(on_residual)));

    let progress = JobProgress::start(spec.mode(), spec.images().len(), epochs);
    let mut handle = orchestrator.submit(spec);
    let cancel = handle.cancellation_token();

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => progress.handle(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                tracing::warn!("Interrupt received, cancelling job");
                cancel.cancel();
            }
        }
    }

    let result = handle.join().await.context("job task failed")?;
    progress.complete(&result);
    if result.success() || result.outcome == segjob::state_machine::JobOutcome::Cancelled {
        Ok(result)
    } else {
        progress.print_result(&result);
        bail!("job {} failed", result.job_id)
    }
}

fn finish(result: JobResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(summary) = &result.artifacts.import {
        println!(
            "Imported {} annotation(s) on {} image(s), {} skipped",
            summary.annotations,
            summary.images,
            summary.skipped.len()
        );
    } else if let Some(model) = &result.artifacts.model_dir {
        println!("Model written to {}", model.display());
    }
    Ok(())
}

fn print_status(project: &Path, config: &AppConfig) -> Result<()> {
    let root = project.join(&config.tool.workspace_dir);
    if !root.is_dir() {
        println!("No workspace at {}", root.display());
        return Ok(());
    }
    let ws = Workspace::ensure(project, &config.tool.workspace_dir)?;
    println!("Workspace: {}", ws.training_root().display());
    for (label, dir) in [
        ("images", ws.images_dir()),
        ("masks", ws.masks_dir()),
        ("temp", ws.temp_dir()),
        ("predictions", ws.predictions_dir()),
    ] {
        println!("  {label:<12} {} .tif file(s)", tif_files(dir)?.len());
    }
    let split = ws.split_dirs();
    if split.is_empty() {
        println!("  split data   none");
    } else {
        for dir in split {
            println!("  split data   {}", dir.display());
        }
    }
    match config.runner.validate() {
        Ok(()) => println!("Runner: {} ({:?})", config.runner.executable, config.runner.environment),
        Err(e) => println!("Runner: {e}"),
    }
    Ok(())
}
