//! Demo driver for `framesync`.
//!
//! `framesync run` pumps a [`FrameLoop`] on the main thread while a pool of
//! async workers reaches into it: probing the owner thread, building scene
//! objects, running counted coroutines, and canceling an endless one.
//! `framesync config` prints the effective loop configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use framesync_core::{CancellationToken, OwnerContext, Step, StepResult};
use framesync_loop::{FrameLoop, LoopConfig, LoopHost, Prefab, Scene};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "framesync",
    version,
    about = "Drive a frame loop from worker threads"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the frame loop with a pool of workers dispatching into it.
    Run {
        /// Maximum number of frames to run.
        #[arg(long, default_value_t = 600)]
        frames: u64,

        /// Number of concurrent workers.
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Path to a TOML file with a `[loop]` table.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective loop configuration.
    Config {
        /// Path to a TOML file with a `[loop]` table.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    match cli.command {
        Commands::Run {
            frames,
            workers,
            config,
        } => cmd_run(frames, workers, config.as_deref()),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

/// What one worker saw.
#[derive(Debug, Default)]
struct WorkerReport {
    index: usize,
    ran_on_owner: bool,
    objects: usize,
    coroutine_steps: u32,
    canceled: bool,
}

fn cmd_run(frames: u64, workers: usize, config: Option<&Path>) -> Result<()> {
    if workers == 0 {
        bail!("--workers must be at least 1");
    }
    let config = load_config(config)?;

    // The loop must be created on the thread that pumps it.
    let mut frame_loop = FrameLoop::new(config);
    frame_loop
        .install_global()
        .context("failed to install the owner context")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("framesync-worker")
        .enable_all()
        .build()
        .context("failed to build the worker runtime")?;

    let handles: Vec<_> = (0..workers)
        .map(|index| {
            runtime.spawn(run_worker(
                index,
                frame_loop.context().clone(),
                frame_loop.scene(),
                frame_loop.host(),
            ))
        })
        .collect();
    info!(workers, max_frames = frames, "workers started");

    let all_done = frame_loop.run_until(|| handles.iter().all(|h| h.is_finished()), frames);
    if !all_done {
        warn!(
            frames,
            "frame budget exhausted before every worker finished"
        );
    }

    let scene = frame_loop.scene();
    let frames_run = frame_loop.frame();
    let shutdown = frame_loop.shutdown();

    let outcomes = runtime.block_on(async move {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.context("worker task panicked")?);
        }
        Ok::<_, anyhow::Error>(outcomes)
    })?;

    let mut reports = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => error!(error = %format!("{e:#}"), "worker failed"),
        }
    }

    for report in &reports {
        info!(
            worker = report.index,
            ran_on_owner = report.ran_on_owner,
            objects = report.objects,
            coroutine_steps = report.coroutine_steps,
            canceled = report.canceled,
            "worker report"
        );
    }
    info!(
        frames = frames_run,
        workers_ok = reports.len(),
        workers_failed = workers - reports.len(),
        scene_objects = scene.len(),
        dropped_callbacks = shutdown.dropped_callbacks,
        dropped_coroutines = shutdown.dropped_coroutines,
        "run complete"
    );

    if reports.len() != workers {
        bail!("{} of {workers} workers failed", workers - reports.len());
    }
    Ok(())
}

async fn run_worker(
    index: usize,
    ctx: OwnerContext,
    scene: Arc<Scene>,
    host: Arc<LoopHost>,
) -> Result<WorkerReport> {
    let mut report = WorkerReport {
        index,
        ..WorkerReport::default()
    };

    // Fire-and-forget through the installed global context.
    framesync_core::run_on_owner_thread(move || {
        tracing::debug!(worker = index, "greeting ran on the owner thread");
    })
    .context("failed to post greeting")?;

    let probe = ctx.clone();
    report.ran_on_owner = ctx
        .run_on_owner_thread_async(move || probe.is_owner_thread())
        .await
        .context("owner probe failed")?;

    let root = ctx
        .instantiate_async(
            Arc::clone(&scene),
            Prefab::new(format!("squad-{index}")).with_tag("worker"),
            None,
        )
        .await
        .context("failed to instantiate squad")?;
    let member = ctx
        .instantiate_async(Arc::clone(&scene), Prefab::new("member"), Some(root))
        .await
        .context("failed to instantiate squad member")?;
    report.objects = 2;
    tracing::debug!(worker = index, %root, %member, "objects built");

    let steps = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&steps);
    let target = 3 + index as u32;
    let handle = ctx.start_coroutine_async(
        move || -> StepResult {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(if n < target { Step::Yield } else { Step::Done })
        },
        Arc::clone(&host),
    );
    let coroutine_id = handle.id();
    handle.await.context("counting coroutine failed")?;
    report.coroutine_steps = steps.load(Ordering::Relaxed);
    tracing::debug!(
        worker = index,
        %coroutine_id,
        steps = report.coroutine_steps,
        "coroutine done"
    );

    if index == 0 {
        let token = CancellationToken::new();
        let endless = ctx.start_cancelable_coroutine_async(
            || -> StepResult { Ok(Step::Yield) },
            host,
            &token,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        match endless.await {
            Err(e) if e.is_canceled() => report.canceled = true,
            Err(e) => return Err(e).context("endless coroutine faulted"),
            Ok(()) => warn!(worker = index, "endless coroutine finished on its own"),
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Subcommand: config
// ---------------------------------------------------------------------------

fn cmd_config(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let rendered = config
        .to_toml_string()
        .context("failed to render the loop configuration")?;
    print!("{rendered}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<LoopConfig> {
    match path {
        Some(path) => LoopConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(LoopConfig::default()),
    }
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["framesync", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                frames,
                workers,
                config,
            } => {
                assert_eq!(frames, 600);
                assert_eq!(workers, 4);
                assert!(config.is_none());
            }
            Commands::Config { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn config_accepts_a_path() {
        let cli = Cli::try_parse_from(["framesync", "config", "--config", "loop.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config { config: Some(p) } if p == Path::new("loop.toml")
        ));
    }

    #[test]
    fn missing_config_file_is_reported_with_context() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load config"));
    }
}
