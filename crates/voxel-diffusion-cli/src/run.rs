//! Command implementations.

use anyhow::{bail, Context};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use voxel_diffusion::prelude::*;
use voxel_diffusion::{LabelGrid, NoiseSchedule, LABEL_COUNT};

/// Which compute engine to provision
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Deterministic in-process engine
    Mock,
    /// ONNX Runtime with the exported model
    Onnx,
}

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file (defaults are used when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Compute engine
    #[arg(short, long, value_enum, default_value = "mock")]
    pub engine: EngineKind,

    /// Override the number of outer timesteps
    #[arg(short, long)]
    pub timesteps: Option<usize>,

    /// Override the number of inner sub-steps
    #[arg(long)]
    pub inpaint_steps: Option<usize>,

    /// Fix the noise seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Label written across the y = 0 layer before the run
    #[arg(short, long, default_value = "1")]
    pub floor_label: LabelId,

    /// Progress poll interval in milliseconds
    #[arg(long, default_value = "20")]
    pub poll_ms: u64,
}

/// Arguments for `schedule`
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Number of timesteps
    #[arg(short, long, default_value = "1000")]
    pub timesteps: usize,

    /// First beta
    #[arg(long, default_value = "0.0001")]
    pub beta_min: f32,

    /// Last beta
    #[arg(long, default_value = "0.02")]
    pub beta_max: f32,

    /// Print every n-th row
    #[arg(short, long, default_value = "100")]
    pub every: usize,
}

/// Arguments for `init-config`
#[derive(Args, Debug)]
pub struct InitConfigArgs {
    /// Destination file
    pub path: PathBuf,

    /// Also print the JSON to stdout
    #[arg(long)]
    pub print: bool,
}

fn load_config(args: &RunArgs) -> anyhow::Result<DiffusionConfig> {
    let mut config = match &args.config {
        Some(path) => DiffusionConfig::from_json(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DiffusionConfig::default(),
    };
    if let Some(timesteps) = args.timesteps {
        config.timesteps = timesteps;
    }
    if let Some(inpaint_steps) = args.inpaint_steps {
        config.inpaint_steps = inpaint_steps;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn provisioner(kind: EngineKind) -> anyhow::Result<Box<dyn EngineProvisioner>> {
    match kind {
        EngineKind::Mock => Ok(Box::new(
            MockEngine::new(MockBehavior::PullToContext).into_provisioner(),
        )),
        #[cfg(feature = "onnx")]
        EngineKind::Onnx => Ok(Box::new(OnnxProvisioner::new())),
        #[cfg(not(feature = "onnx"))]
        EngineKind::Onnx => bail!("this binary was built without the `onnx` feature"),
    }
}

/// Label ids sorted by cell count, most frequent first
fn top_labels(grid: &LabelGrid, n: usize) -> Vec<(usize, usize)> {
    let mut counts: Vec<(usize, usize)> = grid
        .histogram()
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(id, &count)| (id, count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    counts.truncate(n);
    counts
}

/// Run the worker and poll it to completion.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    if args.floor_label as usize >= LABEL_COUNT {
        bail!("floor label must be below {}", LABEL_COUNT);
    }

    let timesteps = config.timesteps;
    let ctx = DiffusionContext::create_boxed(config, provisioner(args.engine)?)?;
    ctx.initialize().context("starting diffusion worker")?;

    for x in 0..CHUNK_WIDTH {
        for z in 0..CHUNK_WIDTH {
            ctx.set_conditioning_cell(x, 0, z, args.floor_label)?;
        }
    }
    ctx.start_run().context("starting run")?;

    let started = Instant::now();
    let poll = Duration::from_millis(args.poll_ms.max(1));
    let mut last_seen = usize::MAX;
    loop {
        if ctx.state() == WorkerState::Failed {
            bail!("engine provisioning failed: {}", ctx.last_error());
        }

        let t = ctx.current_timestep().unwrap_or(timesteps);
        if t < last_seen {
            let captured = ctx.capture_snapshot()?;
            let labels = ctx.snapshot_labels();
            info!(
                timestep = captured,
                label_sum = labels.label_sum(),
                top = ?top_labels(&labels, 3),
                "Snapshot"
            );
            last_seen = t;
        }

        if !ctx.is_run_active() {
            break;
        }
        std::thread::sleep(poll);
    }

    let elapsed = started.elapsed();
    if ctx.current_timestep() != Some(0) {
        warn!(error = %ctx.last_error(), "Run ended early");
        bail!("run aborted: {}", ctx.last_error());
    }

    ctx.capture_snapshot()?;
    let labels = ctx.snapshot_labels();
    let values = ctx.snapshot_stats();
    let stats = ctx.step_stats();

    println!();
    println!("{}", "Run complete".bold().green());
    println!(
        "  {} {:.2}s ({} steps, {:.3} ms/step)",
        "Elapsed:".dimmed(),
        elapsed.as_secs_f64(),
        stats.total_steps,
        stats.avg_time_ms
    );
    println!("  {} {}", "Label sum:".dimmed(), labels.label_sum());
    println!(
        "  {} mean {:.3}, std {:.3}, range [{:.3}, {:.3}]",
        "Final sample:".dimmed(),
        values.mean,
        values.std,
        values.min,
        values.max
    );
    println!("  {}", "Most frequent labels:".dimmed());
    for (id, count) in top_labels(&labels, 5) {
        println!("    {:>3}  {:>5} cells", id.to_string().cyan(), count);
    }

    ctx.shutdown()?;
    Ok(())
}

/// Print schedule rows.
pub fn print_schedule(args: ScheduleArgs) -> anyhow::Result<()> {
    let schedule = NoiseSchedule::new(args.beta_min, args.beta_max, args.timesteps)?;
    let every = args.every.max(1);

    println!(
        "{:>6}  {:>12}  {:>12}  {:>12}",
        "t".bold(),
        "beta".bold(),
        "alpha".bold(),
        "alpha_bar".bold()
    );
    for t in (0..schedule.len()).filter(|t| t % every == 0 || *t == schedule.len() - 1) {
        if let Some(step) = schedule.at(t) {
            println!(
                "{:>6}  {:>12.6e}  {:>12.8}  {:>12.8}",
                t, step.beta, step.alpha, step.alpha_bar
            );
        }
    }
    Ok(())
}

/// Write the default configuration.
pub fn init_config(args: InitConfigArgs) -> anyhow::Result<()> {
    let config = DiffusionConfig::default();
    config
        .to_json(&args.path)
        .with_context(|| format!("writing {}", args.path.display()))?;
    if args.print {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }
    println!("{} {}", "Wrote".green(), args.path.display());
    Ok(())
}
