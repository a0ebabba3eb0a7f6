use anyhow::Result;
use clap::Parser;
use dekadal_smoother::{pipeline, text, SmoothConfig, DEFAULT_SENTINEL};
use std::path::PathBuf;
use std::time::Instant;

/// Command-line arguments for the dekadal smoothing tool.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "A command-line tool that repairs outliers and fits a Whittaker smoothing \
curve through every pixel of a dekadal vegetation-index raster time series."
)]
struct Args {
    /// Path to the JSON manifest listing (date, path) pairs in time order.
    #[arg(long)]
    manifest: PathBuf,
    /// Directory receiving one smoothed GeoTIFF per output date.
    #[arg(long)]
    output: PathBuf,
    /// Directory for per-(strip, day) intermediate artifacts. Defaults to
    /// "intermediate" inside the output directory.
    #[arg(long)]
    artifacts: Option<PathBuf>,
    /// Width of one column strip, in pixels; sizes the resident memory per worker.
    #[arg(long, default_value_t = 23)]
    strip_width: usize,
    /// Roughness penalty of the smoothing objective.
    #[arg(long, default_value_t = 5.0)]
    lambda: f64,
    /// Relative residual tolerance of the conjugate-gradient solve.
    #[arg(long, default_value_t = 3e-2)]
    tolerance: f64,
    /// Solver iteration cap, as a multiple of the series length.
    #[arg(long, default_value_t = 10)]
    iter_multiplier: usize,
    /// Trailing context window for incremental runs, in observation steps.
    #[arg(long, default_value_t = 36)]
    window: usize,
    /// Upward one-step jump that marks the next sample as implausible.
    #[arg(long, default_value_t = 0.2)]
    jump_threshold: f32,
    /// Samples below this value are treated as spurious drops.
    #[arg(long, default_value_t = 0.01)]
    floor_threshold: f32,
    /// No-data fill value of the source rasters.
    #[arg(long, default_value_t = DEFAULT_SENTINEL)]
    sentinel: f32,
    /// Pixels with more sentinel entries than this are left unsmoothed.
    #[arg(long, default_value_t = 400)]
    skip_count: usize,
    /// Number of newly appended observations to smooth incrementally;
    /// 0 smooths the full history.
    #[arg(long, default_value_t = 0)]
    new_steps: usize,
    /// Keep existing artifacts and skip strips that already completed.
    #[arg(long)]
    resume: bool,
    /// Number of parallel jobs. Defaults to 0 (rayon chooses).
    #[arg(long, default_value_t = 0)]
    jobs: usize,
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let args = Args::parse();

    let line = "-".repeat(72);
    let dline = "=".repeat(72);

    println!(
        "\n{}\n{}\nTool for temporal smoothing of dekadal vegetation-index rasters.\nPart of a {} pipeline.\n{}\n",
        format!(
            "{} {}",
            text::highlight("Dekadal Raster Smoother"),
            env!("CARGO_PKG_VERSION")
        ),
        line,
        text::highlight("rangeland drought-monitoring"),
        dline
    );

    let num_procs = num_cpus::get();
    let jobs = if args.jobs > num_procs {
        println!(
            "{}: 'jobs' value exceeds the {} available processors; capping.\n",
            text::warning("Warning"),
            num_procs
        );
        num_procs
    } else {
        args.jobs
    };

    let config = SmoothConfig {
        artifacts: args
            .artifacts
            .unwrap_or_else(|| args.output.join("intermediate")),
        manifest: args.manifest,
        output: args.output,
        strip_width: args.strip_width,
        lambda: args.lambda,
        tolerance: args.tolerance,
        iter_multiplier: args.iter_multiplier,
        window: args.window,
        jump_threshold: args.jump_threshold,
        floor_threshold: args.floor_threshold,
        sentinel: args.sentinel,
        skip_count: args.skip_count,
        new_steps: args.new_steps,
        resume: args.resume,
        jobs,
    };

    println!("{} Configuration:", text::bold("Processing"));
    println!("  {:<22} {}", "Manifest:", config.manifest.display());
    println!("  {:<22} {}", "Output Directory:", config.output.display());
    println!("  {:<22} {}", "Artifact Directory:", config.artifacts.display());
    println!("  {:<22} {}", "Strip Width:", config.strip_width);
    println!("  {:<22} {}", "Lambda:", config.lambda);
    println!("  {:<22} {}", "CG Tolerance:", config.tolerance);
    println!("  {:<22} {}x series length", "Iteration Cap:", config.iter_multiplier);
    if config.new_steps > 0 {
        println!("  {:<22} incremental ({} new steps)", "Mode:", config.new_steps);
        println!("  {:<22} {} steps", "Context Window:", config.window);
    } else {
        println!("  {:<22} full history", "Mode:");
    }
    if config.resume {
        println!("  {:<22} keeping completed strips", "Resume:");
    }
    println!(
        "  {:<22} {}",
        "Parallel Jobs:",
        if config.jobs == 0 {
            "all available cores".to_string()
        } else {
            config.jobs.to_string()
        }
    );
    println!("{}\n", dline);

    let summary = pipeline::run(&config)?;

    println!("\n{} Run Summary:", text::bold("Final"));
    println!("{}", line);
    println!(
        "  {} {} strips processed ({} resumed from artifacts), {} rasters written.",
        text::check_icon(),
        summary.strips_total,
        summary.strips_skipped,
        summary.days_written
    );
    if summary.skipped_pixels > 0 {
        println!(
            "  {} {} pixels left unsmoothed (sparse history).",
            text::warning("!"),
            summary.skipped_pixels
        );
    }
    if summary.nonconverged_pixels > 0 {
        println!(
            "  {} {} pixel solves stopped at the iteration cap (best iterate kept).",
            text::warning("!"),
            summary.nonconverged_pixels
        );
    } else {
        println!("  {} All pixel solves converged within tolerance.", text::check_icon());
    }
    println!("{}", line);
    println!("{}", text::success("Smoothing completed."));
    println!(
        "Total elapsed time: {:.2} s.\n",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}
