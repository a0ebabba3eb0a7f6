//! Strip orchestration: mode selection, the parallel strip loop, and
//! per-day reassembly of the full-extent smoothed rasters.

use anyhow::{bail, Context, Result};
use ndarray::{s, Array2, Array3};
use rayon::prelude::*;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::manifest::RasterManifest;
use crate::reader;
use crate::series;
use crate::store::{ArtifactStore, RunMetadata};
use crate::text;
use crate::whittaker;
use crate::SmoothConfig;

/// One column strip of the raster extent.
#[derive(Debug, Clone, Copy)]
pub struct Strip {
    pub index: usize,
    pub x_offset: usize,
    pub width: usize,
}

/// Partition of the full width into strips.
#[derive(Debug, Clone)]
pub struct StripPlan {
    pub strips: Vec<Strip>,
}

impl StripPlan {
    /// Splits `[0, total_cols)` into strips of `strip_width` columns; the
    /// last strip takes the remainder. Strips cover the extent exactly,
    /// with no overlap and no gap.
    pub fn partition(total_cols: usize, strip_width: usize) -> StripPlan {
        let mut strips = Vec::new();
        let mut x_offset = 0;
        while x_offset < total_cols {
            let width = strip_width.min(total_cols - x_offset);
            strips.push(Strip {
                index: strips.len(),
                x_offset,
                width,
            });
            x_offset += width;
        }
        StripPlan { strips }
    }

    pub fn len(&self) -> usize {
        self.strips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }

    pub fn widths(&self) -> Vec<usize> {
        self.strips.iter().map(|s| s.width).collect()
    }
}

/// Whether a run recomputes the whole archive or only a trailing window
/// around newly appended observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothMode {
    Full,
    Incremental { new_steps: usize },
}

impl SmoothMode {
    pub fn select(new_steps: usize) -> SmoothMode {
        if new_steps == 0 {
            SmoothMode::Full
        } else {
            SmoothMode::Incremental { new_steps }
        }
    }

    /// First observation index fed into the smoother. Incremental runs read
    /// only the trailing context window plus the new steps; everything
    /// earlier is already-smoothed history that stays untouched.
    pub fn read_start(&self, n_days: usize, window: usize) -> usize {
        match *self {
            SmoothMode::Full => 0,
            SmoothMode::Incremental { new_steps } => {
                n_days.saturating_sub(new_steps + window)
            }
        }
    }

    /// First day index whose smoothed raster is persisted and written out.
    pub fn output_start(&self, n_days: usize) -> usize {
        match *self {
            SmoothMode::Full => 0,
            SmoothMode::Incremental { new_steps } => n_days.saturating_sub(new_steps),
        }
    }
}

/// Per-strip observability counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripStats {
    /// Pixels skipped because their history was mostly sentinel.
    pub skipped_pixels: usize,
    /// Pixels whose solve hit the iteration cap; their best iterate was kept.
    pub nonconverged_pixels: usize,
}

/// Totals reported after a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub strips_total: usize,
    pub strips_skipped: usize,
    pub days_written: usize,
    pub skipped_pixels: usize,
    pub nonconverged_pixels: usize,
}

/// Smooths every pixel series of one strip stack in place of a new stack.
///
/// Row-major over the strip: each pixel either fails the sparse-history
/// check (all-sentinel output) or runs the outlier pre-filter followed by
/// the Whittaker solve. The smoothing of one series is strictly sequential;
/// parallelism lives at the strip level only.
pub fn smooth_strip(stack: &Array3<f32>, config: &SmoothConfig) -> (Array3<f32>, StripStats) {
    let (n_days, height, width) = stack.dim();
    let mut smoothed = Array3::<f32>::zeros((n_days, height, width));
    let mut stats = StripStats::default();
    let max_iterations = config.iter_multiplier * n_days;

    let mut pixel = vec![0.0f32; n_days];
    for row in 0..height {
        for col in 0..width {
            for t in 0..n_days {
                pixel[t] = stack[[t, row, col]];
            }

            if series::is_unsmoothable(&pixel, config.sentinel, config.skip_count) {
                stats.skipped_pixels += 1;
                for t in 0..n_days {
                    smoothed[[t, row, col]] = config.sentinel;
                }
                continue;
            }

            series::despike(&mut pixel, config.jump_threshold, config.floor_threshold);
            let y: Vec<f64> = pixel.iter().map(|&v| v as f64).collect();
            let outcome =
                whittaker::smooth(&y, config.lambda, config.tolerance, max_iterations);
            if !outcome.converged {
                stats.nonconverged_pixels += 1;
            }
            for t in 0..n_days {
                smoothed[[t, row, col]] = outcome.values[t] as f32;
            }
        }
    }

    (smoothed, stats)
}

/// Runs the whole pipeline: validate inputs, smooth every strip, persist the
/// per-(strip, day) artifacts, then reassemble one raster per output day.
pub fn run(config: &SmoothConfig) -> Result<RunSummary> {
    let mut part_time = Instant::now();

    let manifest = RasterManifest::from_file(&config.manifest)?;
    let info = manifest.validate_rasters()?;
    let n_days = manifest.len();
    println!(
        "{} Manifest validated: {} rasters, {}x{} pixels ({:.2} s).",
        text::check_icon(),
        n_days,
        info.width,
        info.height,
        part_time.elapsed().as_secs_f64()
    );
    part_time = Instant::now();

    let mode = SmoothMode::select(config.new_steps);
    let read_start = mode.read_start(n_days, config.window);
    let output_start = mode.output_start(n_days);
    if let SmoothMode::Incremental { new_steps } = mode {
        if new_steps >= n_days {
            bail!(
                "Incremental run with {} new steps needs a longer history than {} rasters",
                new_steps,
                n_days
            );
        }
        println!(
            "Incremental mode: smoothing steps [{}..{}), writing days [{}..{}).",
            read_start, n_days, output_start, n_days
        );
    }

    let plan = StripPlan::partition(info.width, config.strip_width);
    let store = ArtifactStore::open(&config.artifacts)?;
    if mode == SmoothMode::Full && !config.resume {
        store.wipe()?;
    }
    store.write_metadata(&RunMetadata {
        width: info.width,
        height: info.height,
        strip_widths: plan.widths(),
        n_days,
        output_day_start: output_start,
        dates: manifest.dates(),
    })?;

    if config.jobs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .build_global()?;
    }

    let n_strips = plan.len();
    let output_days = output_start..n_days;
    let manifest_arc = Arc::new(manifest);
    let store_arc = Arc::new(store);
    let stats_acc = Arc::new(Mutex::new(StripStats::default()));
    let skipped_strips = Arc::new(Mutex::new(0usize));
    let failures: Arc<Mutex<Vec<(usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let progress = Arc::new(Mutex::new(0usize));

    print!("Smoothing strips...");
    io::stdout().flush().unwrap();

    plan.strips.par_iter().for_each(|strip| {
        let result = (|| -> Result<()> {
            if config.resume && store_arc.is_strip_complete(strip.index, output_days.clone()) {
                *skipped_strips.lock().unwrap() += 1;
                return Ok(());
            }

            let stack = reader::read_strip(
                &manifest_arc,
                strip.x_offset,
                strip.width,
                info.height,
                read_start,
            )?;
            let (smoothed, stats) = smooth_strip(&stack, config);

            for day in output_days.clone() {
                let t = day - read_start;
                let values: Vec<f32> = smoothed.slice(s![t, .., ..]).iter().cloned().collect();
                store_arc.write(strip.index, day, &values)?;
            }

            let mut acc = stats_acc.lock().unwrap();
            acc.skipped_pixels += stats.skipped_pixels;
            acc.nonconverged_pixels += stats.nonconverged_pixels;
            Ok(())
        })();

        if let Err(e) = result {
            failures
                .lock()
                .unwrap()
                .push((strip.index, format!("{:#}", e)));
        }

        let mut count = progress.lock().unwrap();
        *count += 1;
        let term = console::Term::stdout();
        let _ = term.clear_line();
        print!(
            "\rSmoothing strips... {:.0}%",
            (*count as f32 / n_strips as f32) * 100.0
        );
        let _ = io::stdout().flush();
    });

    let term = console::Term::stdout();
    let _ = term.clear_line();

    let failures = Arc::try_unwrap(failures).unwrap().into_inner().unwrap();
    if !failures.is_empty() {
        for (strip, message) in &failures {
            eprintln!(
                "{} Strip {} failed: {}",
                text::error("Error"),
                strip,
                message
            );
        }
        // Artifacts persisted by other strips stay valid; a rerun with
        // --resume picks up from them.
        bail!("{} of {} strips failed; reassembly not started", failures.len(), n_strips);
    }
    println!(
        "\r{} {} strips smoothed in {:.2} s.",
        text::check_icon(),
        n_strips,
        part_time.elapsed().as_secs_f64()
    );
    part_time = Instant::now();

    // Hard barrier: every (strip, day) artifact must exist before any day is
    // reassembled, otherwise a partial raster could be written silently.
    if let Some((strip, day)) = store_arc.first_missing(n_strips, output_days.clone()) {
        bail!(
            "Missing intermediate artifact for strip {} day {}; recompute that strip before reassembly",
            strip,
            day
        );
    }

    std::fs::create_dir_all(&config.output)
        .with_context(|| format!("Failed to create output directory {:?}", config.output))?;

    let dates = manifest_arc.dates();
    for day in output_days.clone() {
        let mut grid = Array2::<f32>::zeros((info.height, info.width));
        for strip in &plan.strips {
            let values = store_arc.read(strip.index, day, info.height * strip.width)?;
            let strip_grid = Array2::from_shape_vec((info.height, strip.width), values)?;
            grid.slice_mut(s![.., strip.x_offset..strip.x_offset + strip.width])
                .assign(&strip_grid);
        }
        let path = config.output.join(format!("smoothed_{}.tif", dates[day]));
        reader::write_day_raster(&path, &grid, &info, config.sentinel)?;
    }
    println!(
        "{} {} smoothed rasters written in {:.2} s.",
        text::check_icon(),
        output_days.len(),
        part_time.elapsed().as_secs_f64()
    );

    let stats = *stats_acc.lock().unwrap();
    let strips_skipped = *skipped_strips.lock().unwrap();
    Ok(RunSummary {
        strips_total: n_strips,
        strips_skipped,
        days_written: output_days.len(),
        skipped_pixels: stats.skipped_pixels,
        nonconverged_pixels: stats.nonconverged_pixels,
    })
}
