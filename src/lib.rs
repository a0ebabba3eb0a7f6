//! # Dekadal Smoother
//!
//! Library core of the dekadal NDVI smoothing tool. Given a dated series of
//! equal-shaped raster composites at a fixed ~10-day cadence, it repairs
//! transient cloud/sensor outliers per pixel, fits a penalized-least-squares
//! (Whittaker) curve through each pixel's history, and writes one smoothed
//! raster per observation date.
//!
//! The extent is processed in full-height column strips so that one strip's
//! time stack fits in memory, and each (strip, day) result is persisted to an
//! intermediate store before the per-day rasters are reassembled. Interrupted
//! runs can therefore resume at strip granularity.
//!
//! The main components are:
//! - [`manifest`] — the dated input manifest and its validation.
//! - [`series`] — the per-pixel outlier pre-filter.
//! - [`whittaker`] — the banded conjugate-gradient smoother.
//! - [`reader`] — windowed strip reads across the raster series.
//! - [`store`] — the index-addressed intermediate artifact store.
//! - [`pipeline`] — strip orchestration, mode selection and reassembly.

pub mod manifest;
pub mod pipeline;
pub mod reader;
pub mod series;
pub mod store;
pub mod text;
pub mod whittaker;

use std::path::PathBuf;

/// Fill value marking invalid pixels in the source composites: the smallest
/// normal IEEE-754 single-precision float, as produced upstream.
pub const DEFAULT_SENTINEL: f32 = 1.175494351e-38;

/// Configuration for one smoothing run.
///
/// Every tunable of the pipeline is explicit here; the binary populates the
/// struct from command-line arguments and nothing else reads ambient state.
#[derive(Debug, Clone)]
pub struct SmoothConfig {
    /// JSON manifest listing (date code, raster path) pairs in time order.
    pub manifest: PathBuf,
    /// Directory receiving one smoothed GeoTIFF per output date.
    pub output: PathBuf,
    /// Directory holding per-(strip, day) intermediate artifacts.
    pub artifacts: PathBuf,
    /// Width of one column strip, in pixels.
    pub strip_width: usize,
    /// Roughness penalty of the Whittaker objective.
    pub lambda: f64,
    /// Relative residual tolerance of the conjugate-gradient solve.
    pub tolerance: f64,
    /// Iteration cap as a multiple of the series length.
    pub iter_multiplier: usize,
    /// Trailing context window for incremental runs, in observation steps.
    pub window: usize,
    /// Upward step that marks the next sample as implausible.
    pub jump_threshold: f32,
    /// Values below this are treated as spurious drops.
    pub floor_threshold: f32,
    /// No-data fill value of the source rasters.
    pub sentinel: f32,
    /// Pixels with more sentinel entries than this are left unsmoothed.
    pub skip_count: usize,
    /// Number of newly appended observations; 0 selects a full run.
    pub new_steps: usize,
    /// Keep existing artifacts and skip strips that already completed.
    pub resume: bool,
    /// Worker threads for the strip loop; 0 lets rayon decide.
    pub jobs: usize,
}
