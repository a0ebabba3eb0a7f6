use approx::assert_abs_diff_eq;
use dekadal_smoother::manifest::{ManifestEntry, RasterManifest};
use dekadal_smoother::pipeline::{self, SmoothMode, StripPlan};
use dekadal_smoother::store::ArtifactStore;
use dekadal_smoother::{series, whittaker, SmoothConfig, DEFAULT_SENTINEL};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::Array3;
use std::path::{Path, PathBuf};

/// Writes one mock f32 GeoTIFF with the shared test geotransform.
fn create_raster(path: &Path, width: usize, height: usize, data: Vec<f32>) {
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut ds = driver
        .create_with_band_type::<f32, _>(path, width, height, 1)
        .unwrap();
    ds.set_geo_transform(&[35.0, 0.01, 0.0, 5.0, 0.0, -0.01]).unwrap();
    let mut band = ds.rasterband(1).unwrap();
    band.set_no_data_value(Some(DEFAULT_SENTINEL as f64)).unwrap();
    let mut buffer = Buffer::new((width, height), data);
    band.write((0, 0), (width, height), &mut buffer).unwrap();
}

fn read_raster(path: &Path, width: usize, height: usize) -> Vec<f32> {
    let ds = Dataset::open(path).unwrap();
    let band = ds.rasterband(1).unwrap();
    let buffer: Buffer<f32> = band
        .read_as((0, 0), (width, height), (width, height), None)
        .unwrap();
    buffer.data().to_vec()
}

/// Strictly increasing dekadal date codes (three per month).
fn dekadal_dates(n: usize) -> Vec<u32> {
    let mut dates = Vec::with_capacity(n);
    let mut year = 2020u32;
    'outer: loop {
        for month in 1..=12u32 {
            for day in [1u32, 11, 21] {
                dates.push(year * 10000 + month * 100 + day);
                if dates.len() == n {
                    break 'outer;
                }
            }
        }
        year += 1;
    }
    dates
}

fn write_manifest(path: &Path, entries: &[ManifestEntry]) {
    std::fs::write(path, serde_json::to_string_pretty(entries).unwrap()).unwrap();
}

fn test_config(dir: &Path) -> SmoothConfig {
    SmoothConfig {
        manifest: dir.join("manifest.json"),
        output: dir.join("smoothed"),
        artifacts: dir.join("intermediate"),
        strip_width: 23,
        lambda: 5.0,
        tolerance: 3e-2,
        iter_multiplier: 10,
        window: 36,
        jump_threshold: 0.2,
        floor_threshold: 0.01,
        sentinel: DEFAULT_SENTINEL,
        skip_count: 400,
        new_steps: 0,
        resume: false,
        jobs: 0,
    }
}

// --- Outlier pre-filter ---

#[test]
fn test_despike_flattens_spike_onto_secant() {
    let mut v = vec![0.5; 8];
    v[4] = 0.9;
    series::despike(&mut v, 0.2, 0.01);
    for &value in &v {
        assert_abs_diff_eq!(value, 0.5, epsilon = 1e-6);
    }
}

#[test]
fn test_despike_correction_feeds_next_check() {
    // The jump at i = 1 rewrites v[1] and v[2] from the secant through v[0]
    // and v[3]; the check at i = 2 then sees the corrected values, so no
    // second correction fires. A symmetric filter would behave differently.
    let mut v = vec![0.1, 0.1, 0.9, 0.1, 0.1, 0.1];
    series::despike(&mut v, 0.2, 0.01);
    for &value in &v {
        assert_abs_diff_eq!(value, 0.1, epsilon = 1e-6);
    }
}

#[test]
fn test_despike_repairs_sentinel_drop_via_floor() {
    let mut v = vec![0.4, DEFAULT_SENTINEL, 0.4, 0.4, 0.4, 0.4];
    series::despike(&mut v, 0.2, 0.01);
    assert_abs_diff_eq!(v[1], 0.4, epsilon = 1e-6);
}

#[test]
fn test_despike_leaves_short_series_untouched() {
    let mut v = vec![0.0, 1.0, 0.0];
    let before = v.clone();
    series::despike(&mut v, 0.2, 0.01);
    assert_eq!(v, before);
}

#[test]
fn test_sparse_history_predicate() {
    let mut v = vec![0.5f32; 563];
    for value in v.iter_mut().take(401) {
        *value = DEFAULT_SENTINEL;
    }
    assert!(series::is_unsmoothable(&v, DEFAULT_SENTINEL, 400));
    assert!(!series::is_unsmoothable(&v[..500], DEFAULT_SENTINEL, 400));
}

// --- Whittaker solver ---

#[test]
fn test_smooth_preserves_length_and_quadratic_series() {
    // The third-difference of a quadratic is zero, so the exact solution of
    // (I + lambda D^T D) s = y is y itself.
    let y: Vec<f64> = (0..60).map(|t| 0.3 + 1e-4 * (t * t) as f64).collect();
    let outcome = whittaker::smooth(&y, 5.0, 1e-4, 600);
    assert_eq!(outcome.values.len(), y.len());
    assert!(outcome.converged);
    for (s, v) in outcome.values.iter().zip(&y) {
        assert_abs_diff_eq!(*s, *v, epsilon = 1e-3);
    }
}

#[test]
fn test_smooth_approximate_idempotence() {
    let y: Vec<f64> = (0..120)
        .map(|t| 0.5 + 0.2 * (2.0 * std::f64::consts::PI * t as f64 / 36.0).sin())
        .collect();
    let first = whittaker::smooth(&y, 5.0, 1e-4, 1200);
    let second = whittaker::smooth(&first.values, 5.0, 1e-4, 1200);
    for (a, b) in first.values.iter().zip(&second.values) {
        assert_abs_diff_eq!(*a, *b, epsilon = 0.01);
    }
}

#[test]
fn test_smooth_reports_nonconvergence() {
    let y: Vec<f64> = (0..50).map(|t| ((t * 7919) % 13) as f64 / 13.0).collect();
    let outcome = whittaker::smooth(&y, 5.0, 1e-12, 2);
    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.values.len(), 50);
}

#[test]
fn test_smooth_degenerate_lengths_pass_through() {
    let y = vec![0.1, 0.2, 0.3];
    let outcome = whittaker::smooth(&y, 5.0, 3e-2, 30);
    assert!(outcome.converged);
    assert_eq!(outcome.values, y);
}

// --- Strip plan and mode selection ---

#[test]
fn test_strip_partition_is_exact() {
    let plan = StripPlan::partition(100, 23);
    assert_eq!(plan.widths(), vec![23, 23, 23, 23, 8]);
    let mut expected_offset = 0;
    for strip in &plan.strips {
        assert_eq!(strip.x_offset, expected_offset);
        expected_offset += strip.width;
    }
    assert_eq!(expected_offset, 100);

    let even = StripPlan::partition(46, 23);
    assert_eq!(even.widths(), vec![23, 23]);
}

#[test]
fn test_mode_selection_and_ranges() {
    assert_eq!(SmoothMode::select(0), SmoothMode::Full);
    assert_eq!(SmoothMode::Full.read_start(605, 36), 0);
    assert_eq!(SmoothMode::Full.output_start(605), 0);

    // 5 new steps on a 600-step history with a 36-step window: steps
    // [564, 605) are recomputed, days [600, 605) are written.
    let mode = SmoothMode::select(5);
    assert_eq!(mode.read_start(605, 36), 564);
    assert_eq!(mode.output_start(605), 600);
}

// --- Strip smoothing ---

#[test]
fn test_sparse_history_pixel_yields_sentinel_series() {
    // 563 observations of one pixel, more than 400 of them the fill value:
    // the output must be the sentinel series, never fabricated numbers.
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let mut stack = Array3::<f32>::from_elem((563, 1, 1), 0.5);
    for t in 0..450 {
        stack[[t, 0, 0]] = DEFAULT_SENTINEL;
    }
    let (smoothed, stats) = pipeline::smooth_strip(&stack, &config);
    assert_eq!(stats.skipped_pixels, 1);
    for t in 0..563 {
        assert_eq!(smoothed[[t, 0, 0]], DEFAULT_SENTINEL);
    }
}

// --- Manifest validation ---

#[test]
fn test_manifest_rejects_unordered_dates() {
    let entries = vec![
        ManifestEntry { date: 20200111, path: PathBuf::from("a.tif") },
        ManifestEntry { date: 20200101, path: PathBuf::from("b.tif") },
    ];
    let err = RasterManifest::from_entries(entries).unwrap_err();
    assert!(err.to_string().contains("strictly increasing"));
}

#[test]
fn test_manifest_rejects_malformed_date_code() {
    let entries = vec![ManifestEntry { date: 20201401, path: PathBuf::from("a.tif") }];
    assert!(RasterManifest::from_entries(entries).is_err());
}

#[test]
fn test_shape_mismatch_fails_fast_naming_the_raster() {
    let temp_dir = tempfile::tempdir().unwrap();
    let good = temp_dir.path().join("good.tif");
    let bad = temp_dir.path().join("bad.tif");
    create_raster(&good, 4, 4, vec![0.5; 16]);
    create_raster(&bad, 3, 4, vec![0.5; 12]);

    let manifest = RasterManifest::from_entries(vec![
        ManifestEntry { date: 20200101, path: good },
        ManifestEntry { date: 20200111, path: bad.clone() },
    ])
    .unwrap();
    let err = manifest.validate_rasters().unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("shape mismatch"));
    assert!(message.contains("bad.tif"));
}

// --- Artifact store ---

#[test]
fn test_artifact_store_round_trip_and_gap_detection() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(&temp_dir.path().join("dump")).unwrap();

    let values = vec![0.1f32, 0.2, 0.3, 0.4];
    store.write(0, 0, &values).unwrap();
    store.write(0, 1, &values).unwrap();
    assert_eq!(store.read(0, 1, 4).unwrap(), values);
    assert!(store.is_strip_complete(0, 0..2));

    // Strip 1 never wrote day 1: reassembly must see the gap.
    store.write(1, 0, &values).unwrap();
    assert_eq!(store.first_missing(2, 0..2), Some((1, 1)));

    let err = store.read(1, 1, 4).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("strip 1"));
    assert!(message.contains("day 1"));

    store.wipe().unwrap();
    assert!(!store.exists(0, 0));
}

// --- Full pipeline scenarios ---

/// Scenario A: 40 dekadal grids of 4x4 pixels at 0.5, with one pixel spiking
/// to 0.9 at step 20. The pre-filter flattens the spike and the smoothed
/// output stays within 0.05 of 0.5 everywhere.
#[test]
fn test_full_run_flattens_transient_spike() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.strip_width = 3; // 4 columns -> strips of width 3 and 1

    let dates = dekadal_dates(40);
    let mut entries = Vec::new();
    for (t, &date) in dates.iter().enumerate() {
        let mut data = vec![0.5f32; 16];
        if t == 20 {
            data[1 * 4 + 2] = 0.9; // row 1, col 2
        }
        let path = temp_dir.path().join(format!("ndvi_{}.tif", date));
        create_raster(&path, 4, 4, data);
        entries.push(ManifestEntry { date, path });
    }
    write_manifest(&config.manifest, &entries);

    let summary = pipeline::run(&config).unwrap();
    assert_eq!(summary.days_written, 40);
    assert_eq!(summary.strips_total, 2);
    assert_eq!(summary.skipped_pixels, 0);

    for &date in &dates {
        let path = config.output.join(format!("smoothed_{}.tif", date));
        let data = read_raster(&path, 4, 4);
        for &value in &data {
            assert_abs_diff_eq!(value, 0.5, epsilon = 0.05);
        }
    }
}

/// Reassembling strip artifacts left to right must reproduce the original
/// column order of the extent.
#[test]
fn test_reassembly_preserves_column_order() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.strip_width = 2; // 5 columns -> 3 strips

    let dates = dekadal_dates(8);
    let mut entries = Vec::new();
    for &date in &dates {
        let mut data = vec![0.0f32; 10];
        for row in 0..2 {
            for col in 0..5 {
                data[row * 5 + col] = 0.05 + 0.1 * col as f32;
            }
        }
        let path = temp_dir.path().join(format!("ndvi_{}.tif", date));
        create_raster(&path, 5, 2, data);
        entries.push(ManifestEntry { date, path });
    }
    write_manifest(&config.manifest, &entries);

    pipeline::run(&config).unwrap();

    let data = read_raster(&config.output.join(format!("smoothed_{}.tif", dates[0])), 5, 2);
    for row in 0..2 {
        for col in 0..5 {
            assert_abs_diff_eq!(data[row * 5 + col], 0.05 + 0.1 * col as f32, epsilon = 0.02);
        }
    }
}

/// Incremental mode: 5 new steps on a 75-step smoothed history. Only the new
/// days are written, the history rasters stay byte-identical, and the new
/// values agree with a from-scratch full run within a documented tolerance.
#[test]
fn test_incremental_run_matches_full_run_on_new_steps() {
    let temp_dir = tempfile::tempdir().unwrap();
    let n_days = 80;
    let n_history = 75;
    let dates = dekadal_dates(n_days);

    let seasonal = |t: usize| -> f32 {
        0.5 + 0.2 * (2.0 * std::f32::consts::PI * t as f32 / 36.0).sin()
    };

    // Raw series of one pixel.
    let mut raw_paths = Vec::new();
    for (t, &date) in dates.iter().enumerate() {
        let path = temp_dir.path().join(format!("raw_{}.tif", date));
        create_raster(&path, 1, 1, vec![seasonal(t)]);
        raw_paths.push(path);
    }

    // Full run over the complete history. A tight solver tolerance keeps the
    // comparison between the two modes about the mode, not CG noise.
    let mut full_config = test_config(&temp_dir.path().join("full"));
    full_config.tolerance = 1e-3;
    std::fs::create_dir_all(temp_dir.path().join("full")).unwrap();
    let full_entries: Vec<ManifestEntry> = dates
        .iter()
        .zip(&raw_paths)
        .map(|(&date, path)| ManifestEntry { date, path: path.clone() })
        .collect();
    write_manifest(&full_config.manifest, &full_entries);
    pipeline::run(&full_config).unwrap();

    // Incremental run: the first 75 manifest entries are the smoothed
    // outputs, the last 5 the raw new observations; output goes to the same
    // directory as the full run's rasters.
    let mut incr_config = test_config(&temp_dir.path().join("incr"));
    std::fs::create_dir_all(temp_dir.path().join("incr")).unwrap();
    incr_config.tolerance = 1e-3;
    incr_config.output = full_config.output.clone();
    incr_config.new_steps = n_days - n_history;
    let incr_entries: Vec<ManifestEntry> = dates
        .iter()
        .enumerate()
        .map(|(t, &date)| {
            let path = if t < n_history {
                full_config.output.join(format!("smoothed_{}.tif", date))
            } else {
                raw_paths[t].clone()
            };
            ManifestEntry { date, path }
        })
        .collect();
    write_manifest(&incr_config.manifest, &incr_entries);

    let full_values: Vec<f32> = dates
        .iter()
        .map(|&date| read_raster(&full_config.output.join(format!("smoothed_{}.tif", date)), 1, 1)[0])
        .collect();
    let history_bytes: Vec<Vec<u8>> = dates[..n_history]
        .iter()
        .map(|&date| std::fs::read(full_config.output.join(format!("smoothed_{}.tif", date))).unwrap())
        .collect();

    let summary = pipeline::run(&incr_config).unwrap();
    assert_eq!(summary.days_written, 5);

    // History untouched, byte for byte.
    for (&date, before) in dates[..n_history].iter().zip(&history_bytes) {
        let after = std::fs::read(full_config.output.join(format!("smoothed_{}.tif", date))).unwrap();
        assert_eq!(&after, before);
    }

    // New steps agree with the full run within the documented tolerance.
    for (t, &date) in dates.iter().enumerate().skip(n_history) {
        let incremental =
            read_raster(&full_config.output.join(format!("smoothed_{}.tif", date)), 1, 1)[0];
        assert_abs_diff_eq!(incremental, full_values[t], epsilon = 0.05);
    }
}

/// A resumed run must skip strips whose artifacts are already complete.
#[test]
fn test_resume_skips_completed_strips() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.strip_width = 2;

    let dates = dekadal_dates(6);
    let mut entries = Vec::new();
    for &date in &dates {
        let path = temp_dir.path().join(format!("ndvi_{}.tif", date));
        create_raster(&path, 4, 2, vec![0.5; 8]);
        entries.push(ManifestEntry { date, path });
    }
    write_manifest(&config.manifest, &entries);

    let first = pipeline::run(&config).unwrap();
    assert_eq!(first.strips_skipped, 0);

    config.resume = true;
    let second = pipeline::run(&config).unwrap();
    assert_eq!(second.strips_skipped, 2);
    assert_eq!(second.days_written, 6);
}
