//! Windowed raster reads and smoothed raster writes.

use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::{s, Array2, Array3};
use std::path::Path;

use crate::manifest::{GridInfo, RasterManifest};

/// Reads one column strip across the raster series into a `[time, row, col]`
/// stack.
///
/// # Arguments
/// * `manifest` - The validated input series.
/// * `x_offset` - Left edge of the strip, in pixels.
/// * `strip_width` - Width of the strip.
/// * `height` - Full raster height; strips always span it.
/// * `first_day` - Index of the first observation to read (> 0 only for
///   incremental runs that need the trailing steps).
///
/// # Returns
/// An `Array3<f32>` of shape `(n_days - first_day, height, strip_width)`.
pub fn read_strip(
    manifest: &RasterManifest,
    x_offset: usize,
    strip_width: usize,
    height: usize,
    first_day: usize,
) -> Result<Array3<f32>> {
    let entries = &manifest.entries()[first_day..];
    let mut stack = Array3::<f32>::zeros((entries.len(), height, strip_width));

    for (t, entry) in entries.iter().enumerate() {
        let ds = Dataset::open(&entry.path)
            .with_context(|| format!("Failed to open input raster {:?}", entry.path))?;
        let band = ds.rasterband(1)?;
        let buffer: Buffer<f32> = band
            .read_as(
                (x_offset as isize, 0),
                (strip_width, height),
                (strip_width, height),
                None,
            )
            .with_context(|| format!("Failed to read strip from {:?}", entry.path))?;
        let grid = Array2::from_shape_vec((height, strip_width), buffer.data().to_vec())?;
        stack.slice_mut(s![t, .., ..]).assign(&grid);
    }

    Ok(stack)
}

/// Writes one smoothed day grid as a GeoTIFF, carrying the spatial metadata
/// of the source series and the sentinel as the band nodata value.
pub fn write_day_raster(
    path: &Path,
    grid: &Array2<f32>,
    info: &GridInfo,
    sentinel: f32,
) -> Result<()> {
    let (rows, cols) = grid.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver
        .create_with_band_type::<f32, _>(path, cols, rows, 1)
        .with_context(|| format!("Failed to create output raster {:?}", path))?;

    ds.set_projection(&info.projection)?;
    ds.set_geo_transform(&info.geo_transform)?;

    let mut band = ds.rasterband(1)?;
    band.set_no_data_value(Some(sentinel as f64))?;

    let data: Vec<f32> = grid.iter().cloned().collect();
    let mut buffer = Buffer::new((cols, rows), data);
    band.write((0, 0), (cols, rows), &mut buffer)
        .with_context(|| format!("Failed to write output raster {:?}", path))?;
    Ok(())
}
