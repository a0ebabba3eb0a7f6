use anyhow::{bail, Context, Result};
use gdal::Dataset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One dated observation in the raster series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Dekadal date code, YYYYMMDD.
    pub date: u32,
    /// Path to the raster composite for that date.
    pub path: PathBuf,
}

/// Ordered, validated list of the input rasters.
///
/// The manifest replaces filename-embedded date parsing: callers state the
/// (date, path) pairs explicitly and validation happens once at load time,
/// before any pixel is read.
#[derive(Debug, Clone)]
pub struct RasterManifest {
    entries: Vec<ManifestEntry>,
}

/// Spatial metadata shared by every raster in the series, taken from the
/// first entry and enforced against all others.
#[derive(Debug, Clone)]
pub struct GridInfo {
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
    pub projection: String,
}

fn is_date_code(code: u32) -> bool {
    let month = (code / 100) % 100;
    let day = code % 100;
    code >= 19000101 && code <= 21991231 && (1..=12).contains(&month) && (1..=31).contains(&day)
}

impl RasterManifest {
    /// Loads and validates a manifest from a JSON file of
    /// `[{"date": 20200101, "path": "..."}]` entries.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse manifest {:?}", path))?;
        Self::from_entries(entries)
    }

    /// Validates an in-memory entry list: non-empty, well-formed date codes,
    /// strictly increasing in time.
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Result<Self> {
        if entries.is_empty() {
            bail!("Manifest contains no rasters");
        }
        for entry in &entries {
            if !is_date_code(entry.date) {
                bail!(
                    "Manifest date {} for {:?} is not a YYYYMMDD date code",
                    entry.date,
                    entry.path
                );
            }
        }
        for pair in entries.windows(2) {
            if pair[1].date <= pair[0].date {
                bail!(
                    "Manifest dates must be strictly increasing: {} is followed by {}",
                    pair[0].date,
                    pair[1].date
                );
            }
        }
        Ok(RasterManifest { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn dates(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.date).collect()
    }

    /// Opens every raster and checks it against the shape of the first.
    ///
    /// A dimension mismatch anywhere in the series is fatal before any
    /// smoothing starts; rasters are never silently reshaped.
    ///
    /// # Returns
    /// The common [`GridInfo`] of the series.
    pub fn validate_rasters(&self) -> Result<GridInfo> {
        let first = &self.entries[0];
        let ds = Dataset::open(&first.path)
            .with_context(|| format!("Failed to open input raster {:?}", first.path))?;
        let (width, height) = ds.raster_size();
        let geo_transform = ds
            .geo_transform()
            .with_context(|| format!("Raster {:?} has no geotransform", first.path))?;
        let projection = ds.projection();

        for entry in &self.entries[1..] {
            let ds = Dataset::open(&entry.path)
                .with_context(|| format!("Failed to open input raster {:?}", entry.path))?;
            let size = ds.raster_size();
            if size != (width, height) {
                bail!(
                    "Raster shape mismatch: {:?} is {}x{}, expected {}x{} from the first raster",
                    entry.path,
                    size.0,
                    size.1,
                    width,
                    height
                );
            }
        }

        Ok(GridInfo {
            width,
            height,
            geo_transform,
            projection,
        })
    }
}
