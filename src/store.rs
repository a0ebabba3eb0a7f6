//! Index-addressed intermediate artifact store.
//!
//! Each strip persists its smoothed values for every output day as one raw
//! little-endian f32 file keyed by (strip index, day index), alongside a JSON
//! description of the run. Writers are partitioned by strip and never touch
//! another strip's keys, so no locking is needed; readers (reassembly) only
//! start once every key exists.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Shape and plan of the run that produced the artifacts, written at run
/// start so a resumed or inspected store is self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub width: usize,
    pub height: usize,
    pub strip_widths: Vec<usize>,
    pub n_days: usize,
    pub output_day_start: usize,
    pub dates: Vec<u32>,
}

/// Filesystem-backed store of per-(strip, day) smoothed rows.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Opens (creating if needed) the store directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create artifact directory {:?}", dir))?;
        Ok(ArtifactStore {
            dir: dir.to_path_buf(),
        })
    }

    /// Removes every artifact of a previous run. A fresh full run starts here
    /// so a stale strip can never merge silently into new output.
    pub fn wipe(&self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir)
            .with_context(|| format!("Failed to clear artifact directory {:?}", self.dir))?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to recreate artifact directory {:?}", self.dir))?;
        Ok(())
    }

    fn artifact_path(&self, strip: usize, day: usize) -> PathBuf {
        self.dir.join(format!("strip{}_day{}.bin", strip, day))
    }

    pub fn exists(&self, strip: usize, day: usize) -> bool {
        self.artifact_path(strip, day).exists()
    }

    /// True when a strip has persisted artifacts for every day in `days`,
    /// meaning a resumed run can skip recomputing it.
    pub fn is_strip_complete(&self, strip: usize, days: Range<usize>) -> bool {
        days.into_iter().all(|day| self.exists(strip, day))
    }

    /// First (strip, day) pair with no artifact, if any. Reassembly must not
    /// start while this returns `Some`.
    pub fn first_missing(&self, strips: usize, days: Range<usize>) -> Option<(usize, usize)> {
        for strip in 0..strips {
            for day in days.clone() {
                if !self.exists(strip, day) {
                    return Some((strip, day));
                }
            }
        }
        None
    }

    /// Persists one strip's smoothed values for one day.
    pub fn write(&self, strip: usize, day: usize, values: &[f32]) -> Result<()> {
        let path = self.artifact_path(strip, day);
        let mut file = File::create(&path)
            .with_context(|| format!("Failed to create artifact {:?}", path))?;
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        file.write_all(&bytes)
            .with_context(|| format!("Failed to write artifact {:?}", path))?;
        Ok(())
    }

    /// Reads one artifact back, checking the expected element count.
    pub fn read(&self, strip: usize, day: usize, expected_len: usize) -> Result<Vec<f32>> {
        let path = self.artifact_path(strip, day);
        let bytes = std::fs::read(&path).with_context(|| {
            format!(
                "Missing or unreadable artifact for strip {} day {} ({:?})",
                strip, day, path
            )
        })?;
        if bytes.len() != expected_len * 4 {
            bail!(
                "Artifact for strip {} day {} holds {} bytes, expected {}",
                strip,
                day,
                bytes.len(),
                expected_len * 4
            );
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Writes the run description next to the artifacts.
    pub fn write_metadata(&self, metadata: &RunMetadata) -> Result<()> {
        let path = self.dir.join("run_metadata.json");
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write run metadata {:?}", path))?;
        Ok(())
    }
}
