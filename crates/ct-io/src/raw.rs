// crates/ct-io/src/raw.rs

//! A minimal raw little-endian `f32` plane format, used as the reference
//! `ProjectionSource` / `VolumeSink` collaborator.
//!
//! Per the engine specification's scope (§1), this workspace does not
//! reimplement TIFF/HIS readers or a production volume-writer format —
//! those stay external collaborators. This is a stand-in simple enough to
//! make the engine runnable end-to-end on synthetic or converted data.
//!
//! Projection format: one file per projection in a directory, named so
//! that lexicographic order is acquisition order, each file containing
//! exactly `width * height` `f32` little-endian samples, row-major, no
//! header. Volume format: a 12-byte header (`dim_x`, `dim_y`, `dim_z`, each
//! `u32` little-endian) followed by `dim_x * dim_y * dim_z` `f32`
//! little-endian samples, row-major `(z, y, x)`.

use anyhow::{ensure, Context, Result};
use ct_engine::{ProjectionSource, RawFrame, VolumeSink};
use std::fs;
use std::io::{Read, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

/// Reads projections from a directory of raw `f32` plane files, in
/// lexicographic filename order.
pub struct RawProjectionSource {
    width: usize,
    height: usize,
    files: Vec<PathBuf>,
    next: usize,
}

impl RawProjectionSource {
    /// Open `dir`, collecting every `.raw` file as one projection.
    ///
    /// # Errors
    /// Returns an error if `dir` cannot be read.
    pub fn open(dir: &Path, width: usize, height: usize) -> Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("reading projection directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("raw"))
            .collect();
        files.sort();

        Ok(Self { width, height, files, next: 0 })
    }
}

impl ProjectionSource for RawProjectionSource {
    fn n_proj(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.files.len() as u32
        }
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.next >= self.files.len() {
            return Ok(None);
        }

        let path = &self.files[self.next];
        let mut bytes = Vec::new();
        fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .with_context(|| format!("reading projection file {}", path.display()))?;

        let expected_len = self.width * self.height * size_of::<f32>();
        ensure!(
            bytes.len() == expected_len,
            "{}: expected {expected_len} bytes ({}x{} f32 samples), found {}",
            path.display(),
            self.width,
            self.height,
            bytes.len()
        );

        let data: Vec<f32> = bytes
            .chunks_exact(size_of::<f32>())
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let frame = RawFrame { index: self.next, width: self.width, height: self.height, data };
        self.next += 1;
        Ok(Some(frame))
    }
}

/// Writes the finished volume to a single raw file with a small fixed
/// header.
pub struct RawVolumeSink {
    path: PathBuf,
}

impl RawVolumeSink {
    /// Target the sink at `path`; the file is created (or truncated) on
    /// the first [`VolumeSink::write_volume`] call.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl VolumeSink for RawVolumeSink {
    fn write_volume(&mut self, dim_x: u32, dim_y: u32, dim_z: u32, data: &[f32]) -> Result<()> {
        ensure!(
            data.len() == (dim_x as usize) * (dim_y as usize) * (dim_z as usize),
            "volume data length {} does not match {dim_x}x{dim_y}x{dim_z}",
            data.len()
        );

        let mut out = fs::File::create(&self.path)
            .with_context(|| format!("creating volume output file {}", self.path.display()))?;

        out.write_all(&dim_x.to_le_bytes())?;
        out.write_all(&dim_y.to_le_bytes())?;
        out.write_all(&dim_z.to_le_bytes())?;
        for &v in data {
            out.write_all(&v.to_le_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}
