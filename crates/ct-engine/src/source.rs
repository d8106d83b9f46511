// crates/ct-engine/src/source.rs

//! The two collaborator seams the engine is handed at run time: a stream
//! of acquired projections, and a sink for the finished volume.
//!
//! Neither trait knows anything about devices, streams or pitched memory
//! — that staging is the engine's job (see [`crate::run`]). A source just
//! hands back plain host-side pixel data in acquisition order; a sink just
//! receives the finished host-side volume once, at the end.

use anyhow::Result;

/// One acquired projection's raw pixel data, row-major `width x height`,
/// not yet uploaded to any device.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Position of this projection in the acquisition order.
    pub index: usize,
    /// Detector row count.
    pub width: usize,
    /// Detector column count.
    pub height: usize,
    /// Row-major pixel data, length `width * height`.
    pub data: Vec<f32>,
}

/// An ordered stream of projections, acquired at known angles on a
/// circular trajectory.
///
/// Per the engine's external-interface contract, [`ProjectionSource::n_proj`]
/// must be answerable before the first call to
/// [`ProjectionSource::next_frame`] — the engine needs it to build the
/// angle table before any back-projection kernel can launch.
pub trait ProjectionSource: Send {
    /// Number of projections this source will yield. Must be stable for
    /// the lifetime of the source.
    fn n_proj(&self) -> u32;

    /// Pull the next frame, in acquisition order.
    ///
    /// # Errors
    /// Returns an error on any I/O or decode failure from the underlying
    /// collaborator.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// Receives the single, completed, host-side reconstructed volume.
///
/// No partial/streaming delivery: the engine merges every device's
/// sub-volumes first and hands over one contiguous buffer.
pub trait VolumeSink {
    /// Write the finished volume. `data` is row-major `(z, y, x)`, length
    /// `dim_x * dim_y * dim_z`.
    ///
    /// # Errors
    /// Returns an error on any I/O failure from the underlying
    /// collaborator.
    fn write_volume(&mut self, dim_x: u32, dim_y: u32, dim_z: u32, data: &[f32]) -> Result<()>;
}
