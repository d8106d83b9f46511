// crates/ct-gpu/src/lib.rs

//! Collaborator boundary for the low-level GPU runtime.
//!
//! The reconstruction engine is GPU-native (device memory, per-projection
//! streams, pitched 2-D/3-D allocations), but the runtime wrappers that
//! actually talk to CUDA/ROCm/Metal are out of scope for this crate (see
//! the engine specification, §1). [`Device`], [`Stream`], [`Buffer2D`] and
//! [`Buffer3D`] are the seam: anything upstream only ever programs against
//! these traits. [`cpu::CpuDevice`] is the one concrete implementation
//! shipped here — a reference backend for tests and small runs, not the
//! design target (a real backend would allocate pinned/pitched device
//! memory and bind kernels; the CPU backend just owns a `Vec<f32>`).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

pub mod cpu;

use anyhow::Result;
use std::sync::Arc;

/// Ordinal identifying a compute device within the system.
pub type DeviceId = u32;

/// A GPU stream: an ordering domain for asynchronous kernel launches.
///
/// Work enqueued on the same stream executes in submission order; work on
/// different streams is unordered absent explicit synchronization.
pub trait Stream: Send + Sync {
    /// Block the calling thread until every operation enqueued on this
    /// stream so far has completed.
    ///
    /// # Errors
    /// Returns an error if the underlying runtime reports a fault for any
    /// operation that was in flight on this stream.
    fn synchronize(&self) -> Result<()>;
}

/// A pitched 2-D device buffer of `f32` samples (one projection plane).
pub trait Buffer2D: Send {
    /// Pixel width (detector row count).
    fn width(&self) -> usize;
    /// Pixel height (detector column count).
    fn height(&self) -> usize;
    /// Row stride in bytes (`>= width * size_of::<f32>()`).
    fn pitch_bytes(&self) -> usize;
    /// Read-only view of the buffer, row-major, `width` samples per row.
    fn as_slice(&self) -> &[f32];
    /// Mutable view of the buffer, row-major, `width` samples per row.
    fn as_mut_slice(&mut self) -> &mut [f32];
}

/// A pitched 3-D device buffer of `f32` voxels (one sub-volume).
pub trait Buffer3D: Send {
    /// Voxel count along x.
    fn dim_x(&self) -> usize;
    /// Voxel count along y.
    fn dim_y(&self) -> usize;
    /// Voxel count along z, local to this sub-volume.
    fn dim_z_local(&self) -> usize;
    /// Row stride in bytes for the x dimension.
    fn pitch_bytes(&self) -> usize;
    /// Read-only view, row-major `(z, y, x)`.
    fn as_slice(&self) -> &[f32];
    /// Mutable view, row-major `(z, y, x)`.
    fn as_mut_slice(&mut self) -> &mut [f32];
    /// Zero every voxel.
    fn zero(&mut self) {
        self.as_mut_slice().iter_mut().for_each(|v| *v = 0.0);
    }
}

/// A compute device: owns memory and streams.
pub trait Device: Send + Sync {
    /// Stable identifier for this device within the process.
    fn id(&self) -> DeviceId;

    /// Total device memory available for allocation, in bytes.
    fn global_mem_bytes(&self) -> u64;

    /// Create a new stream bound to this device.
    fn new_stream(&self) -> Arc<dyn Stream>;

    /// Allocate a zeroed pitched 2-D buffer.
    ///
    /// # Errors
    /// Returns an error if the allocation cannot be satisfied.
    fn alloc_2d(&self, width: usize, height: usize) -> Result<Box<dyn Buffer2D>>;

    /// Allocate a zeroed pitched 3-D buffer.
    ///
    /// # Errors
    /// Returns an error if the allocation cannot be satisfied.
    fn alloc_3d(&self, dim_x: usize, dim_y: usize, dim_z_local: usize)
        -> Result<Box<dyn Buffer3D>>;
}
