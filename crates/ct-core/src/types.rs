// crates/ct-core/src/types.rs

//! Small value types shared between the scheduler and the rest of the
//! pipeline. Kept separate from [`crate::subvolume`] because these are
//! produced by the pure scheduler, before any device or buffer exists.

use ct_gpu::DeviceId;
use serde::{Deserialize, Serialize};

/// A contiguous band of detector rows, `[top, bottom]` inclusive on both
/// ends, that a projection slab must cover to contribute to a given
/// sub-volume. `top` and `bottom` are themselves valid row indices in
/// `[0, n_col - 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowBand {
    /// First row in the band (inclusive).
    pub top: u32,
    /// Last row in the band (inclusive).
    pub bottom: u32,
}

impl RowBand {
    /// Number of rows covered by this band.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.bottom.saturating_sub(self.top) + 1
    }
}

/// The scheduler's plan for one sub-volume: where it sits in the full
/// reconstructed volume, which device will hold it, and which detector row
/// band of every projection it needs to back-project against.
///
/// Produced entirely by [`crate::subvolume`]'s pure partitioning logic — no
/// buffer is allocated until [`crate::subvolume::SubVolume::allocate`] is
/// called against a concrete [`ct_gpu::Device`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubVolumeDescriptor {
    /// Position of this sub-volume within the ordered partition of the
    /// full volume, starting at 0.
    pub index: usize,
    /// Device this sub-volume is assigned to.
    pub device: DeviceId,
    /// Voxel count along z local to this sub-volume.
    pub dim_z_local: u32,
    /// Offset along z, in voxels, from the base of the full volume.
    pub z_offset: u32,
    /// Detector row band every projection must supply for this sub-volume.
    pub row_band: RowBand,
}
