// crates/ct-core/src/subvolume.rs

//! Device-backed sub-volumes, allocated from a [`SubVolumeDescriptor`].
//!
//! The scheduler (see `ct-scheduler`) only ever produces descriptors —
//! plain values with no device buffer attached, so partitioning stays pure
//! and testable without a `Device` in scope. Turning a descriptor into an
//! actual allocation is a separate, explicit step performed here, once a
//! concrete device is available.

use crate::types::SubVolumeDescriptor;
use anyhow::{Context, Result};
use ct_gpu::{Buffer3D, Device};

/// A sub-volume with its backing device buffer allocated and zeroed,
/// ready to accumulate back-projected contributions.
pub struct SubVolume {
    /// The descriptor this sub-volume was allocated from.
    pub descriptor: SubVolumeDescriptor,
    /// Voxel count along x.
    pub dim_x: usize,
    /// Voxel count along y.
    pub dim_y: usize,
    /// Backing device buffer.
    pub buffer: Box<dyn Buffer3D>,
}

impl SubVolumeDescriptor {
    /// Allocate this descriptor's sub-volume on `device`.
    ///
    /// `dim_x`/`dim_y` come from the full volume geometry (sub-volumes
    /// only split along z); `self.dim_z_local` is this slab's own z
    /// extent.
    ///
    /// # Errors
    /// Returns an error if the device cannot satisfy the allocation.
    pub fn allocate(&self, device: &dyn Device, dim_x: usize, dim_y: usize) -> Result<SubVolume> {
        let buffer = device
            .alloc_3d(dim_x, dim_y, self.dim_z_local as usize)
            .with_context(|| {
                format!(
                    "allocating sub-volume {} ({dim_x}x{dim_y}x{}) on device {}",
                    self.index, self.dim_z_local, self.device
                )
            })?;

        Ok(SubVolume {
            descriptor: *self,
            dim_x,
            dim_y,
            buffer,
        })
    }
}

impl SubVolume {
    /// Zero every voxel in this sub-volume's buffer.
    pub fn clear(&mut self) {
        self.buffer.zero();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowBand;
    use ct_gpu::cpu::CpuDevice;

    #[test]
    fn allocation_matches_descriptor_dims() {
        let desc = SubVolumeDescriptor {
            index: 0,
            device: 0,
            dim_z_local: 8,
            z_offset: 0,
            row_band: RowBand { top: 0, bottom: 16 },
        };
        let dev = CpuDevice::new(0, 1 << 30);
        let sv = desc.allocate(&dev, 32, 32).unwrap();
        assert_eq!(sv.buffer.dim_x(), 32);
        assert_eq!(sv.buffer.dim_y(), 32);
        assert_eq!(sv.buffer.dim_z_local(), 8);
    }
}
