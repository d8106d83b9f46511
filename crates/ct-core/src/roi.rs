// crates/ct-core/src/roi.rs

//! Region-of-interest shrinking of a reconstructed volume geometry.

use crate::geometry::VolumeGeometry;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An axis-aligned region of interest, in voxel coordinates of the full
/// (un-shrunk) volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// Lower x bound (inclusive).
    pub x1: u32,
    /// Upper x bound (exclusive).
    pub x2: u32,
    /// Lower y bound (inclusive).
    pub y1: u32,
    /// Upper y bound (exclusive).
    pub y2: u32,
    /// Lower z bound (inclusive).
    pub z1: u32,
    /// Upper z bound (exclusive).
    pub z2: u32,
}

impl Roi {
    /// Shrink `volume` to this ROI.
    ///
    /// Per the engine specification §3/§7: a malformed ROI (`lo >= hi` on
    /// any axis, or one that would *expand* the volume rather than shrink
    /// it) is never fatal — it is silently ignored and a warning is
    /// emitted, and the original geometry is returned unchanged.
    #[must_use]
    pub fn apply(&self, volume: &VolumeGeometry) -> VolumeGeometry {
        let well_formed = self.x1 < self.x2 && self.y1 < self.y2 && self.z1 < self.z2;
        let new_dim_x = self.x2.saturating_sub(self.x1);
        let new_dim_y = self.y2.saturating_sub(self.y1);
        let new_dim_z = self.z2.saturating_sub(self.z1);
        let shrinks = new_dim_x <= volume.dim_x
            && new_dim_y <= volume.dim_y
            && new_dim_z <= volume.dim_z;

        if !well_formed || !shrinks {
            warn!(
                ?self,
                dim_x = volume.dim_x,
                dim_y = volume.dim_y,
                dim_z = volume.dim_z,
                "region of interest is malformed or would expand the volume; ignoring ROI"
            );
            return *volume;
        }

        VolumeGeometry {
            dim_x: new_dim_x,
            dim_y: new_dim_y,
            dim_z: new_dim_z,
            ..*volume
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> VolumeGeometry {
        VolumeGeometry {
            dim_x: 100,
            dim_y: 100,
            dim_z: 100,
            l_vx_x: 0.5,
            l_vx_y: 0.5,
            l_vx_z: 0.5,
        }
    }

    #[test]
    fn well_formed_roi_shrinks() {
        let roi = Roi { x1: 10, x2: 60, y1: 0, y2: 50, z1: 5, z2: 20 };
        let v = roi.apply(&volume());
        assert_eq!((v.dim_x, v.dim_y, v.dim_z), (50, 50, 15));
    }

    #[test]
    fn inverted_roi_is_ignored() {
        let roi = Roi { x1: 60, x2: 10, y1: 0, y2: 50, z1: 5, z2: 20 };
        let v = roi.apply(&volume());
        assert_eq!(v, volume());
    }

    #[test]
    fn expanding_roi_is_ignored() {
        let roi = Roi { x1: 0, x2: 200, y1: 0, y2: 50, z1: 5, z2: 20 };
        let v = roi.apply(&volume());
        assert_eq!(v, volume());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any well-formed ROI (both bounds ordered, entirely inside the
        /// volume) shrinks the volume — it never grows any axis.
        #[test]
        fn well_formed_roi_never_expands(
            x1 in 0u32..50, dx in 1u32..50,
            y1 in 0u32..50, dy in 1u32..50,
            z1 in 0u32..50, dz in 1u32..50,
        ) {
            let vol = volume();
            let roi = Roi { x1, x2: x1 + dx, y1, y2: y1 + dy, z1, z2: z1 + dz };
            let shrunk = roi.apply(&vol);
            prop_assert!(shrunk.dim_x <= vol.dim_x);
            prop_assert!(shrunk.dim_y <= vol.dim_y);
            prop_assert!(shrunk.dim_z <= vol.dim_z);
        }
    }
}
