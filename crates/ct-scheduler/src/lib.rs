// crates/ct-scheduler/src/lib.rs

//! Pure volume/sub-volume partition planner.
//!
//! Consulted once, up front, to turn detector geometry and a set of device
//! memory capacities into an immutable [`SchedulePlan`]: which device each
//! sub-volume lives on, its z-extent, and the detector row band every
//! projection must supply for it. No I/O, no threads, no allocation beyond
//! the returned plan — every downstream stage treats this as a read-only
//! fact about the run.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

use anyhow::{ensure, Result};
use ct_core::{DetectorGeometry, RowBand, SubVolumeDescriptor, VolumeGeometry};
use ct_gpu::DeviceId;

/// A device's identity and memory capacity, as seen by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBudget {
    /// Stable device identifier.
    pub device: DeviceId,
    /// Total device memory available for allocation, in bytes.
    pub mem_bytes: u64,
}

/// The scheduler's immutable output: every sub-volume the run will
/// allocate, in device-assignment order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulePlan {
    /// One descriptor per sub-volume, ordered by index.
    pub sub_volumes: Vec<SubVolumeDescriptor>,
}

impl SchedulePlan {
    /// Sub-volumes assigned to a specific device, in index order.
    #[must_use]
    pub fn for_device(&self, device: DeviceId) -> Vec<&SubVolumeDescriptor> {
        self.sub_volumes.iter().filter(|sv| sv.device == device).collect()
    }
}

/// How many power-of-two sub-volumes a single device needs to hold its
/// share of the full volume without exceeding its memory.
///
/// Starts from `bytes_per_volume / n_devices` and repeatedly halves,
/// doubling the chunk count each time, until the chunk fits. Bounded by
/// `dim_z`: a sub-volume cannot be thinner than a single voxel layer, so if
/// halving would need to go past that, the device cannot hold the volume
/// at any granularity and the plan is rejected.
fn chunks_for_device(bytes_per_volume: u64, n_devices: u64, dim_z: u32, mem_bytes: u64) -> Result<u32> {
    ensure!(mem_bytes > 0, "device reports zero memory capacity");

    let mut count: u64 = 1;
    loop {
        let chunk_bytes = bytes_per_volume / (n_devices * count);
        if chunk_bytes < mem_bytes {
            break;
        }
        ensure!(
            count < u64::from(dim_z),
            "device memory ({mem_bytes} bytes) is insufficient even for a single z-layer \
             of the reconstruction volume ({bytes_per_volume} bytes total across {n_devices} device(s))"
        );
        count *= 2;
    }

    #[allow(clippy::cast_possible_truncation)]
    Ok(count as u32)
}

/// Build the execution plan for `volume` given `geo` and the ordered list
/// of device budgets. Devices receive sub-volumes in the order they
/// appear in `devices`.
///
/// # Errors
/// Returns an error if `devices` is empty, or if any device cannot hold
/// its share of the volume even at the finest halving granularity.
pub fn plan(geo: &DetectorGeometry, volume: &VolumeGeometry, devices: &[DeviceBudget]) -> Result<SchedulePlan> {
    ensure!(!devices.is_empty(), "at least one device is required to build a schedule");

    let n_devices = devices.len() as u64;
    let bytes_per_volume = volume.bytes();

    let chunks_per_device: Vec<u32> = devices
        .iter()
        .map(|d| chunks_for_device(bytes_per_volume, n_devices, volume.dim_z, d.mem_bytes))
        .collect::<Result<_>>()?;

    let total_chunks: u32 = chunks_per_device.iter().sum();
    ensure!(total_chunks > 0, "schedule produced zero sub-volumes");

    let h_mm = volume.height_mm();
    let r_max = (f64::from(volume.dim_x) * volume.l_vx_x) / 2.0;
    let d_sd = geo.d_sd();
    let delta_t_mm = geo.delta_t_mm();
    let half_col_span_mm = (f64::from(geo.n_col) * geo.l_px_col) / 2.0;
    let band_lo = -half_col_span_mm - delta_t_mm + geo.l_px_col / 2.0;
    let band_hi = band_lo + f64::from(geo.n_col - 1) * geo.l_px_col;

    let row_of = |y_mm: f64| -> f64 {
        (y_mm + half_col_span_mm + delta_t_mm) / geo.l_px_col - 0.5
    };

    let mut sub_volumes = Vec::with_capacity(total_chunks as usize);
    let mut n: u32 = 0;

    for (dev_idx, &chunk_count) in chunks_per_device.iter().enumerate() {
        let device = devices[dev_idx].device;
        for _ in 0..chunk_count {
            let z_offset = (u64::from(n) * u64::from(volume.dim_z) / u64::from(total_chunks)) as u32;
            let z_end = (u64::from(n + 1) * u64::from(volume.dim_z) / u64::from(total_chunks)) as u32;
            let dim_z_local = z_end - z_offset;

            let top = -h_mm / 2.0 + (f64::from(n) / f64::from(total_chunks)) * h_mm;
            let bottom = -h_mm / 2.0 + (f64::from(n + 1) / f64::from(total_chunks)) * h_mm;

            let top_virt = top * d_sd / (geo.d_so.abs() + if top < 0.0 { -r_max } else { r_max });
            let bottom_virt = bottom * d_sd / (geo.d_so.abs() + if bottom < 0.0 { r_max } else { -r_max });

            let top_clamped = top_virt.clamp(band_lo, band_hi);
            let bottom_clamped = bottom_virt.clamp(band_lo, band_hi);

            let row_top = row_of(top_clamped).floor().clamp(0.0, f64::from(geo.n_col - 1));
            let row_bottom = row_of(bottom_clamped).ceil().clamp(0.0, f64::from(geo.n_col - 1));

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let row_band = RowBand {
                top: row_top as u32,
                bottom: row_bottom as u32,
            };

            sub_volumes.push(SubVolumeDescriptor {
                index: n as usize,
                device,
                dim_z_local,
                z_offset,
                row_band,
            });

            n += 1;
        }
    }

    Ok(SchedulePlan { sub_volumes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_geometry() -> DetectorGeometry {
        DetectorGeometry {
            n_row: 32,
            n_col: 32,
            l_px_row: 1.0,
            l_px_col: 1.0,
            delta_s: 0.0,
            delta_t: 0.0,
            d_so: 100.0,
            d_od: 100.0,
            n_proj: 1,
            rot_angle: 0.0,
        }
    }

    fn small_volume(geo: &DetectorGeometry) -> VolumeGeometry {
        ct_core::calculate_volume_geometry(geo).unwrap()
    }

    #[test]
    fn partition_is_complete_and_non_overlapping() {
        let geo = small_geometry();
        let vol = small_volume(&geo);
        let devices = [DeviceBudget { device: 0, mem_bytes: 1 << 30 }];
        let p = plan(&geo, &vol, &devices).unwrap();

        let total: u32 = p.sub_volumes.iter().map(|sv| sv.dim_z_local).sum();
        assert_eq!(total, vol.dim_z);

        let mut sorted = p.sub_volumes.clone();
        sorted.sort_by_key(|sv| sv.z_offset);
        let mut expect_offset = 0u32;
        for sv in &sorted {
            assert_eq!(sv.z_offset, expect_offset);
            expect_offset += sv.dim_z_local;
        }
    }

    #[test]
    fn row_bounds_are_monotone_and_in_range() {
        let geo = small_geometry();
        let vol = small_volume(&geo);
        let devices = [DeviceBudget { device: 0, mem_bytes: 1 << 30 }];
        let p = plan(&geo, &vol, &devices).unwrap();
        for sv in &p.sub_volumes {
            assert!(sv.row_band.top <= sv.row_band.bottom);
            assert!(sv.row_band.bottom <= geo.n_col - 1);
        }
    }

    #[test]
    fn two_devices_each_holding_half_split_evenly() {
        // S4: two devices, each with exactly half the volume's memory,
        // should each take a single sub-volume covering half of dim_z.
        let geo = small_geometry();
        let vol = small_volume(&geo);
        let half = vol.bytes() / 2;
        let devices = [
            DeviceBudget { device: 0, mem_bytes: half + 1 },
            DeviceBudget { device: 1, mem_bytes: half + 1 },
        ];
        let p = plan(&geo, &vol, &devices).unwrap();

        assert_eq!(p.for_device(0).len(), 1);
        assert_eq!(p.for_device(1).len(), 1);
        assert_eq!(p.for_device(0)[0].dim_z_local, vol.dim_z / 2);
        assert_eq!(p.for_device(1)[0].z_offset, vol.dim_z / 2);
    }

    #[test]
    fn single_device_with_a_quarter_of_memory_splits_into_four() {
        // S5: a device with comfortably less than half, but comfortably
        // more than an eighth, of the volume's memory lands on 4 chunks.
        let geo = small_geometry();
        let vol = small_volume(&geo);
        let mem = vol.bytes() / 3;
        let devices = [DeviceBudget { device: 0, mem_bytes: mem }];
        let p = plan(&geo, &vol, &devices).unwrap();

        assert_eq!(p.sub_volumes.len(), 4);
        for sv in &p.sub_volumes {
            assert_eq!(sv.dim_z_local, vol.dim_z / 4);
        }
    }

    #[test]
    fn insufficient_memory_even_at_finest_granularity_is_rejected() {
        let geo = small_geometry();
        let vol = small_volume(&geo);
        let devices = [DeviceBudget { device: 0, mem_bytes: 1 }];
        assert!(plan(&geo, &vol, &devices).is_err());
    }

    #[test]
    fn no_devices_is_rejected() {
        let geo = small_geometry();
        let vol = small_volume(&geo);
        assert!(plan(&geo, &vol, &[]).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// §8 properties 2/3, generalized: for any detector geometry and
        /// any per-device memory budget generous enough to admit a plan,
        /// the resulting sub-volumes tile `dim_z` exactly with no gaps or
        /// overlaps, and every row band is in-range and non-inverted.
        #[test]
        fn partition_is_always_complete_and_ordered(
            n_row in 16u32..64,
            n_col in 64u32..256,
            l_px in 0.2f64..2.0,
            d_so in 50.0f64..500.0,
            d_od in 50.0f64..500.0,
            n_devices in 1usize..4,
            halving_k in 0u32..3,
        ) {
            let geo = DetectorGeometry {
                n_row,
                n_col,
                l_px_row: l_px,
                l_px_col: l_px,
                delta_s: 0.0,
                delta_t: 0.0,
                d_so,
                d_od,
                n_proj: 1,
                rot_angle: 0.0,
            };
            let Ok(vol) = ct_core::calculate_volume_geometry(&geo) else {
                return Ok(());
            };
            prop_assume!(vol.dim_z >= (1u32 << halving_k) * 2);

            let divisor = n_devices as u64 * (1u64 << halving_k);
            let mem_per_device = (vol.bytes() / divisor).max(1);
            let devices: Vec<DeviceBudget> = (0..n_devices as u32)
                .map(|d| DeviceBudget { device: d, mem_bytes: mem_per_device })
                .collect();

            let Ok(p) = plan(&geo, &vol, &devices) else {
                return Ok(());
            };

            let total: u32 = p.sub_volumes.iter().map(|sv| sv.dim_z_local).sum();
            prop_assert_eq!(total, vol.dim_z);

            let mut sorted = p.sub_volumes.clone();
            sorted.sort_by_key(|sv| sv.z_offset);
            let mut expect_offset = 0u32;
            for sv in &sorted {
                prop_assert_eq!(sv.z_offset, expect_offset);
                expect_offset += sv.dim_z_local;
            }

            for sv in &p.sub_volumes {
                prop_assert!(sv.row_band.top <= sv.row_band.bottom);
                prop_assert!(sv.row_band.bottom <= geo.n_col - 1);
            }
        }
    }
}
