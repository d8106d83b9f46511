// crates/ct-backproject/src/lib.rs

//! Back-projection: the terminal stage of the pipeline. Accumulates every
//! projection's contribution into the sub-volumes owned by one device,
//! then participates in the final device-to-host merge.
//!
//! Back-projection doesn't fit the simple one-in-one-out [`ct_pipeline::Stage`]
//! shape — a single projection fans out across every sub-volume a device
//! owns, and nothing is forwarded downstream — so this crate drives its
//! own worker loop directly on top of [`ct_pipeline`]'s queue primitives.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::{Context, Result};
use ct_core::{AngleTable, DetectorGeometry, Projection, SubVolume, VolumeGeometry};
use ct_gpu::Buffer2D;
use ct_pipeline::PipelineItem;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Sample `proj` at fractional detector coordinate `(h, v)` (pixel units)
/// using bilinear interpolation.
///
/// Each of the four integer corners is weighted by the fraction along the
/// opposite axis; a corner outside `[0, width) x [0, height)` contributes
/// zero rather than being clamped or wrapped.
#[must_use]
pub fn bilinear(proj: &dyn Buffer2D, h: f32, v: f32) -> f32 {
    let width = proj.width() as isize;
    let height = proj.height() as isize;
    let data = proj.as_slice();

    let h0 = h.floor();
    let h1 = h.ceil();
    let v0 = v.floor();
    let v1 = v.ceil();

    let wh = h - h0;
    let wv = v - v0;

    let sample = |x: f32, y: f32| -> f32 {
        let xi = x as isize;
        let yi = y as isize;
        if xi < 0 || xi >= width || yi < 0 || yi >= height {
            0.0
        } else {
            data[(yi as usize) * (width as usize) + xi as usize]
        }
    };

    let c00 = sample(h0, v0) * (1.0 - wh) * (1.0 - wv);
    let c10 = sample(h1, v0) * wh * (1.0 - wv);
    let c01 = sample(h0, v1) * (1.0 - wh) * wv;
    let c11 = sample(h1, v1) * wh * wv;

    c00 + c10 + c01 + c11
}

/// Accumulate one projection's contribution into every voxel of `sv`.
///
/// Per-voxel kernel (see the module documentation for the derivation):
/// `vol[k,l,m] += 0.5 * bilinear(proj, h, v) * u^2`, where `u` and the
/// detector coordinates follow from the cone-beam projection geometry at
/// angle `phi` (supplied here as `sin_phi`/`cos_phi`, looked up once per
/// projection from the shared [`AngleTable`]).
///
/// Single-precision throughout, per the engine specification.
pub fn back_project_into(
    sv: &mut SubVolume,
    proj: &dyn Buffer2D,
    sin_phi: f64,
    cos_phi: f64,
    geo: &DetectorGeometry,
    vol: &VolumeGeometry,
) -> Result<()> {
    let dim_x = sv.dim_x;
    let dim_y = sv.dim_y;
    let dim_z_local = sv.descriptor.dim_z_local as usize;
    let z_offset = sv.descriptor.z_offset as usize;

    let s = vol.l_vx_x;
    let t_step = vol.l_vx_y;
    let u_step = vol.l_vx_z;

    let d_sd = geo.d_sd();
    let d_so = geo.d_so;
    let h_min = geo.delta_s_mm() - f64::from(geo.n_row) * geo.l_px_row / 2.0;
    let v_min = geo.delta_t_mm() - f64::from(geo.n_col) * geo.l_px_col / 2.0;

    let dim_x_f = dim_x as f64;
    let dim_y_f = dim_y as f64;
    let dim_z_f = f64::from(vol.dim_z);

    for m in 0..dim_z_local {
        let global_z = m + z_offset;
        let z = -(dim_z_f * u_step / 2.0) + u_step / 2.0 + (global_z as f64) * u_step;

        for l in 0..dim_y {
            let y = -(dim_y_f * t_step / 2.0) + t_step / 2.0 + (l as f64) * t_step;

            for k in 0..dim_x {
                let x = -(dim_x_f * s / 2.0) + s / 2.0 + (k as f64) * s;

                let big_s = x * cos_phi + y * sin_phi;
                let big_t = -x * sin_phi + y * cos_phi;
                let factor = d_sd / (big_s - d_so);

                let h_mm = big_t * factor;
                let v_mm = z * factor;

                let h_px = ((h_mm - h_min) / geo.l_px_row - 0.5) as f32;
                let v_px = ((v_mm - v_min) / geo.l_px_col - 0.5) as f32;

                let det = bilinear(proj, h_px, v_px);
                let u = d_so / (big_s - d_so);

                let idx = sv.buffer.dim_x() * sv.buffer.dim_y() * m + sv.buffer.dim_x() * l + k;
                let contribution = 0.5 * f64::from(det) * u * u;
                sv.buffer.as_mut_slice()[idx] += contribution as f32;
            }
        }
    }

    Ok(())
}

/// Drive one device's back-projection worker to completion.
///
/// Allocates nothing: `sub_volumes` must already be allocated and zeroed.
/// Consumes projections from `rx` until the sentinel, back-projecting each
/// into every owned sub-volume, then returns the sub-volumes for the merge
/// phase.
///
/// # Errors
/// Returns an error if a projection's stream fails to synchronize.
#[instrument(skip(sub_volumes, angle_table, rx), fields(n_subvolumes = sub_volumes.len()))]
pub fn run_worker(
    mut sub_volumes: Vec<SubVolume>,
    geo: DetectorGeometry,
    vol: VolumeGeometry,
    angle_table: Arc<AngleTable>,
    rx: Receiver<PipelineItem<Projection>>,
) -> Result<Vec<SubVolume>> {
    loop {
        match rx.recv() {
            Ok(PipelineItem::Data(projection)) => {
                let sin_phi = angle_table.sin_phi(projection.index);
                let cos_phi = angle_table.cos_phi(projection.index);

                for sv in &mut sub_volumes {
                    back_project_into(sv, projection.buffer.as_ref(), sin_phi, cos_phi, &geo, &vol)?;
                }

                projection
                    .stream
                    .synchronize()
                    .with_context(|| format!("synchronizing stream after back-projecting projection {}", projection.index))?;
            }
            Ok(PipelineItem::End) | Err(_) => {
                debug!("back-projection worker observed end of stream");
                break;
            }
        }
    }
    Ok(sub_volumes)
}

/// Merge every device's sub-volumes into one contiguous host-side volume,
/// writing device-disjoint z-slabs in strict z-ascending order.
///
/// # Errors
/// Returns an error if the sub-volumes don't exactly tile `vol` (a
/// scheduling bug upstream, not a runtime condition).
pub fn merge_into_host(vol: &VolumeGeometry, sub_volumes: &[SubVolume]) -> Result<Vec<f32>> {
    let mut ordered: Vec<&SubVolume> = sub_volumes.iter().collect();
    ordered.sort_by_key(|sv| sv.descriptor.z_offset);

    let mut host = vec![0.0_f32; vol.voxel_count() as usize];
    let plane = vol.dim_x as usize * vol.dim_y as usize;

    let mut expected_offset = 0u32;
    for sv in ordered {
        anyhow::ensure!(
            sv.descriptor.z_offset == expected_offset,
            "sub-volume z-offset {} does not follow expected {expected_offset}; partition is not contiguous",
            sv.descriptor.z_offset
        );
        let start = sv.descriptor.z_offset as usize * plane;
        let len = sv.descriptor.dim_z_local as usize * plane;
        host[start..start + len].copy_from_slice(sv.buffer.as_slice());
        expected_offset += sv.descriptor.dim_z_local;
    }

    anyhow::ensure!(expected_offset == vol.dim_z, "merged sub-volumes do not cover the full volume");

    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct_core::types::{RowBand, SubVolumeDescriptor};
    use ct_gpu::cpu::{CpuBuffer2D, CpuDevice};

    fn geo() -> DetectorGeometry {
        DetectorGeometry {
            n_row: 8,
            n_col: 8,
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

    fn volume() -> VolumeGeometry {
        VolumeGeometry { dim_x: 4, dim_y: 4, dim_z: 4, l_vx_x: 1.0, l_vx_y: 1.0, l_vx_z: 1.0 }
    }

    fn fresh_subvolume(dim_z_local: u32, z_offset: u32) -> SubVolume {
        let desc = SubVolumeDescriptor {
            index: 0,
            device: 0,
            dim_z_local,
            z_offset,
            row_band: RowBand { top: 0, bottom: 7 },
        };
        let dev = CpuDevice::new(0, 1 << 30);
        desc.allocate(&dev, 4, 4).unwrap()
    }

    #[test]
    fn bilinear_out_of_bounds_is_zero() {
        let buf = CpuBuffer2D::from_vec(4, 4, vec![1.0; 16]);
        assert_eq!(bilinear(&buf, -1.0, 0.0), 0.0);
        assert_eq!(bilinear(&buf, 0.0, 10.0), 0.0);
        assert!(bilinear(&buf, -5.0, -5.0).is_finite());
    }

    #[test]
    fn bilinear_interior_interpolates() {
        let buf = CpuBuffer2D::from_vec(2, 2, vec![0.0, 2.0, 0.0, 2.0]);
        let mid = bilinear(&buf, 0.5, 0.0);
        assert!((mid - 1.0).abs() < 1e-6);
    }

    #[test]
    fn back_projection_is_linear_in_the_projection() {
        let geo = geo();
        let vol = volume();
        let p = CpuBuffer2D::from_vec(8, 8, vec![0.3; 64]);
        let q = CpuBuffer2D::from_vec(8, 8, vec![0.7; 64]);
        let alpha = 2.0_f32;

        let sum_combined = CpuBuffer2D::from_vec(8, 8, p.as_slice().iter().zip(q.as_slice()).map(|(a, b)| alpha * a + b).collect());

        let mut sv_combined = fresh_subvolume(4, 0);
        back_project_into(&mut sv_combined, &sum_combined, 0.3, 0.95, &geo, &vol).unwrap();

        let mut sv_p = fresh_subvolume(4, 0);
        back_project_into(&mut sv_p, &p, 0.3, 0.95, &geo, &vol).unwrap();
        let mut sv_q = fresh_subvolume(4, 0);
        back_project_into(&mut sv_q, &q, 0.3, 0.95, &geo, &vol).unwrap();

        for i in 0..sv_combined.buffer.as_slice().len() {
            let lhs = sv_combined.buffer.as_slice()[i];
            let rhs = alpha * sv_p.buffer.as_slice()[i] + sv_q.buffer.as_slice()[i];
            assert!((lhs - rhs).abs() < 1e-3, "index {i}: {lhs} vs {rhs}");
        }
    }

    #[test]
    fn merge_concatenates_slabs_in_z_order() {
        let vol = VolumeGeometry { dim_x: 2, dim_y: 2, dim_z: 2, l_vx_x: 1.0, l_vx_y: 1.0, l_vx_z: 1.0 };
        let dev = CpuDevice::new(0, 1 << 30);

        let lower = SubVolumeDescriptor { index: 0, device: 0, dim_z_local: 1, z_offset: 0, row_band: RowBand { top: 0, bottom: 1 } }
            .allocate(&dev, 2, 2)
            .map(|mut sv| { sv.buffer.as_mut_slice().iter_mut().for_each(|v| *v = 1.0); sv })
            .unwrap();
        let upper = SubVolumeDescriptor { index: 1, device: 0, dim_z_local: 1, z_offset: 1, row_band: RowBand { top: 0, bottom: 1 } }
            .allocate(&dev, 2, 2)
            .map(|mut sv| { sv.buffer.as_mut_slice().iter_mut().for_each(|v| *v = 2.0); sv })
            .unwrap();

        let host = merge_into_host(&vol, &[upper, lower]).unwrap();
        assert_eq!(&host[0..4], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&host[4..8], &[2.0, 2.0, 2.0, 2.0]);
    }
}
