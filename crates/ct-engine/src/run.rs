// crates/ct-engine/src/run.rs

//! End-to-end orchestration: scheduler plan, device allocation, pipeline
//! wiring, and the final merge.
//!
//! Stage fan-out follows the engine specification's concurrency model
//! with one simplification: weighting and filtering run as a single
//! worker pool shared across every device (their kernels are pure
//! functions of geometry, not of which device owns the buffer, so the
//! only place device-exclusive parallelism actually matters is
//! back-projection, where each device owns disjoint sub-volumes). A
//! deployment with heterogeneous per-device geometry would split those
//! stages per device too; this reference engine has no such case.

use crate::source::{ProjectionSource, RawFrame, VolumeSink};
use anyhow::{Context, Result};
use ct_core::{AngleTable, DetectorGeometry, Projection, Roi, SubVolume};
use ct_filter::{FilterStage, RampFilter};
use ct_gpu::{Device, DeviceId};
use ct_pipeline::{join_all, recommended_capacity, spawn_stage, BoundedQueue, PipelineItem};
use ct_scheduler::DeviceBudget;
use ct_weighting::WeightingStage;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing::{info, instrument};

/// Static configuration for one reconstruction run.
#[derive(Clone, Debug)]
pub struct ReconstructionConfig {
    /// Detector/acquisition geometry.
    pub geo: DetectorGeometry,
    /// Optional region of interest to shrink the reconstructed volume.
    pub roi: Option<Roi>,
    /// Explicit angles in degrees, typically parsed from an angle file by
    /// a collaborator. `None` falls back to a uniform step of
    /// `geo.rot_angle` degrees.
    pub angles_deg: Option<Vec<f64>>,
    /// Queue capacity between pipeline stages.
    pub queue_capacity: usize,
}

impl ReconstructionConfig {
    /// A reconstruction config with the pipeline's recommended queue
    /// capacity for a single worker on either side of each stage.
    #[must_use]
    pub fn new(geo: DetectorGeometry) -> Self {
        Self {
            geo,
            roi: None,
            angles_deg: None,
            queue_capacity: recommended_capacity(1),
        }
    }
}

/// Run one full FDK reconstruction: consult the scheduler, allocate
/// sub-volumes on every device, stream every projection from `source`
/// through weighting, filtering and back-projection, merge, and hand the
/// result to `sink`.
///
/// # Errors
/// Returns an error for any plan error (insufficient device memory,
/// degenerate geometry), any runtime error surfaced by a stage, or any
/// I/O failure from `source`/`sink`.
#[instrument(skip(cfg, devices, source, sink), fields(n_devices = devices.len()))]
pub fn run_reconstruction<S, K>(
    cfg: &ReconstructionConfig,
    devices: Vec<Arc<dyn Device>>,
    mut source: S,
    sink: &mut K,
) -> Result<()>
where
    S: ProjectionSource + 'static,
    K: VolumeSink,
{
    anyhow::ensure!(!devices.is_empty(), "at least one device is required to run a reconstruction");

    let volume = ct_core::calculate_volume_geometry(&cfg.geo).context("deriving volume geometry")?;
    let volume = cfg.roi.as_ref().map_or(volume, |roi| roi.apply(&volume));

    let device_budgets: Vec<DeviceBudget> = devices
        .iter()
        .map(|d| DeviceBudget { device: d.id(), mem_bytes: d.global_mem_bytes() })
        .collect();
    let plan = ct_scheduler::plan(&cfg.geo, &volume, &device_budgets).context("building schedule plan")?;
    info!(n_subvolumes = plan.sub_volumes.len(), dim_x = volume.dim_x, dim_y = volume.dim_y, dim_z = volume.dim_z, "schedule plan built");

    let device_by_id: HashMap<DeviceId, Arc<dyn Device>> =
        devices.iter().map(|d| (d.id(), Arc::clone(d))).collect();

    let mut sub_volumes_by_device: HashMap<DeviceId, Vec<SubVolume>> = HashMap::new();
    for desc in &plan.sub_volumes {
        let device = device_by_id
            .get(&desc.device)
            .with_context(|| format!("schedule plan referenced unknown device {}", desc.device))?;
        let mut sv = desc
            .allocate(device.as_ref(), volume.dim_x as usize, volume.dim_y as usize)
            .context("allocating sub-volume")?;
        sv.clear();
        sub_volumes_by_device.entry(desc.device).or_default().push(sv);
    }

    let n_proj = source.n_proj();
    let angle_table = Arc::new(match &cfg.angles_deg {
        Some(angles) => AngleTable::from_angles_deg(angles, n_proj, cfg.geo.rot_angle),
        None => AngleTable::from_uniform_step(n_proj, cfg.geo.rot_angle),
    });

    let filter = Arc::new(RampFilter::build(&cfg.geo).context("building ramp filter")?);

    let raw_q: BoundedQueue<Projection> = BoundedQueue::new(cfg.queue_capacity);
    let weighted_q: BoundedQueue<Projection> = BoundedQueue::new(cfg.queue_capacity);
    let filtered_q: BoundedQueue<Projection> = BoundedQueue::new(cfg.queue_capacity);

    let weighting_handle = spawn_stage(WeightingStage::new(cfg.geo), raw_q.receiver(), weighted_q.sender());
    let filter_handle = spawn_stage(FilterStage::new(Arc::clone(&filter)), weighted_q.receiver(), filtered_q.sender());

    let mut device_queues: HashMap<DeviceId, BoundedQueue<Projection>> = HashMap::new();
    let mut backproject_handles = Vec::new();

    for (&device_id, sub_volumes) in sub_volumes_by_device.drain() {
        let dq: BoundedQueue<Projection> = BoundedQueue::new(cfg.queue_capacity);
        let rx = dq.receiver();
        device_queues.insert(device_id, dq);

        let geo = cfg.geo;
        let vol = volume;
        let angle_table = Arc::clone(&angle_table);
        backproject_handles.push(thread::spawn(move || {
            ct_backproject::run_worker(sub_volumes, geo, vol, angle_table, rx)
        }));
    }

    let dispatch_rx = filtered_q.receiver();
    let dispatch_senders: HashMap<DeviceId, _> = device_queues.iter().map(|(&id, q)| (id, q.sender())).collect();
    let dispatch_handle = thread::spawn(move || -> Result<()> {
        loop {
            match dispatch_rx.recv() {
                Ok(PipelineItem::Data(projection)) => {
                    let tx = dispatch_senders
                        .get(&projection.device)
                        .context("filtered projection assigned to an unknown device")?;
                    if tx.send(PipelineItem::Data(projection)).is_err() {
                        return Ok(());
                    }
                }
                Ok(PipelineItem::End) | Err(_) => {
                    for tx in dispatch_senders.values() {
                        let _ = tx.send(PipelineItem::End);
                    }
                    return Ok(());
                }
            }
        }
    });

    feed_source(&mut source, devices.as_slice(), &angle_table, &raw_q).context("feeding projections into the pipeline")?;

    join_all(vec![weighting_handle, filter_handle])?;
    dispatch_handle
        .join()
        .map_err(|_| anyhow::anyhow!("dispatch thread panicked"))??;

    let mut all_sub_volumes = Vec::new();
    for handle in backproject_handles {
        let sub_volumes = handle
            .join()
            .map_err(|_| anyhow::anyhow!("back-projection worker thread panicked"))??;
        all_sub_volumes.extend(sub_volumes);
    }

    let host = ct_backproject::merge_into_host(&volume, &all_sub_volumes).context("merging sub-volumes")?;
    sink.write_volume(volume.dim_x, volume.dim_y, volume.dim_z, &host)
        .context("writing finished volume to sink")?;

    Ok(())
}

/// Pull every frame from `source`, upload it onto a device (round-robin
/// across `devices`), and push it into `raw_q`. Closes `raw_q` with
/// exactly one sentinel once the source is exhausted, since weighting
/// runs as a single worker.
fn feed_source<S: ProjectionSource>(
    source: &mut S,
    devices: &[Arc<dyn Device>],
    angle_table: &AngleTable,
    raw_q: &BoundedQueue<Projection>,
) -> Result<()> {
    let mut next_device = 0usize;
    while let Some(RawFrame { index, width, height, data }) = source.next_frame()? {
        let device = &devices[next_device % devices.len()];
        next_device += 1;

        let mut buffer = device
            .alloc_2d(width, height)
            .with_context(|| format!("allocating projection buffer for frame {index}"))?;
        buffer.as_mut_slice().copy_from_slice(&data);

        let stream = device.new_stream();
        let phi = angle_table.phi(index);
        let projection = Projection::new(index, phi, device.id(), stream, buffer);
        raw_q.push(projection)?;
    }
    raw_q.close(1)
}
