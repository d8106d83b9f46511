// crates/ct-core/src/lib.rs

//! Core geometry, data-model types and angle tables for the cone-beam FDK
//! reconstruction engine.
//!
//! Everything in this crate is pure and allocation-light: geometry maths,
//! angle-table construction, and the plain data types (`Projection`,
//! `SubVolume`, scheduler descriptors) that flow through the pipeline.
//! No threads, no file I/O — those live in `ct-pipeline` and `ct-io`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

/// Angle-table construction: uniform step, explicit angles, padding fallback.
pub mod angles;
/// Detector/volume geometry and the derived-geometry formulae.
pub mod geometry;
/// A single 2-D projection as it flows through the pipeline.
pub mod projection;
/// Region-of-interest volume shrinking.
pub mod roi;
/// Sub-volume descriptor and the allocated sub-volume itself.
pub mod subvolume;
/// Small scheduler-facing value types shared across crates.
pub mod types;

pub use angles::AngleTable;
pub use geometry::{calculate_volume_geometry, DetectorGeometry, VolumeGeometry};
pub use projection::Projection;
pub use roi::Roi;
pub use subvolume::SubVolume;
pub use types::{RowBand, SubVolumeDescriptor};
