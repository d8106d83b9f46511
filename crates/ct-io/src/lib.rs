// crates/ct-io/src/lib.rs

//! Reference implementations of the engine's two collaborator seams
//! (`ct_engine::ProjectionSource`/`VolumeSink`), plus angle-file lexical
//! parsing.
//!
//! Per the engine specification, image-file I/O (TIFF/HIS) stays an
//! external collaborator this workspace doesn't reimplement; [`raw`]
//! ships a minimal stand-in simple enough to run the engine end-to-end.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

/// Angle-file lexical parsing (decimal-separator auto-detection).
pub mod angles;
/// Raw little-endian `f32` projection source / volume sink.
pub mod raw;

pub use angles::read_angle_file;
pub use raw::{RawProjectionSource, RawVolumeSink};
