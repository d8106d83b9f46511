// crates/ct-engine/src/lib.rs

//! Wires the scheduler and the weighting/filtering/back-projection stages
//! into one end-to-end FDK reconstruction run.
//!
//! This is the one crate in the workspace that knows about all four HARD
//! CORE subsystems at once: it consults `ct-scheduler` for the execution
//! plan, allocates sub-volumes through `ct-gpu`, and threads projections
//! through `ct-weighting` → `ct-filter` → `ct-backproject`. Everything it
//! needs from the outside world — where projections come from, where the
//! finished volume goes — comes in through the [`source`] traits, which a
//! collaborator (`ct-io`, or a test) implements.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

/// Collaborator seams: where projections come from, where the volume goes.
pub mod source;
/// End-to-end orchestration of one reconstruction run.
pub mod run;

pub use run::{run_reconstruction, ReconstructionConfig};
pub use source::{ProjectionSource, RawFrame, VolumeSink};
