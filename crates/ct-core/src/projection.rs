// crates/ct-core/src/projection.rs

//! A single acquired projection as it flows through the pipeline.

use ct_gpu::{Buffer2D, DeviceId, Stream};
use std::sync::Arc;

/// One 2-D cone-beam projection, staged on a device, at some point between
/// "just loaded" and "fully filtered and ready to back-project".
///
/// There is deliberately no `valid`/"end of stream" flag on this type: the
/// pipeline distinguishes real data from end-of-stream at the type level
/// (see `ct-pipeline`'s `PipelineItem`), so every `Projection` that exists
/// is, by construction, real data to be processed.
pub struct Projection {
    /// Position of this projection in the acquisition order.
    pub index: usize,
    /// Rotation angle for this projection, in radians.
    pub phi: f64,
    /// Device this projection's buffer lives on.
    pub device: DeviceId,
    /// Stream this projection's processing is ordered on.
    pub stream: Arc<dyn Stream>,
    /// The projection's pixel data, pitched `n_row x n_col`.
    pub buffer: Box<dyn Buffer2D>,
}

impl Projection {
    /// Construct a projection from its acquisition index, angle and an
    /// already-allocated device buffer.
    #[must_use]
    pub fn new(
        index: usize,
        phi: f64,
        device: DeviceId,
        stream: Arc<dyn Stream>,
        buffer: Box<dyn Buffer2D>,
    ) -> Self {
        Self { index, phi, device, stream, buffer }
    }

    /// Detector row count (projection width).
    #[inline]
    #[must_use]
    pub fn n_row(&self) -> usize {
        self.buffer.width()
    }

    /// Detector column count (projection height).
    #[inline]
    #[must_use]
    pub fn n_col(&self) -> usize {
        self.buffer.height()
    }
}
