// crates/ct-weighting/src/lib.rs

//! Cosine weighting: the first stage every acquired projection passes
//! through before filtering.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::{Context, Result};
use ct_core::{DetectorGeometry, Projection};
use ct_gpu::Buffer2D;
use ct_pipeline::Stage;

/// Apply the cosine weighting kernel to `buf` in place.
///
/// For detector coordinate `(s, t)`:
/// ```text
/// h_s = l_px_row/2 + s*l_px_row + h_min
/// v_t = l_px_col/2 + t*l_px_col + v_min
/// w   = d_sd / sqrt(d_sd^2 + h_s^2 + v_t^2)
/// out[t, s] = in[t, s] * w
/// ```
/// with `h_min = delta_s_mm - n_row*l_px_row/2` and
/// `v_min = delta_t_mm - n_col*l_px_col/2`.
pub fn apply_weighting(buf: &mut dyn Buffer2D, geo: &DetectorGeometry) {
    let d_sd = geo.d_sd();
    let h_min = geo.delta_s_mm() - f64::from(geo.n_row) * geo.l_px_row / 2.0;
    let v_min = geo.delta_t_mm() - f64::from(geo.n_col) * geo.l_px_col / 2.0;

    let width = buf.width();
    let data = buf.as_mut_slice();

    for (idx, pixel) in data.iter_mut().enumerate() {
        let s = idx % width;
        let t = idx / width;
        let h_s = geo.l_px_row / 2.0 + (s as f64) * geo.l_px_row + h_min;
        let v_t = geo.l_px_col / 2.0 + (t as f64) * geo.l_px_col + v_min;
        let w = d_sd / (d_sd * d_sd + h_s * h_s + v_t * v_t).sqrt();
        *pixel = (f64::from(*pixel) * w) as f32;
    }
}

/// The weighting pipeline stage: consumes one projection at a time,
/// weights it in place, synchronizes its stream, and forwards it.
pub struct WeightingStage {
    geo: DetectorGeometry,
}

impl WeightingStage {
    /// Build a weighting stage bound to a fixed detector geometry.
    #[must_use]
    pub fn new(geo: DetectorGeometry) -> Self {
        Self { geo }
    }
}

impl Stage for WeightingStage {
    type In = Projection;
    type Out = Projection;

    fn name(&self) -> &'static str {
        "weighting"
    }

    fn process(&mut self, mut projection: Projection) -> Result<Projection> {
        apply_weighting(projection.buffer.as_mut(), &self.geo);
        projection
            .stream
            .synchronize()
            .with_context(|| format!("synchronizing stream after weighting projection {}", projection.index))?;
        Ok(projection)
    }
}
