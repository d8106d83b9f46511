// crates/ct-core/src/angles.rs

//! Construction of the per-projection angle table.
//!
//! An [`AngleTable`] holds the rotation angle, in radians, together with
//! its precomputed sine and cosine, for every projection in the scan. It
//! is built once per run, before any worker thread is spawned, and shared
//! read-only thereafter behind an `Arc` — see `ct_engine::run_reconstruction`.

use tracing::warn;

/// Per-projection angle, plus precomputed trigonometry, shared by the
/// weighting and back-projection stages.
#[derive(Clone, Debug, PartialEq)]
pub struct AngleTable {
    phi: Vec<f64>,
    sin_phi: Vec<f64>,
    cos_phi: Vec<f64>,
}

impl AngleTable {
    fn from_radians(phi: Vec<f64>) -> Self {
        let sin_phi = phi.iter().map(|p| p.sin()).collect();
        let cos_phi = phi.iter().map(|p| p.cos()).collect();
        Self { phi, sin_phi, cos_phi }
    }

    /// Build a table of `n_proj` angles, uniformly stepped by `rot_angle`
    /// degrees starting at zero.
    ///
    /// This is the fallback used when no angle file is supplied.
    #[must_use]
    pub fn from_uniform_step(n_proj: u32, rot_angle_deg: f64) -> Self {
        let step = rot_angle_deg.to_radians();
        let phi = (0..n_proj).map(|i| f64::from(i) * step).collect();
        Self::from_radians(phi)
    }

    /// Build a table from explicit angles (in degrees), read from an angle
    /// file.
    ///
    /// If `angles_deg.len()` does not match `n_proj`, this is not treated
    /// as fatal: per the engine specification's open question on this
    /// mismatch, the table is padded (or truncated) to `n_proj` entries
    /// using the uniform step implied by `rot_angle_deg`, continuing on
    /// from the last supplied angle, and a warning is emitted.
    #[must_use]
    pub fn from_angles_deg(angles_deg: &[f64], n_proj: u32, rot_angle_deg: f64) -> Self {
        let n_proj = n_proj as usize;
        let mut angles_deg = angles_deg.to_vec();

        if angles_deg.len() != n_proj {
            warn!(
                supplied = angles_deg.len(),
                expected = n_proj,
                "angle file entry count does not match n_proj; padding with synthetic uniform-step angles"
            );
            let last = angles_deg.last().copied().unwrap_or(0.0);
            let base_len = angles_deg.len();
            while angles_deg.len() < n_proj {
                let steps_past_last = (angles_deg.len() - base_len + 1) as f64;
                angles_deg.push(last + rot_angle_deg * steps_past_last);
            }
            angles_deg.truncate(n_proj);
        }

        let phi = angles_deg.iter().map(|d| d.to_radians()).collect();
        Self::from_radians(phi)
    }

    /// Number of projections in this table.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.phi.len()
    }

    /// Whether this table holds no angles.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phi.is_empty()
    }

    /// Rotation angle, in radians, for projection `index`.
    #[inline]
    #[must_use]
    pub fn phi(&self, index: usize) -> f64 {
        self.phi[index]
    }

    /// `sin(phi(index))`, precomputed.
    #[inline]
    #[must_use]
    pub fn sin_phi(&self, index: usize) -> f64 {
        self.sin_phi[index]
    }

    /// `cos(phi(index))`, precomputed.
    #[inline]
    #[must_use]
    pub fn cos_phi(&self, index: usize) -> f64 {
        self.cos_phi[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_step_wraps_trig_consistently() {
        let t = AngleTable::from_uniform_step(4, 90.0);
        assert_eq!(t.len(), 4);
        assert!((t.phi(1) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((t.cos_phi(2) - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn mismatched_angle_file_is_padded_not_fatal() {
        let supplied = vec![0.0, 10.0, 20.0];
        let t = AngleTable::from_angles_deg(&supplied, 5, 10.0);
        assert_eq!(t.len(), 5);
        assert!((t.phi(0)).abs() < 1e-12);
    }

    #[test]
    fn mismatched_angle_file_truncates_when_too_long() {
        let supplied = vec![0.0, 10.0, 20.0, 30.0, 40.0];
        let t = AngleTable::from_angles_deg(&supplied, 3, 10.0);
        assert_eq!(t.len(), 3);
    }

}
