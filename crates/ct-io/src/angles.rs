// crates/ct-io/src/angles.rs

//! Lexical parsing of the angle-file format.
//!
//! This is the thin collaborator boundary named in the engine
//! specification's external interfaces (§6): tokenizing a text file and
//! detecting its decimal-separator convention. The *numeric* semantics
//! that matter for reconstruction correctness — what happens when the
//! count doesn't match `n_proj` — are core and live in
//! [`ct_core::AngleTable`]; this module only ever hands back a plain
//! `Vec<f64>` of degrees.

use anyhow::Result;
use std::path::Path;
use tracing::warn;

/// Read an angle file: one decimal angle per line, in degrees.
///
/// The decimal separator is `.` by default. If the first non-empty line
/// contains a comma, the whole file is parsed as using `,` for the
/// decimal separator (legacy German locale) rather than as a field
/// separator — this format has exactly one number per line. Trailing
/// whitespace on each line is tolerated.
///
/// A missing, unreadable, or malformed file is never fatal: a warning is
/// logged and an empty angle list is returned, letting the caller fall
/// back to the uniform angular step (see
/// `ct_core::AngleTable::from_uniform_step`).
pub fn read_angle_file(path: &Path) -> Result<Vec<f64>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "angle file missing or unreadable; falling back to uniform angular step");
            return Ok(Vec::new());
        }
    };

    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let comma_locale = lines[0].contains(',');

    let mut angles = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let normalized = if comma_locale { line.replace(',', ".") } else { (*line).to_string() };
        match normalized.trim().parse::<f64>() {
            Ok(angle) => angles.push(angle),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    line = i + 1,
                    content = %line,
                    error = %err,
                    "angle file contains a malformed line; falling back to uniform angular step"
                );
                return Ok(Vec::new());
            }
        }
    }
    Ok(angles)
}
