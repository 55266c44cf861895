use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use ndarray::Array1;
use serde::Serialize;

use crate::tripcol::{IterationResult, Outcome, Termination};
use crate::{Result, Value};

/// Human readable table of the final estimates of a run
pub struct Summary<'a, E>(pub &'a Outcome<E>);

fn write_row<E: Value>(f: &mut fmt::Formatter<'_>, label: &str, values: &Array1<E>) -> fmt::Result {
    write!(f, "  - {label:<28}:")?;
    for value in values {
        write!(f, "{value:12.6}")?;
    }
    writeln!(f)
}

impl<E: Value> fmt::Display for Summary<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        match outcome.termination() {
            Termination::Converged => writeln!(
                f,
                "triple collocation converged at iteration {}",
                outcome.iterations
            )?,
            Termination::Exhausted => writeln!(
                f,
                "WARNING: triple collocation did not converge in {} iterations",
                outcome.iterations
            )?,
        }
        writeln!(f, "final results, calibration in the form of t = (x - b)/a")?;
        writeln!(f, "{:32}{:>12}{:>12}{:>12}", "", "system 0", "system 1", "system 2")?;
        writeln!(f, "  {}", "-".repeat(66))?;
        write_row(f, "calibration scalings a", outcome.calibration.scale())?;
        write_row(f, "calibration biases b", outcome.calibration.bias())?;
        write_row(f, "error variances", &outcome.error_variance)?;
        write_row(f, "error standard deviations", &outcome.standard_deviations())?;
        write_row(f, "error variances (raw units)", &outcome.system_error_variance())?;
        writeln!(f)?;
        writeln!(f, "  - {:<28}:{:12.6}", "common variance", outcome.common_variance)?;
        writeln!(f, "  - {:<28}:{:12}", "accepted collocations", outcome.accepted)?;
        writeln!(f, "  - {:<28}:{:12}", "rejected collocations", outcome.rejected)?;
        writeln!(f, "  - {:<28}:{:12}", "total number of collocations", outcome.total())
    }
}

/// One line of the iteration history CSV
#[derive(Serialize)]
struct HistoryRow<E> {
    iteration: usize,
    accepted: usize,
    rejected: usize,
    scale_1: E,
    scale_2: E,
    bias_1: E,
    bias_2: E,
    error_variance_0: E,
    error_variance_1: E,
    error_variance_2: E,
    common_variance: E,
    converged: bool,
}

impl<E: Value> From<&IterationResult<E>> for HistoryRow<E> {
    fn from(result: &IterationResult<E>) -> Self {
        Self {
            iteration: result.iteration,
            accepted: result.accepted,
            rejected: result.rejected,
            scale_1: result.scale[1],
            scale_2: result.scale[2],
            bias_1: result.bias[1],
            bias_2: result.bias[2],
            error_variance_0: result.error_variance[0],
            error_variance_1: result.error_variance[1],
            error_variance_2: result.error_variance[2],
            common_variance: result.common_variance,
            converged: result.converged,
        }
    }
}

/// Write the per-iteration estimates as CSV with a header row
///
/// # Errors
/// Returns an error if a row cannot be serialised or written.
pub fn write_history<E, W>(history: &[IterationResult<E>], writer: W) -> Result<()>
where
    E: Value + Serialize,
    W: io::Write,
{
    let mut wtr = csv::Writer::from_writer(writer);
    for result in history {
        wtr.serialize(HistoryRow::from(result))?;
    }
    wtr.flush()?;
    Ok(())
}

/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_history_file<E>(history: &[IterationResult<E>], path: &Path) -> Result<()>
where
    E: Value + Serialize,
{
    write_history(history, File::create(path)?)
}
