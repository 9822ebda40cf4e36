//! Structured warnings attached to scenario outputs.
//!
//! Data-quality findings and calibration non-convergence are surfaced as values rather
//! than errors, so batch runs over many scenarios can continue and report per-scenario
//! issues. Configuration and invariant failures, by contrast, abort the run.
use serde::Serialize;
use serde_string_enum::SerializeLabeledStringEnum;
use std::fmt::Display;

/// The kind of data-quality finding detected while validating input series
#[derive(Debug, Clone, Copy, PartialEq, SerializeLabeledStringEnum)]
pub enum DataQualityKind {
    /// The same timestamp appears more than once in a series
    #[string = "duplicate_timestamp"]
    DuplicateTimestamp,
    /// The time index is not strictly increasing
    #[string = "non_monotonic_time"]
    NonMonotonicTime,
    /// The series does not cover the full reference year
    #[string = "partial_year_coverage"]
    PartialYearCoverage,
    /// A gap between consecutive timestamps differs from the nominal interval length
    #[string = "irregular_spacing"]
    IrregularSpacing,
}

/// A single data-quality finding.
///
/// Whether a finding aborts the run is decided by the caller's configured severity
/// threshold, not by the finding itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityIssue {
    /// What was found
    pub kind: DataQualityKind,
    /// A human-readable description naming the offending series and location
    pub message: String,
}

impl Display for DataQualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The outcome of the iterative rate-calibration fixed point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvergenceReport {
    /// Whether the relative revenue change fell below the tolerance
    pub converged: bool,
    /// Number of revenue evaluations performed
    pub iterations: u32,
    /// The relative revenue change achieved on the final iteration
    pub achieved_tolerance: f64,
}

impl ConvergenceReport {
    /// A report for the closed-form path, which needs no iteration
    pub fn closed_form() -> Self {
        Self {
            converged: true,
            iterations: 1,
            achieved_tolerance: 0.0,
        }
    }
}

/// All warnings raised during one scenario run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunWarnings {
    /// Data-quality findings from input validation
    pub data_quality: Vec<DataQualityIssue>,
    /// Set if the calibration fixed point exhausted its iteration budget
    pub non_convergence: Option<ConvergenceReport>,
}

impl RunWarnings {
    /// Whether any warning was raised
    pub fn is_empty(&self) -> bool {
        self.data_quality.is_empty() && self.non_convergence.is_none()
    }
}
