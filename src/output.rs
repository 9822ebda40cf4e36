//! The module responsible for writing output data to disk.
use crate::customer::CustomerID;
use crate::scenario::ScenarioResults;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "ratesim_results";

/// The output file name for monthly bills
const BILLS_FILE_NAME: &str = "bills.csv";

/// The output file name for per-customer bill alignment records
const ALIGNMENT_FILE_NAME: &str = "alignment.csv";

/// The output file name for population-level metrics
const METRICS_FILE_NAME: &str = "metrics.csv";

/// The output file name for the calibration summary
const CALIBRATION_FILE_NAME: &str = "calibration.csv";

/// The output file name for data-quality findings, written only when there are any
const DATA_QUALITY_FILE_NAME: &str = "data_quality.csv";

/// Get the default output directory for the model at the specified path
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    let model_dir = model_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create an output directory, refusing to clobber existing results unless asked.
///
/// Returns whether an existing directory will be overwritten.
pub fn create_output_directory(output_dir: &Path, overwrite: bool) -> Result<bool> {
    let exists = output_dir.is_dir();
    ensure!(
        !exists || overwrite,
        "Output directory {} already exists (pass --overwrite to replace it)",
        output_dir.display()
    );
    fs::create_dir_all(output_dir)?;
    Ok(exists)
}

/// Represents a row in the monthly bills CSV file
#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct BillRow {
    customer_id: CustomerID,
    month: u32,
    fixed_charge: f64,
    energy_charge: f64,
    demand_charge: f64,
    total: f64,
}

/// Represents a row in the population metrics CSV file
#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct MetricRow {
    metric: String,
    group: String,
    value: f64,
}

/// Represents the single row of the calibration summary CSV file
#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct CalibrationRow {
    scale: f64,
    converged: bool,
    iterations: u32,
    achieved_tolerance: f64,
}

/// Write all of a scenario's outputs to the given directory.
pub fn write_results(results: &ScenarioResults, output_path: &Path) -> Result<()> {
    write_bills(results, output_path)?;
    write_alignment(results, output_path)?;
    write_metrics(results, output_path)?;
    write_calibration(results, output_path)?;
    if !results.warnings.data_quality.is_empty() {
        write_data_quality(results, output_path)?;
    }
    Ok(())
}

fn write_bills(results: &ScenarioResults, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path.join(BILLS_FILE_NAME))?;
    for bill in &results.bills.bills {
        writer.serialize(BillRow {
            customer_id: bill.customer_id.clone(),
            month: bill.month,
            fixed_charge: bill.fixed_charge.value(),
            energy_charge: bill.energy_charge.value(),
            demand_charge: bill.demand_charge.value(),
            total: bill.total().value(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_alignment(results: &ScenarioResults, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path.join(ALIGNMENT_FILE_NAME))?;
    for record in &results.alignment {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_metrics(results: &ScenarioResults, output_path: &Path) -> Result<()> {
    let metrics = &results.metrics;
    let mut writer = csv::Writer::from_path(output_path.join(METRICS_FILE_NAME))?;
    let scalars = [
        ("average_cross_subsidy", metrics.average_cross_subsidy),
        ("average_overpayment", metrics.average_overpayment),
        ("average_underpayment", metrics.average_underpayment),
        ("deadweight_loss", metrics.deadweight_loss),
    ];
    for (metric, value) in scalars {
        writer.serialize(MetricRow {
            metric: metric.to_string(),
            group: "all".to_string(),
            value: value.value(),
        })?;
    }
    for group in &metrics.by_group {
        writer.serialize(MetricRow {
            metric: "mean_alignment".to_string(),
            group: group.group.clone(),
            value: group.mean_alignment.value(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_calibration(results: &ScenarioResults, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path.join(CALIBRATION_FILE_NAME))?;
    let report = results.calibration.report;
    writer.serialize(CalibrationRow {
        scale: f64::from(results.calibration.scale),
        converged: report.converged,
        iterations: report.iterations,
        achieved_tolerance: report.achieved_tolerance,
    })?;
    writer.flush()?;
    Ok(())
}

fn write_data_quality(results: &ScenarioResults, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path.join(DATA_QUALITY_FILE_NAME))?;
    for issue in &results.warnings.data_quality {
        writer.serialize(issue)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("results");
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());

        // An existing directory is only reused with the overwrite flag
        assert!(create_output_directory(&output_dir, false).is_err());
        assert!(create_output_directory(&output_dir, true).unwrap());
    }
}
