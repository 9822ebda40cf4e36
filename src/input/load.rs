//! Code for reading interval load data from CSV files.
//!
//! The file is in long format, one row per (customer, interval), ordered by customer
//! then time. Every customer must carry exactly the same timestamp sequence; the shared
//! sequence becomes the run's timeline.
use super::{input_err_msg, read_csv};
use crate::customer::CustomerID;
use crate::diagnostics::DataQualityIssue;
use crate::load::{EnergyUnit, LoadMatrix};
use crate::timeline::Timeline;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, FixedOffset};
use indexmap::IndexSet;
use serde::Deserialize;
use std::path::Path;
use std::rc::Rc;

const LOADS_FILE_NAME: &str = "loads.csv";

/// One (customer, interval) record retrieved from a CSV file
#[derive(Debug, Deserialize, PartialEq)]
struct LoadRaw {
    customer_id: String,
    timestamp: String,
    net: f64,
    grid: f64,
    #[serde(default)]
    generation: f64,
}

/// Read the load matrix from an iterator of raw records.
fn read_loads_from_iter<I>(
    iter: I,
    unit: EnergyUnit,
) -> Result<(LoadMatrix, Vec<DataQualityIssue>)>
where
    I: Iterator<Item = LoadRaw>,
{
    let mut customer_ids: IndexSet<CustomerID> = IndexSet::new();
    let mut timestamps: Vec<Vec<DateTime<FixedOffset>>> = Vec::new();
    let mut net: Vec<Vec<f64>> = Vec::new();
    let mut grid: Vec<Vec<f64>> = Vec::new();
    let mut generation: Vec<Vec<f64>> = Vec::new();

    for raw in iter {
        let timestamp: DateTime<FixedOffset> = raw
            .timestamp
            .parse()
            .with_context(|| format!("Invalid timestamp {}", raw.timestamp))?;
        let (row, inserted) = customer_ids.insert_full(raw.customer_id.as_str().into());
        if inserted {
            timestamps.push(Vec::new());
            net.push(Vec::new());
            grid.push(Vec::new());
            generation.push(Vec::new());
        }
        timestamps[row].push(timestamp);
        net[row].push(raw.net);
        grid[row].push(raw.grid);
        generation[row].push(raw.generation);
    }

    // Every customer must be on the shared timestamp sequence
    let (first, rest) = timestamps.split_first().context("No load records found")?;
    for (row, series) in rest.iter().enumerate() {
        ensure!(
            series == first,
            "Customer {} is not on the same interval sequence as customer {}",
            customer_ids[row + 1],
            customer_ids[0]
        );
    }

    let (timeline, issues) = Timeline::new(first.clone())?;
    let mut loads = LoadMatrix::new(
        Rc::new(timeline),
        customer_ids,
        net,
        grid,
        generation,
        unit,
    )?;
    if unit != EnergyUnit::KilowattHours {
        // The model file explicitly declared raw units, so conversion is confirmed
        loads.convert_to_kilowatt_hours(true)?;
    }

    Ok((loads, issues))
}

/// Read interval load data from the model directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
/// * `unit` - The unit the file's values are declared to be in
pub fn read_loads(
    model_dir: &Path,
    unit: EnergyUnit,
) -> Result<(LoadMatrix, Vec<DataQualityIssue>)> {
    let file_path = model_dir.join(LOADS_FILE_NAME);
    let iter = read_csv(&file_path)?;
    read_loads_from_iter(iter, unit).with_context(|| input_err_msg(&file_path))
}
