//! Code for reading the marginal-cost surface from CSV files.
use super::{input_err_msg, read_csv};
use crate::marginal_cost::{CostComponent, MarginalCostSurface};
use crate::timeline::Timeline;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::rc::Rc;
use strum::IntoEnumIterator;

const MARGINAL_COSTS_FILE_NAME: &str = "marginal_costs.csv";

/// One interval of the marginal-cost surface, all components in $/kWh
#[derive(Debug, Deserialize, PartialEq)]
struct MarginalCostRaw {
    timestamp: String,
    energy: f64,
    generation_capacity: f64,
    distribution_capacity: f64,
    transmission_capacity: f64,
}

/// Read a marginal-cost surface from an iterator of raw records, checking alignment
/// with the load timeline.
fn read_marginal_costs_from_iter<I>(
    iter: I,
    timeline: &Rc<Timeline>,
) -> Result<MarginalCostSurface>
where
    I: Iterator<Item = MarginalCostRaw>,
{
    let mut components: IndexMap<CostComponent, Vec<f64>> = CostComponent::iter()
        .map(|component| (component, Vec::with_capacity(timeline.len())))
        .collect();

    for (interval, raw) in iter.enumerate() {
        let timestamp: DateTime<FixedOffset> = raw
            .timestamp
            .parse()
            .with_context(|| format!("Invalid timestamp {}", raw.timestamp))?;
        let expected = timeline.timestamps.get(interval).with_context(|| {
            format!(
                "Marginal-cost series is longer than the load timeline ({} intervals)",
                timeline.len()
            )
        })?;
        ensure!(
            timestamp == *expected,
            "Marginal-cost timestamp {timestamp} does not match load timestamp {expected}"
        );

        components[&CostComponent::Energy].push(raw.energy);
        components[&CostComponent::GenerationCapacity].push(raw.generation_capacity);
        components[&CostComponent::DistributionCapacity].push(raw.distribution_capacity);
        components[&CostComponent::TransmissionCapacity].push(raw.transmission_capacity);
    }

    MarginalCostSurface::new(Rc::clone(timeline), components)
}

/// Read the marginal-cost surface from the model directory.
pub fn read_marginal_costs(
    model_dir: &Path,
    timeline: &Rc<Timeline>,
) -> Result<MarginalCostSurface> {
    let file_path = model_dir.join(MARGINAL_COSTS_FILE_NAME);
    let iter = read_csv(&file_path)?;
    read_marginal_costs_from_iter(iter, timeline).with_context(|| input_err_msg(&file_path))
}
