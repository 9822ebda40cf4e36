//! Per-customer consumption series over the shared timeline.
//!
//! Loads are held as one matrix (customer x interval) rather than per-customer objects so
//! the aggregation stages run as batched passes over contiguous arrays. Values are plain
//! `f64` in the unit named by the matrix's [`EnergyUnit`] tag; scalar billing maths uses
//! the typed quantities in [`crate::units`].
use crate::customer::CustomerID;
use crate::timeline::Timeline;
use crate::units::Energy;
use anyhow::{Result, bail, ensure};
use indexmap::IndexSet;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::rc::Rc;

/// Kilowatt-hours per therm, for gas series delivered in raw units
pub const KILOWATT_HOURS_PER_THERM: f64 = 29.3001;

/// The unit a load matrix's values are expressed in.
///
/// The tag travels with the data so unit conversion can be applied exactly once; which
/// code path a value took is never used to infer its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerializeLabeledStringEnum, DeserializeLabeledStringEnum)]
pub enum EnergyUnit {
    /// Kilowatt-hours, the billing unit
    #[string = "kwh"]
    KilowattHours,
    /// Therms, as delivered by gas-load providers
    #[string = "therms"]
    Therms,
}

/// Which consumption column is used for billing
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum ConsumptionBasis {
    /// Net of on-site generation
    #[default]
    #[string = "net"]
    Net,
    /// Grid-drawn consumption, ignoring exports
    #[string = "gross"]
    Gross,
}

/// All customers' consumption series, aligned to one [`Timeline`]
#[derive(Debug, Clone, PartialEq)]
pub struct LoadMatrix {
    /// The interval axis shared by every row
    pub timeline: Rc<Timeline>,
    /// Customer IDs in row order
    pub customer_ids: IndexSet<CustomerID>,
    /// Net consumption per (customer, interval)
    net: Vec<Vec<f64>>,
    /// Grid-drawn consumption per (customer, interval)
    grid: Vec<Vec<f64>>,
    /// On-site generation per (customer, interval)
    generation: Vec<Vec<f64>>,
    /// The unit of every value in the matrix
    unit: EnergyUnit,
    /// Whether a unit conversion has already been applied
    converted: bool,
}

impl LoadMatrix {
    /// Build a load matrix, checking that every row matches the timeline length.
    pub fn new(
        timeline: Rc<Timeline>,
        customer_ids: IndexSet<CustomerID>,
        net: Vec<Vec<f64>>,
        grid: Vec<Vec<f64>>,
        generation: Vec<Vec<f64>>,
        unit: EnergyUnit,
    ) -> Result<Self> {
        let n_customers = customer_ids.len();
        ensure!(
            net.len() == n_customers && grid.len() == n_customers && generation.len() == n_customers,
            "Load matrix has {} customers but {}/{}/{} net/grid/generation rows",
            n_customers,
            net.len(),
            grid.len(),
            generation.len()
        );
        for (row, customer_id) in customer_ids.iter().enumerate() {
            for (name, series) in [("net", &net), ("grid", &grid), ("generation", &generation)] {
                ensure!(
                    series[row].len() == timeline.len(),
                    "Customer {customer_id}: {name} series has {} intervals but the \
                     timeline has {}",
                    series[row].len(),
                    timeline.len()
                );
            }
        }

        Ok(Self {
            timeline,
            customer_ids,
            net,
            grid,
            generation,
            unit,
            converted: false,
        })
    }

    /// The number of customers in the matrix
    pub fn customer_count(&self) -> usize {
        self.customer_ids.len()
    }

    /// The row index for a customer ID, if present
    pub fn customer_index(&self, customer_id: &CustomerID) -> Option<usize> {
        self.customer_ids.get_index_of(customer_id.0.as_ref())
    }

    /// The unit the matrix's values are expressed in
    pub fn unit(&self) -> EnergyUnit {
        self.unit
    }

    /// The consumption-for-billing series for one customer row
    pub fn billing_series(&self, row: usize, basis: ConsumptionBasis) -> &[f64] {
        match basis {
            ConsumptionBasis::Net => &self.net[row],
            ConsumptionBasis::Gross => &self.grid[row],
        }
    }

    /// The net consumption series for one customer row
    pub fn net_series(&self, row: usize) -> &[f64] {
        &self.net[row]
    }

    /// A customer's annual net consumption
    pub fn annual_net(&self, row: usize) -> Energy {
        Energy(self.net[row].iter().sum())
    }

    /// Whether a customer has any on-site generation
    pub fn has_generation(&self, row: usize) -> bool {
        self.generation[row].iter().any(|v| *v != 0.0)
    }

    /// Confirm the matrix is in kilowatt-hours, as billing requires.
    pub fn ensure_kilowatt_hours(&self) -> Result<()> {
        ensure!(
            self.unit == EnergyUnit::KilowattHours,
            "Load data is tagged {:?}; convert it to kilowatt-hours before aggregation",
            self.unit
        );
        Ok(())
    }

    /// Convert the matrix to kilowatt-hours, exactly once.
    ///
    /// The caller must explicitly confirm the data is in raw units. Data already tagged
    /// as kilowatt-hours, or already converted, is refused: re-applying a conversion is
    /// the double-application defect this tag exists to prevent.
    pub fn convert_to_kilowatt_hours(&mut self, raw_units_confirmed: bool) -> Result<()> {
        ensure!(
            raw_units_confirmed,
            "Refusing to convert load data without explicit confirmation of raw units"
        );
        if self.converted {
            bail!("Load data has already been converted once; refusing to convert again");
        }
        let factor = match self.unit {
            EnergyUnit::KilowattHours => {
                bail!("Load data is already tagged as kilowatt-hours; nothing to convert")
            }
            EnergyUnit::Therms => KILOWATT_HOURS_PER_THERM,
        };

        for series in self
            .net
            .iter_mut()
            .chain(self.grid.iter_mut())
            .chain(self.generation.iter_mut())
        {
            for value in series {
                *value *= factor;
            }
        }
        self.unit = EnergyUnit::KilowattHours;
        self.converted = true;

        Ok(())
    }
}
