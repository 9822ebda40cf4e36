//! The model: run parameters plus all input data, loaded and cross-checked up front.
//!
//! The core stages perform no I/O of their own; everything they consume is read here
//! before the first stage starts, so a misconfigured model aborts before any computation.
use crate::customer::CustomerMap;
use crate::diagnostics::DataQualityIssue;
use crate::input::customer::read_customers;
use crate::input::load::read_loads;
use crate::input::marginal_cost::read_marginal_costs;
use crate::input::read_toml;
use crate::input::tariff::read_tariffs;
use crate::load::{ConsumptionBasis, EnergyUnit, LoadMatrix};
use crate::marginal_cost::MarginalCostSurface;
use crate::residual::ResidualAllocation;
use crate::tariff::TariffMap;
use crate::units::Money;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

/// The file name for the main model parameters
const MODEL_PARAMETERS_FILE_NAME: &str = "ratesim.toml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_elasticity, f64, -0.2);
define_param_default!(default_calibration_tolerance, f64, 1e-6);
define_param_default!(default_max_calibration_iterations, u32, 50);
define_param_default!(default_load_unit, EnergyUnit, EnergyUnit::KilowattHours);

/// Represents the contents of the entire model parameters file.
#[derive(Debug, Deserialize, PartialEq)]
pub struct ModelParameters {
    /// The total annual revenue requirement to calibrate against
    pub revenue_requirement: Money,
    /// How the residual revenue requirement is allocated across customers
    #[serde(default)]
    pub residual_allocation: ResidualAllocation,
    /// Whether billing consumption is net of on-site generation or gross
    #[serde(default)]
    pub consumption_basis: ConsumptionBasis,
    /// Short-run price elasticity of demand, for the deadweight-loss estimate
    #[serde(default = "default_elasticity")]
    pub elasticity: f64,
    /// Relative revenue tolerance for the calibration fixed point
    #[serde(default = "default_calibration_tolerance")]
    pub calibration_tolerance: f64,
    /// Iteration budget for the calibration fixed point
    #[serde(default = "default_max_calibration_iterations")]
    pub max_calibration_iterations: u32,
    /// The unit the load data is delivered in. Anything other than kilowatt-hours is
    /// converted once at load time.
    #[serde(default = "default_load_unit")]
    pub load_unit: EnergyUnit,
    /// Whether data-quality findings abort the run instead of being reported
    #[serde(default)]
    pub fail_on_data_quality: bool,
}

/// Check that the `revenue_requirement` parameter is valid
fn check_revenue_requirement(value: Money) -> Result<()> {
    ensure!(
        value.value().is_finite() && value.value() > 0.0,
        "revenue_requirement must be a finite number greater than zero"
    );
    Ok(())
}

/// Check that the `elasticity` parameter is valid
fn check_elasticity(value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value <= 0.0,
        "elasticity must be a finite number less than or equal to zero"
    );
    Ok(())
}

/// Check that the calibration parameters are valid
fn check_calibration_params(tolerance: f64, max_iterations: u32) -> Result<()> {
    ensure!(
        tolerance.is_finite() && tolerance > 0.0,
        "calibration_tolerance must be a finite number greater than zero"
    );
    ensure!(
        max_iterations > 0,
        "max_calibration_iterations cannot be zero"
    );
    Ok(())
}

impl ModelParameters {
    /// Read model parameters from the model directory.
    pub fn from_path(model_dir: &Path) -> Result<Self> {
        let file_path = model_dir.join(MODEL_PARAMETERS_FILE_NAME);
        let params: ModelParameters = read_toml(&file_path)?;
        check_revenue_requirement(params.revenue_requirement)?;
        check_elasticity(params.elasticity)?;
        check_calibration_params(
            params.calibration_tolerance,
            params.max_calibration_iterations,
        )?;
        Ok(params)
    }
}

/// A complete model: parameters and all input data
pub struct Model {
    /// Run parameters
    pub parameters: ModelParameters,
    /// The customer population
    pub customers: CustomerMap,
    /// All tariff definitions
    pub tariffs: TariffMap,
    /// The interval load data, in kilowatt-hours
    pub loads: LoadMatrix,
    /// The marginal-cost surface
    pub costs: MarginalCostSurface,
    /// Data-quality findings raised while reading the input series
    pub data_quality: Vec<DataQualityIssue>,
}

impl Model {
    /// Read a model from the specified directory, cross-checking references between
    /// files so any configuration error aborts before computation starts.
    pub fn from_path(model_dir: &Path) -> Result<Model> {
        let parameters = ModelParameters::from_path(model_dir)
            .context("Failed to read model parameters")?;
        let tariffs = read_tariffs(model_dir)?;
        let customers = read_customers(model_dir, &tariffs)?;
        let (loads, data_quality) = read_loads(model_dir, parameters.load_unit)?;
        let costs = read_marginal_costs(model_dir, &loads.timeline)?;

        for customer in customers.values() {
            ensure!(
                loads.customer_index(&customer.id).is_some(),
                "Customer {} has no load series",
                customer.id
            );
        }

        Ok(Model {
            parameters,
            customers,
            tariffs,
            loads,
            costs,
            data_quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_params(contents: &str) -> Result<ModelParameters> {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join(MODEL_PARAMETERS_FILE_NAME);
        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "{contents}").unwrap();
        }
        ModelParameters::from_path(dir.path())
    }

    #[test]
    fn test_parameter_defaults() {
        let params = write_params("revenue_requirement = 1000000.0").unwrap();
        assert_eq!(params.revenue_requirement, Money(1_000_000.0));
        assert_eq!(params.residual_allocation, ResidualAllocation::Volumetric);
        assert_eq!(params.consumption_basis, ConsumptionBasis::Net);
        assert_eq!(params.elasticity, default_elasticity());
        assert_eq!(params.load_unit, EnergyUnit::KilowattHours);
        assert!(!params.fail_on_data_quality);
    }

    #[test]
    fn test_parameters_parsed() {
        let params = write_params(
            "revenue_requirement = 500000.0\n\
             residual_allocation = \"flat\"\n\
             consumption_basis = \"gross\"\n\
             elasticity = -0.3\n\
             load_unit = \"therms\"\n\
             fail_on_data_quality = true",
        )
        .unwrap();
        assert_eq!(params.residual_allocation, ResidualAllocation::Flat);
        assert_eq!(params.consumption_basis, ConsumptionBasis::Gross);
        assert_eq!(params.load_unit, EnergyUnit::Therms);
        assert!(params.fail_on_data_quality);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(write_params("revenue_requirement = -5.0").is_err());
        assert!(write_params("revenue_requirement = 1.0\nelasticity = 0.2").is_err());
        assert!(
            write_params("revenue_requirement = 1.0\nmax_calibration_iterations = 0").is_err()
        );
    }
}
