//! Code for reading the customer population from CSV files.
use super::{input_err_msg, read_csv};
use crate::customer::{Customer, CustomerMap};
use crate::tariff::TariffMap;
use crate::units::Dimensionless;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

const CUSTOMERS_FILE_NAME: &str = "customers.csv";

/// A customer record retrieved from a CSV file
#[derive(Debug, Deserialize, PartialEq)]
struct CustomerRaw {
    id: String,
    weight: f64,
    tariff_id: String,
    gas_tariff_id: Option<String>,
    #[serde(default)]
    low_income: bool,
}

/// Read customers from an iterator of raw records, checking tariff references.
fn read_customers_from_iter<I>(iter: I, tariffs: &TariffMap) -> Result<CustomerMap>
where
    I: Iterator<Item = CustomerRaw>,
{
    let mut customers = CustomerMap::new();
    for raw in iter {
        ensure!(
            raw.weight.is_finite() && raw.weight > 0.0,
            "Customer {}: weight must be a finite number greater than zero",
            raw.id
        );
        let tariff_id = tariffs
            .get(raw.tariff_id.as_str())
            .with_context(|| {
                format!("Customer {}: unknown tariff {}", raw.id, raw.tariff_id)
            })?
            .id
            .clone();
        let gas_tariff_id = raw
            .gas_tariff_id
            .filter(|id| !id.is_empty())
            .map(|id| {
                tariffs
                    .get(id.as_str())
                    .map(|tariff| tariff.id.clone())
                    .with_context(|| format!("Customer {}: unknown gas tariff {id}", raw.id))
            })
            .transpose()?;

        let customer = Customer {
            id: raw.id.into(),
            weight: Dimensionless(raw.weight),
            tariff_id,
            gas_tariff_id,
            low_income: raw.low_income,
        };
        ensure!(
            customers
                .insert(customer.id.clone(), customer.clone())
                .is_none(),
            "Duplicate customer ID {}",
            customer.id
        );
    }
    Ok(customers)
}

/// Read the customer population from the model directory.
pub fn read_customers(model_dir: &Path, tariffs: &TariffMap) -> Result<CustomerMap> {
    let file_path = model_dir.join(CUSTOMERS_FILE_NAME);
    let iter = read_csv(&file_path)?;
    read_customers_from_iter(iter, tariffs).with_context(|| input_err_msg(&file_path))
}
