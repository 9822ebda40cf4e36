//! Customers and their tariff assignments.
use crate::id::define_id_type;
use crate::tariff::TariffID;
use crate::units::Dimensionless;
use indexmap::IndexMap;

define_id_type! {CustomerID}

/// One building/account in the simulated population.
///
/// Customers are created once per run from external metadata and are immutable for the
/// run. The sampling weight is a population-representativeness multiplier: a weight of
/// 250 means this metered building stands in for 250 like it.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    /// Unique ID identifying the customer
    pub id: CustomerID,
    /// Population-representativeness multiplier
    pub weight: Dimensionless,
    /// The electricity tariff the customer is billed under
    pub tariff_id: TariffID,
    /// The gas tariff the customer is billed under, if any
    pub gas_tariff_id: Option<TariffID>,
    /// Whether the customer belongs to the low-income subgroup
    pub low_income: bool,
}

/// A map of [`Customer`]s, keyed by ID, in input order
pub type CustomerMap = IndexMap<CustomerID, Customer>;

/// The weighted headcount of a population (the sum of sampling weights)
pub fn weighted_headcount(customers: &CustomerMap) -> Dimensionless {
    let mut total = Dimensionless(0.0);
    for customer in customers.values() {
        total += customer.weight;
    }
    total
}
