//! Allocation of the residual (non-marginal) revenue requirement across customers.
//!
//! The residual is the slice of the revenue requirement that marginal costs alone do not
//! recover. The policies below only redistribute it; none of them changes its total, so
//! the weighted sum of allocated shares always equals the residual exactly. That is what
//! keeps the population-weighted sum of bill alignment at zero.
use crate::customer::{CustomerID, CustomerMap, weighted_headcount};
use crate::units::{Energy, Money};
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};

/// How the residual revenue requirement is spread across customers
#[derive(
    Debug, Clone, Copy, PartialEq, Default, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum ResidualAllocation {
    /// An equal share per (weighted) customer
    #[string = "flat"]
    Flat,
    /// Shares proportional to net annual consumption
    #[default]
    #[string = "volumetric"]
    Volumetric,
    /// Volumetric shares over non-low-income customers only; low-income customers get a
    /// zero share
    #[string = "volumetric-excluding-low-income"]
    VolumetricExcludingLowIncome,
}

impl ResidualAllocation {
    /// Whether the policy exempts the given customer from carrying any residual
    pub fn exempts(self, customer: &crate::customer::Customer) -> bool {
        self == ResidualAllocation::VolumetricExcludingLowIncome && customer.low_income
    }
}

/// Allocate the residual across the population under the given policy.
///
/// `annual_net` is each customer's net annual consumption, which the volumetric policies
/// use as the allocation key. The returned shares are per customer record; multiplying by
/// the sampling weight and summing recovers `residual`.
pub fn allocate_residual(
    policy: ResidualAllocation,
    residual: Money,
    customers: &CustomerMap,
    annual_net: &IndexMap<CustomerID, Energy>,
) -> Result<IndexMap<CustomerID, Money>> {
    match policy {
        ResidualAllocation::Flat => {
            let headcount = weighted_headcount(customers);
            ensure!(
                headcount.0 > 0.0,
                "Cannot allocate the residual over a population with zero total weight"
            );
            let share = residual / headcount;
            Ok(customers.keys().map(|id| (id.clone(), share)).collect())
        }
        ResidualAllocation::Volumetric => {
            volumetric_shares(residual, customers, annual_net, |_| true)
        }
        ResidualAllocation::VolumetricExcludingLowIncome => {
            volumetric_shares(residual, customers, annual_net, |customer| {
                !customer.low_income
            })
        }
    }
}

fn volumetric_shares(
    residual: Money,
    customers: &CustomerMap,
    annual_net: &IndexMap<CustomerID, Energy>,
    eligible: impl Fn(&crate::customer::Customer) -> bool,
) -> Result<IndexMap<CustomerID, Money>> {
    let denominator: Energy = customers
        .values()
        .filter(|customer| eligible(customer))
        .map(|customer| annual_net[&customer.id] * customer.weight)
        .sum();
    ensure!(
        denominator.value() != 0.0,
        "Cannot allocate the residual volumetrically: eligible customers have zero net \
         annual consumption in total"
    );

    Ok(customers
        .values()
        .map(|customer| {
            let share = if eligible(customer) {
                residual * (annual_net[&customer.id] / denominator)
            } else {
                Money(0.0)
            };
            (customer.id.clone(), share)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::Customer;
    use crate::units::Dimensionless;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn population() -> (CustomerMap, IndexMap<CustomerID, Energy>) {
        let customers: CustomerMap = [("a", 1.0, false), ("b", 2.0, false), ("c", 1.0, true)]
            .into_iter()
            .map(|(id, weight, low_income)| {
                let customer = Customer {
                    id: id.into(),
                    weight: Dimensionless(weight),
                    tariff_id: "flat".into(),
                    gas_tariff_id: None,
                    low_income,
                };
                (customer.id.clone(), customer)
            })
            .collect();
        let annual_net = [("a", 1000.0), ("b", 3000.0), ("c", 2000.0)]
            .into_iter()
            .map(|(id, kwh)| (CustomerID::new(id), Energy(kwh)))
            .collect();
        (customers, annual_net)
    }

    fn weighted_total(
        shares: &IndexMap<CustomerID, Money>,
        customers: &CustomerMap,
    ) -> Money {
        customers
            .values()
            .map(|customer| shares[&customer.id] * customer.weight)
            .sum()
    }

    #[rstest]
    #[case(ResidualAllocation::Flat)]
    #[case(ResidualAllocation::Volumetric)]
    #[case(ResidualAllocation::VolumetricExcludingLowIncome)]
    fn test_shares_sum_to_residual(#[case] policy: ResidualAllocation) {
        let (customers, annual_net) = population();
        let residual = Money(40_000.0);
        let shares = allocate_residual(policy, residual, &customers, &annual_net).unwrap();
        assert_approx_eq!(
            Money,
            weighted_total(&shares, &customers),
            residual,
            epsilon = 1e-6
        );
    }

    #[rstest]
    fn test_flat_shares_are_equal() {
        let (customers, annual_net) = population();
        let shares =
            allocate_residual(ResidualAllocation::Flat, Money(400.0), &customers, &annual_net)
                .unwrap();
        // Total weight is 4, so every customer record carries $100
        for share in shares.values() {
            assert_approx_eq!(Money, *share, Money(100.0));
        }
    }

    #[rstest]
    fn test_volumetric_shares_follow_consumption() {
        let (customers, annual_net) = population();
        let shares = allocate_residual(
            ResidualAllocation::Volumetric,
            Money(9000.0),
            &customers,
            &annual_net,
        )
        .unwrap();
        // Weighted consumption: 1000 + 2x3000 + 2000 = 9000 kWh, so $1/kWh of net usage
        assert_approx_eq!(Money, shares[&CustomerID::new("a")], Money(1000.0));
        assert_approx_eq!(Money, shares[&CustomerID::new("b")], Money(3000.0));
        assert_approx_eq!(Money, shares[&CustomerID::new("c")], Money(2000.0));
    }

    #[rstest]
    fn test_exclusion_zeroes_the_subgroup() {
        let (customers, annual_net) = population();
        let shares = allocate_residual(
            ResidualAllocation::VolumetricExcludingLowIncome,
            Money(7000.0),
            &customers,
            &annual_net,
        )
        .unwrap();
        // Eligible weighted consumption: 1000 + 2x3000 = 7000 kWh
        assert_approx_eq!(Money, shares[&CustomerID::new("a")], Money(1000.0));
        assert_approx_eq!(Money, shares[&CustomerID::new("b")], Money(3000.0));
        assert_approx_eq!(Money, shares[&CustomerID::new("c")], Money(0.0));
    }

    #[rstest]
    fn test_zero_consumption_population_rejected() {
        let (customers, _) = population();
        let annual_net = customers
            .keys()
            .map(|id| (id.clone(), Energy(0.0)))
            .collect();
        assert!(
            allocate_residual(
                ResidualAllocation::Volumetric,
                Money(1000.0),
                &customers,
                &annual_net
            )
            .is_err()
        );
    }
}
