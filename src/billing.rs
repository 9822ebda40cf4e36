//! The bill calculator: itemized monthly bills from aggregated load and rate matrices.
use crate::aggregate::AggregatedLoad;
use crate::customer::{CustomerID, CustomerMap};
use crate::tariff::{Tariff, TariffMap};
use crate::units::{Dimensionless, Money};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use std::rc::Rc;

/// The effective tariff each customer is billed under.
///
/// Usually this mirrors the customer->tariff assignment, but calibration may substitute
/// a scaled tariff, or an unscaled one for an exempt subgroup.
pub type TariffAssignment = IndexMap<CustomerID, Rc<Tariff>>;

/// Build the base tariff assignment from customer metadata.
pub fn assign_tariffs(customers: &CustomerMap, tariffs: &TariffMap) -> Result<TariffAssignment> {
    customers
        .values()
        .map(|customer| {
            let tariff = tariffs.get(&customer.tariff_id).with_context(|| {
                format!(
                    "Customer {} is assigned unknown tariff {}",
                    customer.id, customer.tariff_id
                )
            })?;
            Ok((customer.id.clone(), Rc::clone(tariff)))
        })
        .collect()
}

/// One customer's itemized bill for one month
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyBill {
    /// The billed customer
    pub customer_id: CustomerID,
    /// Month of year (1-12)
    pub month: u32,
    /// The fixed monthly charge
    pub fixed_charge: Money,
    /// The volumetric energy charge across all (period, tier) cells
    pub energy_charge: Money,
    /// The demand charge across all periods, if the tariff has demand charges
    pub demand_charge: Money,
}

impl MonthlyBill {
    /// The total charge for the month
    pub fn total(&self) -> Money {
        self.fixed_charge + self.energy_charge + self.demand_charge
    }
}

/// All monthly bills for one pass over the population
#[derive(Debug, Clone, PartialEq)]
pub struct BillSet {
    /// Bills ordered by customer, then month
    pub bills: Vec<MonthlyBill>,
}

impl BillSet {
    /// Annual bill per customer (the sum over the billed months)
    pub fn annual_by_customer(&self) -> IndexMap<CustomerID, Money> {
        let mut annual: IndexMap<CustomerID, Money> = IndexMap::new();
        for bill in &self.bills {
            *annual
                .entry(bill.customer_id.clone())
                .or_insert(Money(0.0)) += bill.total();
        }
        annual
    }

    /// Population total billed revenue, weighted by sampling weight
    pub fn weighted_revenue(&self, customers: &CustomerMap) -> Money {
        self.weighted_sum(customers, |_| true, MonthlyBill::total)
    }

    /// Population fixed-charge (customer-charge) revenue, weighted
    pub fn weighted_fixed_revenue(&self, customers: &CustomerMap) -> Money {
        self.weighted_sum(customers, |_| true, |bill| bill.fixed_charge)
    }

    /// Population volumetric (energy + demand) revenue, weighted, over the customers
    /// matching `filter`
    pub fn weighted_volumetric_revenue(
        &self,
        customers: &CustomerMap,
        filter: impl Fn(&crate::customer::Customer) -> bool,
    ) -> Money {
        self.weighted_sum(customers, filter, |bill| {
            bill.energy_charge + bill.demand_charge
        })
    }

    fn weighted_sum(
        &self,
        customers: &CustomerMap,
        filter: impl Fn(&crate::customer::Customer) -> bool,
        charge: impl Fn(&MonthlyBill) -> Money,
    ) -> Money {
        let mut total = Money(0.0);
        for bill in &self.bills {
            let customer = &customers[&bill.customer_id];
            if filter(customer) {
                total += charge(bill) * customer.weight;
            }
        }
        total
    }
}

/// Calculate monthly bills from aggregated load.
///
/// A missing energy rate for a (period, tier) with nonzero consumption is a fatal
/// configuration error: silently treating it as zero would under-bill and corrupt
/// revenue neutrality. A customer with zero consumption in a month still owes the fixed
/// charge and appears in the output.
pub fn calculate_bills(agg: &AggregatedLoad, assignment: &TariffAssignment) -> Result<BillSet> {
    let mut by_customer_month: IndexMap<(CustomerID, u32), MonthlyBill> = IndexMap::new();

    for row in &agg.energy {
        let tariff = assignment.get(&row.customer_id).with_context(|| {
            format!("No tariff assigned for customer {}", row.customer_id)
        })?;
        let bill = by_customer_month
            .entry((row.customer_id.clone(), row.month))
            .or_insert_with(|| MonthlyBill {
                customer_id: row.customer_id.clone(),
                month: row.month,
                fixed_charge: tariff.fixed_charge,
                energy_charge: Money(0.0),
                demand_charge: Money(0.0),
            });

        match tariff.energy_rate(&row.period, row.tier) {
            Some(rate) => bill.energy_charge += rate * row.consumption,
            None => {
                ensure!(
                    row.consumption.value() == 0.0 || tariff.missing_rates_are_zero,
                    "Tariff {} has no energy rate for period {} tier {} but customer {} \
                     consumed {} kWh there in month {}",
                    tariff.id,
                    row.period,
                    row.tier + 1,
                    row.customer_id,
                    row.consumption.value(),
                    row.month
                );
            }
        }
    }

    for row in &agg.demand {
        let tariff = &assignment[&row.customer_id];
        // Periods without a demand rate simply carry no demand charge
        if let Some(rate) = tariff.demand_rates.get(&row.period) {
            let bill = by_customer_month
                .get_mut(&(row.customer_id.clone(), row.month))
                .expect("energy rows cover every (customer, month)");
            bill.demand_charge += *rate * row.peak;
        }
    }

    Ok(BillSet {
        bills: by_customer_month.into_values().collect(),
    })
}

/// Scale helper used by calibration: revenue at rates scaled by `factor`, for a bill
/// set computed at unscaled rates. Valid because energy and demand charges are linear
/// in their rates while fixed charges do not scale.
pub fn revenue_at_scaled_rates(
    bills: &BillSet,
    customers: &CustomerMap,
    factor: Dimensionless,
) -> Money {
    bills.weighted_fixed_revenue(customers)
        + factor * bills.weighted_volumetric_revenue(customers, |_| true)
}
