//! The bill alignment test: per-customer bills against allocated cost of service.
//!
//! A customer's allocated cost is their economic (marginal) cost of service plus their
//! share of the residual revenue requirement. The alignment value is the annual bill
//! minus that allocated cost: positive means the customer overpays and cross-subsidizes
//! others, negative means they receive a cross-subsidy.
use crate::billing::{BillSet, TariffAssignment};
use crate::customer::{CustomerID, CustomerMap};
use crate::load::{ConsumptionBasis, LoadMatrix};
use crate::marginal_cost::MarginalCostSurface;
use crate::residual::{ResidualAllocation, allocate_residual};
use crate::schedule::ResolvedSchedule;
use crate::tariff::TariffID;
use crate::units::{Dimensionless, Energy, Money};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use serde::Serialize;

/// One customer's bill-alignment result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillAlignmentRecord {
    /// The customer
    pub customer_id: CustomerID,
    /// The annual bill at the final rates
    pub annual_bill: Money,
    /// The marginal cost of serving this customer's load
    pub economic_cost: Money,
    /// The customer's share of the residual revenue requirement
    pub residual_share: Money,
    /// `annual_bill - (economic_cost + residual_share)`
    pub alignment: Money,
}

/// The mean alignment within one subgroup of the population
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMetric {
    /// The subgroup label
    pub group: String,
    /// The weighted mean alignment of the subgroup
    pub mean_alignment: Money,
    /// The subgroup's weighted headcount
    pub headcount: Dimensionless,
}

/// Population-level cross-subsidy and efficiency metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossSubsidyMetrics {
    /// The weighted mean of |alignment|: the average cross-subsidy
    pub average_cross_subsidy: Money,
    /// The weighted mean alignment among overpaying customers
    pub average_overpayment: Money,
    /// The weighted mean alignment among underpaying customers (negative)
    pub average_underpayment: Money,
    /// Mean alignment by subgroup: income, on-site generation, usage quartile
    pub by_group: Vec<GroupMetric>,
    /// The static deadweight loss from prices diverging from marginal cost
    pub deadweight_loss: Money,
}

/// Everything the alignment test consumes, all computed by earlier stages
pub struct AlignmentInputs<'a> {
    /// Final bills at the calibrated rates
    pub bills: &'a BillSet,
    /// The customer population
    pub customers: &'a CustomerMap,
    /// The interval load data
    pub loads: &'a LoadMatrix,
    /// The marginal-cost surface
    pub costs: &'a MarginalCostSurface,
    /// The effective tariff per customer, for the hourly billed-rate signal
    pub assignment: &'a TariffAssignment,
    /// The resolved schedule per tariff
    pub schedules: &'a IndexMap<TariffID, ResolvedSchedule>,
    /// The total revenue requirement
    pub revenue_requirement: Money,
    /// How the residual is allocated
    pub policy: ResidualAllocation,
    /// Short-run price elasticity of demand (negative)
    pub elasticity: f64,
    /// Whether billing consumption is net or gross
    pub basis: ConsumptionBasis,
    /// Whether to enforce the revenue-neutrality invariant. Only meaningful when the
    /// rates were calibrated so billed revenue equals the requirement.
    pub enforce_neutrality: bool,
}

/// Relative tolerance for the revenue-neutrality invariant
const NEUTRALITY_TOLERANCE: f64 = 1e-6;

/// Run the bill alignment test over the whole population.
pub fn bill_alignment(
    inputs: &AlignmentInputs,
) -> Result<(Vec<BillAlignmentRecord>, CrossSubsidyMetrics)> {
    let annual_bills = inputs.bills.annual_by_customer();

    // Economic cost, net annual consumption and the generation flag per customer, one
    // pass over the matrix
    let mut economic_costs: IndexMap<CustomerID, Money> = IndexMap::new();
    let mut annual_net: IndexMap<CustomerID, Energy> = IndexMap::new();
    let mut has_generation: IndexMap<CustomerID, bool> = IndexMap::new();
    let mut total_economic = Money(0.0);
    for customer in inputs.customers.values() {
        let row = inputs
            .loads
            .customer_index(&customer.id)
            .with_context(|| format!("No load series found for customer {}", customer.id))?;
        let cost = inputs.costs.economic_cost(inputs.loads.net_series(row));
        total_economic += cost * customer.weight;
        economic_costs.insert(customer.id.clone(), cost);
        annual_net.insert(customer.id.clone(), inputs.loads.annual_net(row));
        has_generation.insert(customer.id.clone(), inputs.loads.has_generation(row));
    }

    let residual = inputs.revenue_requirement - total_economic;
    debug!(
        "Residual revenue requirement: {} - {} = {}",
        inputs.revenue_requirement.value(),
        total_economic.value(),
        residual.value()
    );
    let shares = allocate_residual(inputs.policy, residual, inputs.customers, &annual_net)?;

    let records: Vec<BillAlignmentRecord> = inputs
        .customers
        .keys()
        .map(|id| {
            let annual_bill = annual_bills.get(id).copied().unwrap_or(Money(0.0));
            let economic_cost = economic_costs[id];
            let residual_share = shares[id];
            BillAlignmentRecord {
                customer_id: id.clone(),
                annual_bill,
                economic_cost,
                residual_share,
                alignment: annual_bill - (economic_cost + residual_share),
            }
        })
        .collect();

    if inputs.enforce_neutrality {
        let weighted_sum: Money = records
            .iter()
            .map(|record| record.alignment * inputs.customers[&record.customer_id].weight)
            .sum();
        ensure!(
            weighted_sum.value().abs()
                <= NEUTRALITY_TOLERANCE * inputs.revenue_requirement.value().abs().max(1.0),
            "Revenue-neutrality violation: weighted bill alignment sums to {} against a \
             requirement of {}; this is an internal inconsistency between billing and \
             cost allocation",
            weighted_sum.value(),
            inputs.revenue_requirement.value()
        );
    }

    let metrics = CrossSubsidyMetrics {
        average_cross_subsidy: weighted_mean(&records, inputs.customers, |r| {
            Money(r.alignment.value().abs())
        }),
        average_overpayment: weighted_mean_where(&records, inputs.customers, |r| {
            r.alignment.value() > 0.0
        }),
        average_underpayment: weighted_mean_where(&records, inputs.customers, |r| {
            r.alignment.value() < 0.0
        }),
        by_group: group_metrics(&records, inputs.customers, &annual_net, &has_generation),
        deadweight_loss: deadweight_loss(inputs)?,
    };

    Ok((records, metrics))
}

fn weighted_mean(
    records: &[BillAlignmentRecord],
    customers: &CustomerMap,
    value: impl Fn(&BillAlignmentRecord) -> Money,
) -> Money {
    let mut total = Money(0.0);
    let mut weight = Dimensionless(0.0);
    for record in records {
        let w = customers[&record.customer_id].weight;
        total += value(record) * w;
        weight += w;
    }
    if weight.0 > 0.0 { total / weight } else { Money(0.0) }
}

fn weighted_mean_where(
    records: &[BillAlignmentRecord],
    customers: &CustomerMap,
    keep: impl Fn(&BillAlignmentRecord) -> bool,
) -> Money {
    let mut total = Money(0.0);
    let mut weight = Dimensionless(0.0);
    for record in records.iter().filter(|r| keep(r)) {
        let w = customers[&record.customer_id].weight;
        total += record.alignment * w;
        weight += w;
    }
    if weight.0 > 0.0 { total / weight } else { Money(0.0) }
}

/// Mean alignment for the standard subgroup partitions: income status, presence of
/// on-site generation and net-usage quartile.
fn group_metrics(
    records: &[BillAlignmentRecord],
    customers: &CustomerMap,
    annual_net: &IndexMap<CustomerID, Energy>,
    has_generation: &IndexMap<CustomerID, bool>,
) -> Vec<GroupMetric> {
    // Usage quartile by rank of net annual consumption
    let ranked: Vec<&CustomerID> = annual_net
        .keys()
        .sorted_by(|a, b| annual_net[*a].value().total_cmp(&annual_net[*b].value()))
        .collect();
    let quartile_of: IndexMap<&CustomerID, usize> = ranked
        .iter()
        .enumerate()
        .map(|(rank, id)| (*id, (rank * 4 / ranked.len().max(1)).min(3)))
        .collect();

    let mut groups: IndexMap<String, (Money, Dimensionless)> = IndexMap::new();
    for record in records {
        let customer = &customers[&record.customer_id];
        let labels = [
            if customer.low_income {
                "income/low-income".to_string()
            } else {
                "income/other".to_string()
            },
            if has_generation[&record.customer_id] {
                "generation/solar".to_string()
            } else {
                "generation/none".to_string()
            },
            format!("usage-quartile/q{}", quartile_of[&record.customer_id] + 1),
        ];
        for label in labels {
            let entry = groups
                .entry(label)
                .or_insert((Money(0.0), Dimensionless(0.0)));
            entry.0 += record.alignment * customer.weight;
            entry.1 += customer.weight;
        }
    }

    groups
        .into_iter()
        .map(|(group, (total, headcount))| GroupMetric {
            group,
            mean_alignment: total / headcount,
            headcount,
        })
        .collect()
}

/// The static deadweight loss estimate, holding consumption fixed.
///
/// For each customer and hour: `Q x (-elasticity / 2) x (billed rate - marginal cost)^2`,
/// with the billed rate taken as the first-tier energy rate of the hour's period. A
/// linear demand curve at each hour is assumed; no demand response is simulated.
fn deadweight_loss(inputs: &AlignmentInputs) -> Result<Money> {
    ensure!(
        inputs.elasticity <= 0.0,
        "Demand elasticity must be non-positive, got {}",
        inputs.elasticity
    );
    let half_slope = -inputs.elasticity / 2.0;
    let marginal = inputs.costs.total();

    let mut total = 0.0;
    for customer in inputs.customers.values() {
        let row = inputs
            .loads
            .customer_index(&customer.id)
            .with_context(|| format!("No load series found for customer {}", customer.id))?;
        let tariff = &inputs.assignment[&customer.id];
        let schedule = inputs.schedules.get(&customer.tariff_id).with_context(|| {
            format!("No resolved schedule for tariff {}", customer.tariff_id)
        })?;
        let series = inputs.loads.billing_series(row, inputs.basis);

        let mut customer_loss = 0.0;
        for (interval, &quantity) in series.iter().enumerate() {
            if quantity <= 0.0 {
                continue;
            }
            let period = schedule.period_of(interval);
            let rate = tariff
                .first_tier_rate(period)
                .map_or(0.0, crate::units::MoneyPerEnergy::value);
            let gap = rate - marginal[interval];
            customer_loss += quantity * half_slope * gap * gap;
        }
        total += customer_loss * customer.weight.0;
    }
    Ok(Money(total))
}
