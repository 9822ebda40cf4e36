//! The load aggregator: per-customer monthly totals by (period, tier).
//!
//! This is the dominant cost centre of the whole system, so it runs as one batched pass
//! per customer over contiguous interval arrays. Customers are never dispatched as
//! independent tasks; parallelism, where wanted, belongs at the scenario level.
//!
//! The output contract guarantees exactly one row per (customer, month present, reachable
//! period, tier), zero-filled where there was no consumption, so downstream joins never
//! silently drop a period.
use crate::customer::{CustomerID, CustomerMap};
use crate::load::{ConsumptionBasis, LoadMatrix};
use crate::schedule::ResolvedSchedule;
use crate::tariff::{PeriodID, Tariff, TariffID, TariffMap, TariffStructure, TierPolicy, TierRate};
use crate::units::{Energy, Power};
use anyhow::{Context, Result};
use indexmap::IndexMap;

/// One aggregated energy row: consumption-for-billing by (customer, month, period, tier)
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyRow {
    /// The customer the row belongs to
    pub customer_id: CustomerID,
    /// Month of year (1-12)
    pub month: u32,
    /// The tariff period
    pub period: PeriodID,
    /// The tier index within the period (0 = lowest)
    pub tier: usize,
    /// Consumption assigned to this (period, tier) for the month
    pub consumption: Energy,
}

/// One aggregated demand row: peak interval demand by (customer, month, period)
#[derive(Debug, Clone, PartialEq)]
pub struct DemandRow {
    /// The customer the row belongs to
    pub customer_id: CustomerID,
    /// Month of year (1-12)
    pub month: u32,
    /// The tariff period
    pub period: PeriodID,
    /// The maximum interval demand within the (month, period)
    pub peak: Power,
}

/// Aggregated load for the whole population.
///
/// Depends only on loads, schedules and tariff assignment (not on rate values), so it is
/// computed once and reused across calibration iterations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedLoad {
    /// Energy rows, ordered by customer, then month, period and tier
    pub energy: Vec<EnergyRow>,
    /// Demand rows for demand-charge tariffs only, in the same ordering
    pub demand: Vec<DemandRow>,
}

/// How a tariff's consumption is assigned to tiers during aggregation.
///
/// Selected by inspecting the tariff's structure; an explicit strategy rather than a
/// substituted function, so the fast path and the fallback are both visible call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    /// Flat and time-of-use tariffs: plain sums per (month, period), single tier
    Simple,
    /// Tiered tariffs: cumulative-consumption tier tracking per (month, period)
    Tiered,
}

impl AggregationStrategy {
    /// Select the strategy for a tariff
    pub fn for_tariff(tariff: &Tariff) -> Self {
        match tariff.structure() {
            TariffStructure::Tiered => AggregationStrategy::Tiered,
            _ => AggregationStrategy::Simple,
        }
    }
}

/// Aggregate every customer's load into monthly (period, tier) totals.
///
/// # Arguments
///
/// * `customers` - The customer population with tariff assignments
/// * `loads` - The load matrix, which must be tagged as kilowatt-hours
/// * `tariffs` - All tariff definitions
/// * `schedules` - The resolved period schedule per tariff
/// * `basis` - Whether billing consumption is net or gross
pub fn aggregate_loads(
    customers: &CustomerMap,
    loads: &LoadMatrix,
    tariffs: &TariffMap,
    schedules: &IndexMap<TariffID, ResolvedSchedule>,
    basis: ConsumptionBasis,
) -> Result<AggregatedLoad> {
    loads.ensure_kilowatt_hours()?;

    let timeline = &loads.timeline;
    let months = timeline.months_present();

    // Dense month slot per interval, shared by every customer and tariff
    let month_slots: Vec<usize> = timeline
        .months
        .iter()
        .map(|month| months.iter().position(|m| m == month).expect("month present"))
        .collect();

    let mut result = AggregatedLoad::default();
    for customer in customers.values() {
        let row = loads.customer_index(&customer.id).with_context(|| {
            format!("No load series found for customer {}", customer.id)
        })?;
        let tariff = tariffs.get(&customer.tariff_id).with_context(|| {
            format!(
                "Customer {} is assigned unknown tariff {}",
                customer.id, customer.tariff_id
            )
        })?;
        let schedule = schedules.get(&customer.tariff_id).with_context(|| {
            format!("No resolved schedule for tariff {}", customer.tariff_id)
        })?;

        aggregate_customer(
            customer.id.clone(),
            loads.billing_series(row, basis),
            tariff,
            schedule,
            &months,
            &month_slots,
            loads,
            &mut result,
        );
    }

    Ok(result)
}

/// Aggregate a single customer's interval series and append the zero-filled rows.
#[allow(clippy::too_many_arguments)]
fn aggregate_customer(
    customer_id: CustomerID,
    series: &[f64],
    tariff: &Tariff,
    schedule: &ResolvedSchedule,
    months: &[u32],
    month_slots: &[usize],
    loads: &LoadMatrix,
    result: &mut AggregatedLoad,
) {
    let n_months = months.len();
    let n_periods = schedule.periods.len();
    let max_tiers = schedule
        .periods
        .iter()
        .map(|period| tariff.tier_count(period))
        .max()
        .unwrap_or(1);
    let strategy = AggregationStrategy::for_tariff(tariff);

    // Flat accumulators: (month, period, tier) and (month, period)
    let mut consumption = vec![0.0; n_months * n_periods * max_tiers];
    let mut totals = vec![0.0; n_months * n_periods];
    let mut peaks = vec![0.0_f64; n_months * n_periods];
    let mut cumulative = vec![0.0; n_months * n_periods];

    let track_peaks = tariff.has_demand_charges();
    for (interval, &value) in series.iter().enumerate() {
        let slot = month_slots[interval] * n_periods + schedule.period_indices[interval];
        match strategy {
            AggregationStrategy::Simple => consumption[slot * max_tiers] += value,
            AggregationStrategy::Tiered => {
                let period = schedule.period_of(interval);
                match (tariff.tier_policy, tariff.energy_rates.get(period)) {
                    (TierPolicy::Graduated, Some(tiers)) => split_graduated(
                        tiers,
                        &mut cumulative[slot],
                        value,
                        &mut consumption[slot * max_tiers..(slot + 1) * max_tiers],
                    ),
                    // All-or-nothing assigns tiers from the monthly total afterwards
                    (TierPolicy::AllOrNothing, Some(_)) | (_, None) => {
                        totals[slot] += value;
                    }
                }
            }
        }
        if track_peaks {
            peaks[slot] = peaks[slot].max(value);
        }
    }

    // Second half of the all-or-nothing policy: the entire month's usage is priced at
    // the tier containing the monthly total.
    if strategy == AggregationStrategy::Tiered {
        for (slot, &total) in totals.iter().enumerate() {
            if total == 0.0 {
                continue;
            }
            let period = &schedule.periods[slot % n_periods];
            let tier = match tariff.energy_rates.get(period) {
                // A total exactly at a breakpoint bills at the lower tier
                Some(tiers) => tiers
                    .iter()
                    .position(|tier| tier.limit.is_none_or(|limit| Energy(total) <= limit))
                    .unwrap_or(tiers.len() - 1),
                None => 0,
            };
            consumption[slot * max_tiers + tier] += total;
        }
    }

    // Emit the full zero-filled row set in deterministic order
    for (month_slot, &month) in months.iter().enumerate() {
        for (period_slot, period) in schedule.periods.iter().enumerate() {
            let slot = month_slot * n_periods + period_slot;
            for tier in 0..tariff.tier_count(period) {
                result.energy.push(EnergyRow {
                    customer_id: customer_id.clone(),
                    month,
                    period: period.clone(),
                    tier,
                    consumption: Energy(consumption[slot * max_tiers + tier]),
                });
            }
            if track_peaks {
                result.demand.push(DemandRow {
                    customer_id: customer_id.clone(),
                    month,
                    period: period.clone(),
                    peak: Energy(peaks[slot]) / loads.timeline.interval_length,
                });
            }
        }
    }
}

/// Split one interval's consumption across tiers by cumulative monthly consumption
/// within the period (graduated semantics: each unit is billed at the rate of the tier
/// it falls into).
fn split_graduated(tiers: &[TierRate], cumulative: &mut f64, value: f64, acc: &mut [f64]) {
    if value <= 0.0 {
        // Net exports don't un-fill tiers; they offset the lowest tier
        acc[0] += value;
        return;
    }

    let mut remaining = value;
    while remaining > 0.0 {
        let tier = tier_containing(tiers, Energy(*cumulative));
        let take = match tiers[tier].limit {
            Some(limit) if *cumulative < limit.value() => {
                remaining.min(limit.value() - *cumulative)
            }
            Some(_) => unreachable!("tier_containing returns a tier with headroom"),
            None => remaining,
        };
        acc[tier] += take;
        *cumulative += take;
        remaining -= take;
    }
}

/// The tier into which the next unit of consumption falls, given cumulative monthly
/// consumption so far. Consumption exactly at a breakpoint has filled the lower tier, so
/// the next unit falls in the tier above.
fn tier_containing(tiers: &[TierRate], cumulative: Energy) -> usize {
    tiers
        .iter()
        .position(|tier| tier.limit.is_none_or(|limit| cumulative < limit))
        .unwrap_or(tiers.len() - 1)
}
