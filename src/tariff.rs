//! Tariff definitions: the rate structures customers are billed under.
//!
//! A tariff couples a monthly fixed charge, an energy-charge matrix keyed by
//! (period, tier), an optional demand-charge matrix keyed by period and a period
//! schedule rule. The core treats tariffs as read-only configuration.
use crate::id::define_id_type;
use crate::timeline::DayType;
use crate::units::{Dimensionless, Energy, Money, MoneyPerEnergy, MoneyPerPower};
use anyhow::{Context, Result, ensure};
use indexmap::{IndexMap, IndexSet};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::rc::Rc;

define_id_type! {TariffID}
define_id_type! {PeriodID}

/// How monthly consumption is assigned to tiers within a period.
///
/// The policy is explicit configuration, never inferred from the tariff shape.
#[derive(
    Debug, Clone, Copy, PartialEq, Default, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum TierPolicy {
    /// Each unit of consumption is billed at the rate of the tier it falls into
    #[default]
    #[string = "graduated"]
    Graduated,
    /// The entire month's usage is billed at the tier containing the monthly total
    #[string = "all-or-nothing"]
    AllOrNothing,
}

/// One tier of the energy-charge matrix for a period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierRate {
    /// The volumetric rate for consumption falling in this tier
    pub rate: MoneyPerEnergy,
    /// The cumulative monthly consumption at which the next tier begins.
    ///
    /// `None` marks the final, unbounded tier.
    pub limit: Option<Energy>,
}

/// A single calendar classification rule: month set x day types x hour range -> period
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarRule {
    /// Months of year (1-12) the rule applies to
    pub months: Vec<u32>,
    /// Day types the rule applies to
    pub day_types: Vec<DayType>,
    /// First hour of day (0-23) covered, inclusive
    pub start_hour: u32,
    /// Last hour of day (0-23) covered, inclusive
    pub end_hour: u32,
    /// The period assigned to matching intervals
    pub period: PeriodID,
}

impl CalendarRule {
    /// Whether the rule covers the given interval attributes
    pub fn matches(&self, month: u32, day_type: DayType, hour: u32) -> bool {
        self.months.contains(&month)
            && self.day_types.contains(&day_type)
            && (self.start_hour..=self.end_hour).contains(&hour)
    }
}

/// How a tariff's periods are derived from the calendar
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodScheduleRule {
    /// Directly-specified calendar rules; the first matching rule wins
    Calendar(Vec<CalendarRule>),
    /// Periods derived by ranking mean marginal cost across like-hour groups
    CostDerived {
        /// Share of hour slots per (month, day type) group assigned to "peak"
        peak_share: f64,
        /// Share of hour slots assigned to "shoulder" (may be zero)
        shoulder_share: f64,
    },
}

/// The structural class of a tariff, which selects the aggregation strategy and the
/// calibration path (closed-form vs iterative).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TariffStructure {
    /// A single period with a single tier
    Flat,
    /// Multiple periods, one tier each
    TimeOfUse,
    /// At least one period with multiple tiers
    Tiered,
}

/// A named rate structure
#[derive(Debug, Clone, PartialEq)]
pub struct Tariff {
    /// Unique ID identifying the tariff
    pub id: TariffID,
    /// A human-readable description
    pub description: String,
    /// The fixed charge per month
    pub fixed_charge: Money,
    /// Energy rates per period, ordered from the lowest tier up
    pub energy_rates: IndexMap<PeriodID, Vec<TierRate>>,
    /// Demand rates per period; empty if the tariff has no demand charges
    pub demand_rates: IndexMap<PeriodID, MoneyPerPower>,
    /// How intervals map to periods
    pub schedule: PeriodScheduleRule,
    /// How monthly consumption is assigned to tiers
    pub tier_policy: TierPolicy,
    /// Whether the volumetric rates are marginal-cost-based and subject to revenue
    /// calibration
    pub calibrate: bool,
    /// Whether a missing (period, tier) rate defaults to zero.
    ///
    /// Without this flag, consumption in a period with no rate entry is a fatal
    /// configuration error.
    pub missing_rates_are_zero: bool,
}

impl Tariff {
    /// Classify the tariff's structure
    pub fn structure(&self) -> TariffStructure {
        if self.energy_rates.values().any(|tiers| tiers.len() > 1) {
            TariffStructure::Tiered
        } else if self.energy_rates.len() > 1 {
            TariffStructure::TimeOfUse
        } else {
            TariffStructure::Flat
        }
    }

    /// Whether any period carries a demand charge
    pub fn has_demand_charges(&self) -> bool {
        !self.demand_rates.is_empty()
    }

    /// The number of tiers reachable in the given period (at least one)
    pub fn tier_count(&self, period: &PeriodID) -> usize {
        self.energy_rates.get(period).map_or(1, Vec::len)
    }

    /// The energy rate for a (period, tier), if one is configured
    pub fn energy_rate(&self, period: &PeriodID, tier: usize) -> Option<MoneyPerEnergy> {
        self.energy_rates
            .get(period)
            .and_then(|tiers| tiers.get(tier))
            .map(|tier| tier.rate)
    }

    /// The rate of the lowest tier for a period, used as the hourly price signal
    pub fn first_tier_rate(&self, period: &PeriodID) -> Option<MoneyPerEnergy> {
        self.energy_rate(period, 0)
    }

    /// Check the rate matrices against the periods the resolved schedule can produce.
    ///
    /// Every (period, tier) reachable by the schedule must have a rate entry unless the
    /// tariff explicitly flags missing rates as zero. This runs before any billing so a
    /// misconfigured tariff aborts the run up front.
    pub fn validate(&self, reachable_periods: &IndexSet<PeriodID>) -> Result<()> {
        for period in reachable_periods {
            if !self.energy_rates.contains_key(period) {
                ensure!(
                    self.missing_rates_are_zero,
                    "Tariff {} has no energy rate for period {period} and does not \
                     default missing rates to zero",
                    self.id
                );
            }
        }
        for (period, tiers) in &self.energy_rates {
            ensure!(
                reachable_periods.contains(period),
                "Tariff {} defines energy rates for period {period}, which its schedule \
                 never produces",
                self.id
            );
            ensure!(
                !tiers.is_empty(),
                "Tariff {} has an empty tier list for period {period}",
                self.id
            );
            let (last, lower) = tiers.split_last().expect("non-empty");
            ensure!(
                last.limit.is_none(),
                "Tariff {}: the final tier for period {period} must be unbounded",
                self.id
            );
            let mut previous: Option<Energy> = None;
            for tier in lower {
                let limit = tier.limit.with_context(|| {
                    format!(
                        "Tariff {}: only the final tier for period {period} may omit a \
                         consumption breakpoint",
                        self.id
                    )
                })?;
                ensure!(
                    limit.value() > 0.0 && previous.is_none_or(|p| limit > p),
                    "Tariff {}: tier breakpoints for period {period} must be positive \
                     and strictly increasing",
                    self.id
                );
                previous = Some(limit);
            }
        }
        for period in self.demand_rates.keys() {
            ensure!(
                reachable_periods.contains(period),
                "Tariff {} defines a demand rate for period {period}, which its \
                 schedule never produces",
                self.id
            );
        }
        Ok(())
    }

    /// A copy of this tariff with every volumetric (energy and demand) rate scaled by
    /// `factor`. The fixed charge never scales.
    pub fn with_scaled_rates(&self, factor: Dimensionless) -> Tariff {
        let energy_rates = self
            .energy_rates
            .iter()
            .map(|(period, tiers)| {
                let tiers = tiers
                    .iter()
                    .map(|tier| TierRate {
                        rate: factor * tier.rate,
                        limit: tier.limit,
                    })
                    .collect();
                (period.clone(), tiers)
            })
            .collect();
        let demand_rates = self
            .demand_rates
            .iter()
            .map(|(period, rate)| (period.clone(), factor * *rate))
            .collect();

        Tariff {
            energy_rates,
            demand_rates,
            ..self.clone()
        }
    }
}

/// A map of [`Tariff`]s, keyed by ID, in input order
pub type TariffMap = IndexMap<TariffID, Rc<Tariff>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{flat_tariff, tiered_tariff, tou_tariff};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_structure_classification(
        flat_tariff: Tariff,
        tou_tariff: Tariff,
        tiered_tariff: Tariff,
    ) {
        assert_eq!(flat_tariff.structure(), TariffStructure::Flat);
        assert_eq!(tou_tariff.structure(), TariffStructure::TimeOfUse);
        assert_eq!(tiered_tariff.structure(), TariffStructure::Tiered);
    }

    #[rstest]
    fn test_validate_missing_rate(tou_tariff: Tariff) {
        let mut reachable: IndexSet<PeriodID> =
            tou_tariff.energy_rates.keys().cloned().collect();
        assert!(tou_tariff.validate(&reachable).is_ok());

        // A reachable period without a rate entry is a configuration error
        reachable.insert("super-peak".into());
        assert!(tou_tariff.validate(&reachable).is_err());

        // ...unless the tariff defaults missing rates to zero
        let tariff = Tariff {
            missing_rates_are_zero: true,
            ..tou_tariff
        };
        assert!(tariff.validate(&reachable).is_ok());
    }

    #[rstest]
    fn test_validate_tier_breakpoints(tiered_tariff: Tariff) {
        let reachable: IndexSet<PeriodID> =
            tiered_tariff.energy_rates.keys().cloned().collect();
        assert!(tiered_tariff.validate(&reachable).is_ok());

        // Final tier must be unbounded
        let mut tariff = tiered_tariff.clone();
        tariff.energy_rates[0].last_mut().unwrap().limit = Some(Energy(1000.0));
        assert!(tariff.validate(&reachable).is_err());

        // Breakpoints must increase
        let mut tariff = tiered_tariff;
        tariff.energy_rates[0].first_mut().unwrap().limit = Some(Energy(0.0));
        assert!(tariff.validate(&reachable).is_err());
    }

    #[rstest]
    fn test_with_scaled_rates(tou_tariff: Tariff) {
        let scaled = tou_tariff.with_scaled_rates(Dimensionless(2.0));
        assert_eq!(scaled.fixed_charge, tou_tariff.fixed_charge);
        for (period, tiers) in &tou_tariff.energy_rates {
            for (tier_index, tier) in tiers.iter().enumerate() {
                assert_approx_eq!(
                    MoneyPerEnergy,
                    scaled.energy_rate(period, tier_index).unwrap(),
                    Dimensionless(2.0) * tier.rate
                );
            }
        }
    }
}
