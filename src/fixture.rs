//! Shared test fixtures
use crate::marginal_cost::{CostComponent, MarginalCostSurface};
use crate::tariff::{CalendarRule, PeriodScheduleRule, Tariff, TierPolicy, TierRate};
use crate::timeline::{DayType, Timeline};
use crate::units::{Energy, Money, MoneyPerEnergy, MoneyPerPower};
use chrono::TimeDelta;
use indexmap::IndexMap;
use rstest::fixture;
use std::rc::Rc;

/// 48 hourly intervals starting Sunday 2023-01-01, so the first day is a weekend and the
/// second a weekday
#[fixture]
pub fn timeline_two_days() -> Rc<Timeline> {
    let start: chrono::DateTime<chrono::FixedOffset> =
        "2023-01-01T00:00:00-08:00".parse().unwrap();
    let timestamps = (0..48).map(|i| start + TimeDelta::hours(i)).collect();
    let (timeline, _) = Timeline::new(timestamps).unwrap();
    Rc::new(timeline)
}

/// Hourly intervals covering the whole of 2023
#[fixture]
pub fn timeline_full_year() -> Rc<Timeline> {
    let start: chrono::DateTime<chrono::FixedOffset> =
        "2023-01-01T00:00:00-08:00".parse().unwrap();
    let timestamps = (0..8760).map(|i| start + TimeDelta::hours(i)).collect();
    let (timeline, _) = Timeline::new(timestamps).unwrap();
    Rc::new(timeline)
}

/// A cost surface on [`timeline_two_days`] whose costliest hours are 17-20, with 13-16
/// next costliest
#[fixture]
pub fn cost_surface_evening_peak(timeline_two_days: Rc<Timeline>) -> MarginalCostSurface {
    let energy: Vec<f64> = timeline_two_days
        .hours
        .iter()
        .map(|hour| match hour {
            17..=20 => 0.12,
            13..=16 => 0.07,
            _ => 0.02,
        })
        .collect();
    let flat = vec![0.005; timeline_two_days.len()];
    let components: IndexMap<_, _> = [
        (CostComponent::Energy, energy),
        (CostComponent::GenerationCapacity, flat.clone()),
        (CostComponent::DistributionCapacity, flat.clone()),
        (CostComponent::TransmissionCapacity, flat),
    ]
    .into_iter()
    .collect();
    MarginalCostSurface::new(timeline_two_days, components).unwrap()
}

fn all_hours_rule(period: &str) -> CalendarRule {
    CalendarRule {
        months: (1..=12).collect(),
        day_types: vec![DayType::Weekday, DayType::Weekend],
        start_hour: 0,
        end_hour: 23,
        period: period.into(),
    }
}

/// A bundled flat-rate tariff: one period, one tier, a small fixed charge
#[fixture]
pub fn flat_tariff() -> Tariff {
    Tariff {
        id: "flat".into(),
        description: "Bundled flat rate".into(),
        fixed_charge: Money(5.0),
        energy_rates: [(
            "all".into(),
            vec![TierRate {
                rate: MoneyPerEnergy(0.092_157),
                limit: None,
            }],
        )]
        .into_iter()
        .collect(),
        demand_rates: IndexMap::new(),
        schedule: PeriodScheduleRule::Calendar(vec![all_hours_rule("all")]),
        tier_policy: TierPolicy::Graduated,
        calibrate: true,
        missing_rates_are_zero: false,
    }
}

/// A two-period time-of-use tariff with a peak demand charge. Peak covers hours 17-20
/// every day; the trailing catch-all rule picks up the rest.
#[fixture]
pub fn tou_tariff() -> Tariff {
    let peak_rule = CalendarRule {
        months: (1..=12).collect(),
        day_types: vec![DayType::Weekday, DayType::Weekend],
        start_hour: 17,
        end_hour: 20,
        period: "peak".into(),
    };
    Tariff {
        id: "tou".into(),
        description: "Two-period time of use".into(),
        fixed_charge: Money(10.0),
        energy_rates: [
            (
                "peak".into(),
                vec![TierRate {
                    rate: MoneyPerEnergy(0.30),
                    limit: None,
                }],
            ),
            (
                "off-peak".into(),
                vec![TierRate {
                    rate: MoneyPerEnergy(0.10),
                    limit: None,
                }],
            ),
        ]
        .into_iter()
        .collect(),
        demand_rates: [("peak".into(), MoneyPerPower(8.0))].into_iter().collect(),
        schedule: PeriodScheduleRule::Calendar(vec![peak_rule, all_hours_rule("off-peak")]),
        tier_policy: TierPolicy::Graduated,
        calibrate: true,
        missing_rates_are_zero: false,
    }
}

/// A two-tier graduated tariff with a 30 kWh monthly breakpoint
#[fixture]
pub fn tiered_tariff() -> Tariff {
    Tariff {
        id: "tiered".into(),
        description: "Two-tier inclining block".into(),
        fixed_charge: Money(0.0),
        energy_rates: [(
            "all".into(),
            vec![
                TierRate {
                    rate: MoneyPerEnergy(0.10),
                    limit: Some(Energy(30.0)),
                },
                TierRate {
                    rate: MoneyPerEnergy(0.20),
                    limit: None,
                },
            ],
        )]
        .into_iter()
        .collect(),
        demand_rates: IndexMap::new(),
        schedule: PeriodScheduleRule::Calendar(vec![all_hours_rule("all")]),
        tier_policy: TierPolicy::Graduated,
        calibrate: false,
        missing_rates_are_zero: false,
    }
}
