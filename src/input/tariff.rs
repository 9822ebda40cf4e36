//! Code for reading tariff definitions from `tariffs.toml`.
//!
//! Tariffs are nested structures (rate matrices plus a schedule rule), so they live in a
//! TOML file rather than CSV like the flat per-customer data.
use super::{deserialise_proportion, input_err_msg, read_toml};
use crate::tariff::{
    CalendarRule, PeriodID, PeriodScheduleRule, Tariff, TariffMap, TierPolicy, TierRate,
};
use crate::timeline::DayType;
use crate::units::{Energy, Money, MoneyPerEnergy, MoneyPerPower};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::rc::Rc;

const TARIFFS_FILE_NAME: &str = "tariffs.toml";

/// Represents the contents of the entire tariffs file.
#[derive(Debug, Deserialize, PartialEq)]
struct TariffsFile {
    #[serde(rename = "tariff")]
    tariffs: Vec<TariffRaw>,
}

/// One tariff as specified in the file
#[derive(Debug, Deserialize, PartialEq)]
struct TariffRaw {
    id: String,
    #[serde(default)]
    description: String,
    fixed_charge: f64,
    #[serde(default)]
    calibrate: bool,
    #[serde(default)]
    tier_policy: TierPolicy,
    #[serde(default)]
    missing_rates_are_zero: bool,
    #[serde(default, rename = "energy_rate")]
    energy_rates: Vec<EnergyRateRaw>,
    #[serde(default, rename = "demand_rate")]
    demand_rates: Vec<DemandRateRaw>,
    #[serde(default, rename = "calendar_rule")]
    calendar_rules: Vec<CalendarRuleRaw>,
    cost_derived: Option<CostDerivedRaw>,
}

/// One (period, tier) cell of the energy-rate matrix. Tiers for the same period are
/// taken in file order, lowest first.
#[derive(Debug, Deserialize, PartialEq)]
struct EnergyRateRaw {
    period: String,
    rate: f64,
    limit: Option<f64>,
}

/// A demand rate for one period
#[derive(Debug, Deserialize, PartialEq)]
struct DemandRateRaw {
    period: String,
    rate: f64,
}

fn all_months() -> Vec<u32> {
    (1..=12).collect()
}

fn all_day_types() -> Vec<DayType> {
    vec![DayType::Weekday, DayType::Weekend]
}

/// A calendar classification rule. Months and day types default to all.
#[derive(Debug, Deserialize, PartialEq)]
struct CalendarRuleRaw {
    #[serde(default = "all_months")]
    months: Vec<u32>,
    #[serde(default = "all_day_types")]
    day_types: Vec<DayType>,
    start_hour: u32,
    end_hour: u32,
    period: String,
}

/// A cost-derived schedule specification
#[derive(Debug, Deserialize, PartialEq)]
struct CostDerivedRaw {
    #[serde(deserialize_with = "deserialise_proportion")]
    peak_share: f64,
    #[serde(default, deserialize_with = "deserialise_proportion")]
    shoulder_share: f64,
}

impl TariffRaw {
    fn into_tariff(self) -> Result<Tariff> {
        ensure!(
            self.fixed_charge.is_finite() && self.fixed_charge >= 0.0,
            "fixed_charge must be a finite, non-negative number"
        );

        let mut energy_rates: IndexMap<PeriodID, Vec<TierRate>> = IndexMap::new();
        for cell in self.energy_rates {
            ensure!(
                cell.rate.is_finite() && cell.rate >= 0.0,
                "Energy rate for period {} must be a finite, non-negative number",
                cell.period
            );
            energy_rates
                .entry(cell.period.into())
                .or_default()
                .push(TierRate {
                    rate: MoneyPerEnergy(cell.rate),
                    limit: cell.limit.map(Energy),
                });
        }

        let mut demand_rates = IndexMap::new();
        for cell in self.demand_rates {
            ensure!(
                cell.rate.is_finite() && cell.rate >= 0.0,
                "Demand rate for period {} must be a finite, non-negative number",
                cell.period
            );
            ensure!(
                demand_rates
                    .insert(PeriodID::from(cell.period.as_str()), MoneyPerPower(cell.rate))
                    .is_none(),
                "Duplicate demand rate for period {}",
                cell.period
            );
        }

        let schedule = match (self.calendar_rules.is_empty(), self.cost_derived) {
            (false, None) => {
                let rules = self
                    .calendar_rules
                    .into_iter()
                    .map(CalendarRuleRaw::into_rule)
                    .collect::<Result<_>>()?;
                PeriodScheduleRule::Calendar(rules)
            }
            (true, Some(cost_derived)) => PeriodScheduleRule::CostDerived {
                peak_share: cost_derived.peak_share,
                shoulder_share: cost_derived.shoulder_share,
            },
            (true, None) => anyhow::bail!(
                "A tariff needs either calendar_rule entries or a cost_derived section"
            ),
            (false, Some(_)) => anyhow::bail!(
                "A tariff cannot have both calendar_rule entries and a cost_derived section"
            ),
        };

        Ok(Tariff {
            id: self.id.into(),
            description: self.description,
            fixed_charge: Money(self.fixed_charge),
            energy_rates,
            demand_rates,
            schedule,
            tier_policy: self.tier_policy,
            calibrate: self.calibrate,
            missing_rates_are_zero: self.missing_rates_are_zero,
        })
    }
}

impl CalendarRuleRaw {
    fn into_rule(self) -> Result<CalendarRule> {
        ensure!(
            !self.months.is_empty() && self.months.iter().all(|m| (1..=12).contains(m)),
            "Calendar rule months must be between 1 and 12"
        );
        ensure!(
            !self.day_types.is_empty(),
            "Calendar rule needs at least one day type"
        );
        ensure!(
            self.start_hour <= self.end_hour && self.end_hour <= 23,
            "Calendar rule hours must satisfy start_hour <= end_hour <= 23"
        );
        Ok(CalendarRule {
            months: self.months,
            day_types: self.day_types,
            start_hour: self.start_hour,
            end_hour: self.end_hour,
            period: self.period.into(),
        })
    }
}

/// Read tariff definitions from the model directory.
pub fn read_tariffs(model_dir: &Path) -> Result<TariffMap> {
    let file_path = model_dir.join(TARIFFS_FILE_NAME);
    let file: TariffsFile = read_toml(&file_path)?;
    ensure!(
        !file.tariffs.is_empty(),
        "{}: at least one tariff must be defined",
        file_path.display()
    );

    let mut tariffs = TariffMap::new();
    for raw in file.tariffs {
        let id = raw.id.clone();
        let tariff = raw
            .into_tariff()
            .with_context(|| format!("Invalid definition for tariff {id}"))
            .with_context(|| input_err_msg(&file_path))?;
        ensure!(
            tariffs.insert(tariff.id.clone(), Rc::new(tariff)).is_none(),
            "Duplicate tariff ID {id}"
        );
    }
    Ok(tariffs)
}
