//! The revenue calibration engine.
//!
//! Marginal-cost-based tariffs under- or over-recover relative to the revenue
//! requirement because marginal costs exclude the residual portion of utility costs. The
//! engine scales every calibrated tariff's volumetric rates by a single factor `K` so
//! that total billed revenue equals the revenue requirement.
//!
//! Because aggregation does not depend on rate values, billed revenue is linear in `K`
//! for purely volumetric structures and `K` has a closed form. Tiered structures take
//! the iterative fixed-point path instead, which re-bills at each estimate and stops on
//! tolerance or an iteration budget.
use crate::aggregate::AggregatedLoad;
use crate::billing::{TariffAssignment, assign_tariffs, calculate_bills};
use crate::customer::{Customer, CustomerMap};
use crate::diagnostics::ConvergenceReport;
use crate::residual::ResidualAllocation;
use crate::tariff::{TariffMap, TariffStructure};
use crate::units::{Dimensionless, Money};
use anyhow::{Result, ensure};
use log::{debug, info};
use std::rc::Rc;

/// Tolerance and budget for the iterative fixed point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOptions {
    /// Relative revenue tolerance at which iteration stops
    pub tolerance: f64,
    /// Maximum number of re-billing passes before giving up
    pub max_iterations: u32,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 50,
        }
    }
}

/// The result of one calibration run
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// The equi-proportional adjustment applied to calibrated volumetric rates
    pub scale: Dimensionless,
    /// The finalized tariffs, with calibrated rates scaled
    pub tariffs: TariffMap,
    /// The effective tariff per customer. Customers exempted by the residual policy
    /// stay on the unscaled rates.
    pub assignment: TariffAssignment,
    /// How the fixed point terminated
    pub report: ConvergenceReport,
}

/// Solve for the rate adjustment that makes billed revenue match the requirement.
///
/// Customers the residual policy exempts do not carry scaled rates; `K` is computed over
/// the remaining customers so the population total still lands on the requirement.
pub fn calibrate_rates(
    revenue_requirement: Money,
    agg: &AggregatedLoad,
    customers: &CustomerMap,
    tariffs: &TariffMap,
    policy: ResidualAllocation,
    options: &CalibrationOptions,
) -> Result<CalibrationOutcome> {
    let base = assign_tariffs(customers, tariffs)?;

    if !tariffs.values().any(|tariff| tariff.calibrate) {
        info!("No tariff is flagged for calibration; rates are used as given");
        return Ok(CalibrationOutcome {
            scale: Dimensionless(1.0),
            tariffs: tariffs.clone(),
            assignment: base,
            report: ConvergenceReport::closed_form(),
        });
    }

    let scales = |customer: &Customer| {
        tariffs[&customer.tariff_id].calibrate && !policy.exempts(customer)
    };

    // One pass at the unscaled rates splits revenue into the part that scales with K
    // and the part that does not (fixed charges, uncalibrated tariffs, exempt customers)
    let unscaled_bills = calculate_bills(agg, &base)?;
    let fixed_revenue = unscaled_bills.weighted_fixed_revenue(customers)
        + unscaled_bills.weighted_volumetric_revenue(customers, |c| !scales(c));
    let scaling_revenue = unscaled_bills.weighted_volumetric_revenue(customers, scales);

    ensure!(
        scaling_revenue.value() > 0.0,
        "Cannot calibrate: customers on calibrated tariffs have no volumetric revenue \
         at the unscaled rates"
    );
    let net_requirement = revenue_requirement - fixed_revenue;
    ensure!(
        net_requirement.value() > 0.0,
        "Cannot calibrate: fixed and non-calibrated revenue of {} already exceeds the \
         revenue requirement of {}",
        fixed_revenue.value(),
        revenue_requirement.value()
    );

    let mut scale = net_requirement / scaling_revenue;
    debug!(
        "Calibration closed form: ({} - {}) / {} = {}",
        revenue_requirement.value(),
        fixed_revenue.value(),
        scaling_revenue.value(),
        scale.0
    );

    // Tiered block structures break the proportionality assumption behind the closed
    // form, so re-bill at each estimate until the revenue gap closes
    let needs_iteration = tariffs
        .values()
        .any(|tariff| tariff.calibrate && tariff.structure() == TariffStructure::Tiered);
    let report = if needs_iteration {
        let mut report = ConvergenceReport {
            converged: false,
            iterations: 0,
            achieved_tolerance: f64::INFINITY,
        };
        while report.iterations < options.max_iterations {
            report.iterations += 1;
            let (tariffs, assignment) = apply_scale(tariffs, customers, &base, scale, scales);
            let revenue = calculate_bills(agg, &assignment)?.weighted_revenue(customers);
            report.achieved_tolerance =
                ((revenue - revenue_requirement) / revenue_requirement).0.abs();
            debug!(
                "Calibration iteration {}: K = {}, revenue = {}",
                report.iterations,
                scale.0,
                revenue.value()
            );
            if report.achieved_tolerance <= options.tolerance {
                report.converged = true;
                break;
            }
            scale = scale * (net_requirement / (revenue - fixed_revenue));
        }
        report
    } else {
        ConvergenceReport::closed_form()
    };
    info!("Calibrated rate adjustment K = {}", scale.0);

    let (tariffs, assignment) = apply_scale(tariffs, customers, &base, scale, scales);
    Ok(CalibrationOutcome {
        scale,
        tariffs,
        assignment,
        report,
    })
}

/// Scale the calibrated tariffs by `factor` and rebuild the per-customer assignment,
/// leaving exempt customers on the unscaled rates.
fn apply_scale(
    tariffs: &TariffMap,
    customers: &CustomerMap,
    base: &TariffAssignment,
    factor: Dimensionless,
    scales: impl Fn(&Customer) -> bool,
) -> (TariffMap, TariffAssignment) {
    let scaled: TariffMap = tariffs
        .iter()
        .map(|(id, tariff)| {
            let tariff = if tariff.calibrate {
                Rc::new(tariff.with_scaled_rates(factor))
            } else {
                Rc::clone(tariff)
            };
            (id.clone(), tariff)
        })
        .collect();

    let assignment = customers
        .values()
        .map(|customer| {
            let tariff = if scales(customer) {
                Rc::clone(&scaled[&customer.tariff_id])
            } else {
                Rc::clone(&base[&customer.id])
            };
            (customer.id.clone(), tariff)
        })
        .collect();

    (scaled, assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::EnergyRow;
    use crate::customer::CustomerID;
    use crate::fixture::{flat_tariff, tiered_tariff};
    use crate::tariff::Tariff;
    use crate::units::{Energy, MoneyPerEnergy};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::rc::Rc;

    fn one_customer(id: &str, tariff: &Tariff, low_income: bool) -> Customer {
        Customer {
            id: id.into(),
            weight: Dimensionless(1.0),
            tariff_id: tariff.id.clone(),
            gas_tariff_id: None,
            low_income,
        }
    }

    fn monthly_rows(customer: &str, period: &str, kwh_per_month: f64) -> Vec<EnergyRow> {
        (1..=12)
            .map(|month| EnergyRow {
                customer_id: customer.into(),
                month,
                period: period.into(),
                tier: 0,
                consumption: Energy(kwh_per_month),
            })
            .collect()
    }

    #[rstest]
    fn test_closed_form_worked_example() {
        // Unscaled marginal-cost revenue of $600,000 and customer-charge revenue of
        // $50,000 against a $1,000,000 requirement gives K = 950,000 / 600,000
        let tariff = Tariff {
            fixed_charge: Money(50_000.0 / 12.0),
            energy_rates: [(
                "all".into(),
                vec![crate::tariff::TierRate {
                    rate: MoneyPerEnergy(0.10),
                    limit: None,
                }],
            )]
            .into_iter()
            .collect(),
            ..flat_tariff()
        };
        let customers: CustomerMap = [one_customer("c1", &tariff, false)]
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let tariffs: TariffMap = [(tariff.id.clone(), Rc::new(tariff))].into_iter().collect();
        let agg = AggregatedLoad {
            energy: monthly_rows("c1", "all", 500_000.0),
            demand: Vec::new(),
        };

        let outcome = calibrate_rates(
            Money(1_000_000.0),
            &agg,
            &customers,
            &tariffs,
            ResidualAllocation::Volumetric,
            &CalibrationOptions::default(),
        )
        .unwrap();

        assert_approx_eq!(
            Dimensionless,
            outcome.scale,
            Dimensionless(950_000.0 / 600_000.0),
            epsilon = 1e-9
        );
        assert!(outcome.report.converged);

        let billed = calculate_bills(&agg, &outcome.assignment)
            .unwrap()
            .weighted_revenue(&customers);
        assert_approx_eq!(Money, billed, Money(1_000_000.0), epsilon = 1e-3);
    }

    #[rstest]
    fn test_iterative_path_for_tiered_structure(tiered_tariff: Tariff) {
        let tariff = Tariff {
            calibrate: true,
            ..tiered_tariff
        };
        let customers: CustomerMap = [one_customer("c1", &tariff, false)]
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let tariffs: TariffMap = [(tariff.id.clone(), Rc::new(tariff))].into_iter().collect();
        // 100 kWh/month straddles the 30 kWh breakpoint: 30 in tier 1, 70 in tier 2
        let mut energy = monthly_rows("c1", "all", 30.0);
        energy.extend(monthly_rows("c1", "all", 70.0).into_iter().map(|mut row| {
            row.tier = 1;
            row
        }));
        let agg = AggregatedLoad {
            energy,
            demand: Vec::new(),
        };

        let target = Money(500.0);
        let outcome = calibrate_rates(
            target,
            &agg,
            &customers,
            &tariffs,
            ResidualAllocation::Volumetric,
            &CalibrationOptions::default(),
        )
        .unwrap();

        assert!(outcome.report.converged);
        assert!(outcome.report.iterations >= 1);
        let billed = calculate_bills(&agg, &outcome.assignment)
            .unwrap()
            .weighted_revenue(&customers);
        assert_approx_eq!(Money, billed, target, epsilon = 1e-3);
    }

    #[rstest]
    fn test_exempt_subgroup_stays_on_unscaled_rates(flat_tariff: Tariff) {
        let customers: CustomerMap = [
            one_customer("rich", &flat_tariff, false),
            one_customer("poor", &flat_tariff, true),
        ]
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();
        let tariffs: TariffMap = [(flat_tariff.id.clone(), Rc::new(flat_tariff.clone()))]
            .into_iter()
            .collect();
        let mut energy = monthly_rows("rich", "all", 1000.0);
        energy.extend(monthly_rows("poor", "all", 400.0));
        let agg = AggregatedLoad {
            energy,
            demand: Vec::new(),
        };

        let target = Money(3000.0);
        let outcome = calibrate_rates(
            target,
            &agg,
            &customers,
            &tariffs,
            ResidualAllocation::VolumetricExcludingLowIncome,
            &CalibrationOptions::default(),
        )
        .unwrap();

        // The exempt customer keeps the unscaled rate
        let poor = &outcome.assignment[&CustomerID::new("poor")];
        assert_approx_eq!(
            MoneyPerEnergy,
            poor.energy_rate(&"all".into(), 0).unwrap(),
            flat_tariff.energy_rate(&"all".into(), 0).unwrap()
        );
        let rich = &outcome.assignment[&CustomerID::new("rich")];
        assert_approx_eq!(
            MoneyPerEnergy,
            rich.energy_rate(&"all".into(), 0).unwrap(),
            outcome.scale * flat_tariff.energy_rate(&"all".into(), 0).unwrap()
        );

        // The population total still lands on the requirement
        let billed = calculate_bills(&agg, &outcome.assignment)
            .unwrap()
            .weighted_revenue(&customers);
        assert_approx_eq!(Money, billed, target, epsilon = 1e-6);
    }

    #[rstest]
    fn test_no_calibrated_tariffs_is_identity(tiered_tariff: Tariff) {
        let customers: CustomerMap = [one_customer("c1", &tiered_tariff, false)]
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let tariffs: TariffMap = [(tiered_tariff.id.clone(), Rc::new(tiered_tariff))]
            .into_iter()
            .collect();
        let agg = AggregatedLoad::default();

        let outcome = calibrate_rates(
            Money(1000.0),
            &agg,
            &customers,
            &tariffs,
            ResidualAllocation::Flat,
            &CalibrationOptions::default(),
        )
        .unwrap();
        assert_approx_eq!(Dimensionless, outcome.scale, Dimensionless(1.0));
    }

    #[rstest]
    fn test_overshooting_fixed_revenue_rejected(flat_tariff: Tariff) {
        let customers: CustomerMap = [one_customer("c1", &flat_tariff, false)]
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let tariffs: TariffMap = [(flat_tariff.id.clone(), Rc::new(flat_tariff))]
            .into_iter()
            .collect();
        let agg = AggregatedLoad {
            energy: monthly_rows("c1", "all", 100.0),
            demand: Vec::new(),
        };

        // Fixed charges alone exceed a $10 requirement
        assert!(
            calibrate_rates(
                Money(10.0),
                &agg,
                &customers,
                &tariffs,
                ResidualAllocation::Flat,
                &CalibrationOptions::default(),
            )
            .is_err()
        );
    }
}
