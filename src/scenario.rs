//! The scenario pipeline: schedule resolution, aggregation, calibration, billing and
//! the bill alignment test, run strictly in that order.
//!
//! A scenario is a side-effect-free computation over its own inputs; nothing here
//! touches disk or shares mutable state, so independent scenarios can run side by side.
use crate::aggregate::{AggregatedLoad, aggregate_loads};
use crate::alignment::{
    AlignmentInputs, BillAlignmentRecord, CrossSubsidyMetrics, bill_alignment,
};
use crate::billing::{BillSet, calculate_bills};
use crate::calibration::{CalibrationOptions, CalibrationOutcome, calibrate_rates};
use crate::diagnostics::RunWarnings;
use crate::model::Model;
use crate::schedule::{ResolvedSchedule, resolve_schedule};
use crate::tariff::TariffID;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use log::{info, warn};

/// Everything one scenario run produces
pub struct ScenarioResults {
    /// The resolved period schedule per tariff
    pub schedules: IndexMap<TariffID, ResolvedSchedule>,
    /// The aggregated load, reused across calibration iterations
    pub aggregated: AggregatedLoad,
    /// The calibration outcome, including the finalized tariffs
    pub calibration: CalibrationOutcome,
    /// Final bills at the calibrated rates
    pub bills: BillSet,
    /// Per-customer bill alignment records
    pub alignment: Vec<BillAlignmentRecord>,
    /// Population-level cross-subsidy and efficiency metrics
    pub metrics: CrossSubsidyMetrics,
    /// Structured warnings raised along the way
    pub warnings: RunWarnings,
}

/// Run one scenario over a loaded model.
pub fn run(model: &Model) -> Result<ScenarioResults> {
    let mut warnings = RunWarnings {
        data_quality: model.data_quality.clone(),
        non_convergence: None,
    };
    if !warnings.data_quality.is_empty() {
        ensure!(
            !model.parameters.fail_on_data_quality,
            "Aborting on {} data-quality finding(s); first: {}",
            warnings.data_quality.len(),
            warnings.data_quality[0]
        );
        for issue in &warnings.data_quality {
            warn!("Data quality: {issue}");
        }
    }

    // Stage 1: resolve each tariff's period schedule and validate its rate matrices
    // against the periods the schedule can actually produce
    let mut schedules = IndexMap::new();
    for (tariff_id, tariff) in &model.tariffs {
        let schedule = resolve_schedule(
            tariff_id,
            &tariff.schedule,
            &model.loads.timeline,
            Some(&model.costs),
        )?;
        tariff
            .validate(&schedule.periods)
            .with_context(|| format!("Invalid rate matrices for tariff {tariff_id}"))?;
        schedules.insert(tariff_id.clone(), schedule);
    }
    info!("Resolved period schedules for {} tariff(s)", schedules.len());

    // Stage 2: aggregate loads. Rates play no part here, so the result is shared by
    // every calibration pass.
    let aggregated = aggregate_loads(
        &model.customers,
        &model.loads,
        &model.tariffs,
        &schedules,
        model.parameters.consumption_basis,
    )?;
    info!(
        "Aggregated {} customer(s) into {} energy row(s)",
        model.customers.len(),
        aggregated.energy.len()
    );

    // Stages 3-4: calibrate rates, then bill at the finalized rates
    let options = CalibrationOptions {
        tolerance: model.parameters.calibration_tolerance,
        max_iterations: model.parameters.max_calibration_iterations,
    };
    let calibration = calibrate_rates(
        model.parameters.revenue_requirement,
        &aggregated,
        &model.customers,
        &model.tariffs,
        model.parameters.residual_allocation,
        &options,
    )?;
    if !calibration.report.converged {
        warn!(
            "Calibration did not converge within {} iteration(s); proceeding with the \
             best available rates (relative revenue gap {:.2e})",
            calibration.report.iterations, calibration.report.achieved_tolerance
        );
        warnings.non_convergence = Some(calibration.report);
    }
    let bills = calculate_bills(&aggregated, &calibration.assignment)?;

    // Stage 5: the bill alignment test. Revenue neutrality is only enforceable when
    // calibration actually pinned billed revenue to the requirement.
    let calibrated = model.tariffs.values().any(|tariff| tariff.calibrate);
    let (alignment, metrics) = bill_alignment(&AlignmentInputs {
        bills: &bills,
        customers: &model.customers,
        loads: &model.loads,
        costs: &model.costs,
        assignment: &calibration.assignment,
        schedules: &schedules,
        revenue_requirement: model.parameters.revenue_requirement,
        policy: model.parameters.residual_allocation,
        elasticity: model.parameters.elasticity,
        basis: model.parameters.consumption_basis,
        enforce_neutrality: calibrated && calibration.report.converged,
    })?;
    info!(
        "Bill alignment complete: average cross-subsidy {:.2} across {} customer(s)",
        metrics.average_cross_subsidy.value(),
        alignment.len()
    );

    Ok(ScenarioResults {
        schedules,
        aggregated,
        calibration,
        bills,
        alignment,
        metrics,
        warnings,
    })
}
