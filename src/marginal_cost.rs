//! Marginal cost-of-service data and per-customer economic cost.
use crate::timeline::Timeline;
use crate::units::Money;
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use std::rc::Rc;
use strum::{Display, EnumIter, IntoEnumIterator};

/// The components of marginal cost supplied by the marginal-cost provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CostComponent {
    /// Marginal energy cost
    #[strum(to_string = "energy")]
    Energy,
    /// Marginal generation-capacity cost
    #[strum(to_string = "generation_capacity")]
    GenerationCapacity,
    /// Marginal distribution-capacity cost
    #[strum(to_string = "distribution_capacity")]
    DistributionCapacity,
    /// Marginal transmission-capacity cost
    #[strum(to_string = "transmission_capacity")]
    TransmissionCapacity,
}

/// Hourly marginal cost per component, in $/kWh, aligned to the load timeline
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalCostSurface {
    /// The interval axis shared with the load data
    pub timeline: Rc<Timeline>,
    /// One series per cost component
    components: IndexMap<CostComponent, Vec<f64>>,
    /// The per-interval sum across components, precomputed for the hot loops
    total: Vec<f64>,
}

impl MarginalCostSurface {
    /// Build a cost surface, requiring every component at full timeline length.
    pub fn new(
        timeline: Rc<Timeline>,
        components: IndexMap<CostComponent, Vec<f64>>,
    ) -> Result<Self> {
        for component in CostComponent::iter() {
            let series = components
                .get(&component)
                .ok_or_else(|| anyhow::anyhow!("Missing marginal-cost component {component}"))?;
            ensure!(
                series.len() == timeline.len(),
                "Marginal-cost component {component} has {} intervals but the timeline \
                 has {}",
                series.len(),
                timeline.len()
            );
        }

        let mut total = vec![0.0; timeline.len()];
        for series in components.values() {
            for (acc, value) in total.iter_mut().zip(series) {
                *acc += value;
            }
        }

        Ok(Self {
            timeline,
            components,
            total,
        })
    }

    /// The per-interval total marginal cost across all components, in $/kWh
    pub fn total(&self) -> &[f64] {
        &self.total
    }

    /// The series for one component, in $/kWh
    pub fn component(&self, component: CostComponent) -> &[f64] {
        &self.components[&component]
    }

    /// The economic (marginal) cost of serving one consumption series: the sum over all
    /// intervals of consumption times total marginal cost.
    pub fn economic_cost(&self, load: &[f64]) -> Money {
        debug_assert_eq!(load.len(), self.total.len());
        Money(
            load.iter()
                .zip(&self.total)
                .map(|(quantity, rate)| quantity * rate)
                .sum(),
        )
    }
}
