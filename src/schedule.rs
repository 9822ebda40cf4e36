//! The period schedule resolver.
//!
//! Given a tariff's period-schedule rule, produce the resolved period for every interval
//! of the reference year. The resolver is a pure function of its inputs and must be
//! deterministic: cost-derived assignment breaks ties by original hour index so repeated
//! runs yield identical schedules.
use crate::marginal_cost::MarginalCostSurface;
use crate::tariff::{PeriodID, PeriodScheduleRule, TariffID};
use crate::timeline::{DayType, Timeline};
use anyhow::{Context, Result, bail, ensure};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;

/// A tariff's period schedule, resolved onto the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchedule {
    /// The periods the schedule can produce, in deterministic order
    pub periods: IndexSet<PeriodID>,
    /// Per interval, an index into `periods`
    pub period_indices: Vec<usize>,
}

impl ResolvedSchedule {
    /// The period resolved for the given interval
    pub fn period_of(&self, interval: usize) -> &PeriodID {
        &self.periods[self.period_indices[interval]]
    }
}

/// Resolve a tariff's period schedule onto the timeline.
///
/// Cost-derived schedules require a marginal-cost surface; an interval a calendar rule
/// set fails to classify is a fatal configuration error, never silently defaulted.
pub fn resolve_schedule(
    tariff_id: &TariffID,
    rule: &PeriodScheduleRule,
    timeline: &Timeline,
    costs: Option<&MarginalCostSurface>,
) -> Result<ResolvedSchedule> {
    match rule {
        PeriodScheduleRule::Calendar(rules) => resolve_calendar(tariff_id, rules, timeline),
        PeriodScheduleRule::CostDerived {
            peak_share,
            shoulder_share,
        } => {
            let costs = costs.with_context(|| {
                format!(
                    "Tariff {tariff_id} uses a cost-derived period schedule but no \
                     marginal-cost surface was supplied"
                )
            })?;
            resolve_cost_derived(tariff_id, *peak_share, *shoulder_share, timeline, costs)
        }
    }
}

/// Resolve directly-specified calendar rules. The first matching rule wins.
fn resolve_calendar(
    tariff_id: &TariffID,
    rules: &[crate::tariff::CalendarRule],
    timeline: &Timeline,
) -> Result<ResolvedSchedule> {
    ensure!(
        !rules.is_empty(),
        "Tariff {tariff_id} has a calendar schedule with no rules"
    );

    let mut periods = IndexSet::new();
    for rule in rules {
        periods.insert(rule.period.clone());
    }

    let mut period_indices = Vec::with_capacity(timeline.len());
    for interval in 0..timeline.len() {
        let month = timeline.months[interval];
        let day_type = timeline.day_types[interval];
        let hour = timeline.hours[interval];
        let period = rules
            .iter()
            .find(|rule| rule.matches(month, day_type, hour))
            .map(|rule| &rule.period)
            .with_context(|| {
                format!(
                    "Tariff {tariff_id}: period schedule fails to classify month \
                     {month}, {day_type} hour {hour}"
                )
            })?;
        period_indices.push(periods.get_index_of(period.0.as_ref()).expect("known period"));
    }

    Ok(ResolvedSchedule {
        periods,
        period_indices,
    })
}

/// Derive peak/shoulder/off-peak periods by ranking mean marginal cost across like-hour
/// groups (same month, same day type).
fn resolve_cost_derived(
    tariff_id: &TariffID,
    peak_share: f64,
    shoulder_share: f64,
    timeline: &Timeline,
    costs: &MarginalCostSurface,
) -> Result<ResolvedSchedule> {
    ensure!(
        (0.0..=1.0).contains(&peak_share)
            && (0.0..=1.0).contains(&shoulder_share)
            && peak_share + shoulder_share <= 1.0,
        "Tariff {tariff_id}: peak and shoulder shares must be proportions summing to at \
         most 1"
    );
    ensure!(
        peak_share > 0.0,
        "Tariff {tariff_id}: a cost-derived schedule needs a nonzero peak share"
    );

    // Mean total marginal cost per (month, day type, hour-of-day) slot
    let total = costs.total();
    let mut slot_sums: IndexMap<(u32, DayType), IndexMap<u32, (f64, usize)>> = IndexMap::new();
    for interval in 0..timeline.len() {
        let group = (timeline.months[interval], timeline.day_types[interval]);
        let (sum, count) = slot_sums
            .entry(group)
            .or_default()
            .entry(timeline.hours[interval])
            .or_insert((0.0, 0));
        *sum += total[interval];
        *count += 1;
    }

    let peak: PeriodID = "peak".into();
    let shoulder: PeriodID = "shoulder".into();
    let off_peak: PeriodID = "off-peak".into();

    // Rank each group's hour slots by mean cost, ties broken by hour index so the
    // assignment is reproducible.
    let mut slot_periods: HashMap<(u32, DayType, u32), &PeriodID> = HashMap::new();
    for (&(month, day_type), slots) in &slot_sums {
        let mut ranked: Vec<(u32, f64)> = slots
            .iter()
            .map(|(&hour, &(sum, count))| (hour, sum / count as f64))
            .collect();
        ranked.sort_by(|(hour_a, cost_a), (hour_b, cost_b)| {
            cost_b.total_cmp(cost_a).then(hour_a.cmp(hour_b))
        });

        let n_slots = ranked.len();
        let n_peak = ((peak_share * n_slots as f64).ceil() as usize).min(n_slots);
        let n_shoulder =
            ((shoulder_share * n_slots as f64).ceil() as usize).min(n_slots - n_peak);
        for (rank, (hour, _)) in ranked.into_iter().enumerate() {
            let period = if rank < n_peak {
                &peak
            } else if rank < n_peak + n_shoulder {
                &shoulder
            } else {
                &off_peak
            };
            slot_periods.insert((month, day_type, hour), period);
        }
    }

    // Fixed period order so downstream output is stable regardless of cost data
    let mut periods = IndexSet::new();
    periods.insert(peak.clone());
    if shoulder_share > 0.0 {
        periods.insert(shoulder.clone());
    }
    if peak_share + shoulder_share < 1.0 {
        periods.insert(off_peak.clone());
    }

    let mut period_indices = Vec::with_capacity(timeline.len());
    for interval in 0..timeline.len() {
        let key = (
            timeline.months[interval],
            timeline.day_types[interval],
            timeline.hours[interval],
        );
        let period = slot_periods[&key];
        let Some(index) = periods.get_index_of(period.0.as_ref()) else {
            // Rounding can assign a slot to a period the shares imply is empty
            bail!(
                "Tariff {tariff_id}: cost-derived schedule produced period {period} \
                 outside the configured shares"
            );
        };
        period_indices.push(index);
    }

    Ok(ResolvedSchedule {
        periods,
        period_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{cost_surface_evening_peak, timeline_two_days};
    use crate::tariff::CalendarRule;
    use std::rc::Rc;
    use strum::IntoEnumIterator;

    fn all_day_rule(period: &str, start_hour: u32, end_hour: u32) -> CalendarRule {
        CalendarRule {
            months: (1..=12).collect(),
            day_types: vec![DayType::Weekday, DayType::Weekend],
            start_hour,
            end_hour,
            period: period.into(),
        }
    }

    #[rstest::rstest]
    fn test_calendar_resolution(timeline_two_days: Rc<Timeline>) {
        let rules = vec![all_day_rule("peak", 17, 20), all_day_rule("off-peak", 0, 23)];
        let schedule = resolve_schedule(
            &"t1".into(),
            &PeriodScheduleRule::Calendar(rules),
            &timeline_two_days,
            None,
        )
        .unwrap();

        assert_eq!(schedule.periods.len(), 2);
        assert_eq!(schedule.period_of(17), &PeriodID::new("peak"));
        assert_eq!(schedule.period_of(12), &PeriodID::new("off-peak"));
        // First matching rule wins within the overlap
        assert_eq!(schedule.period_of(20), &PeriodID::new("peak"));
    }

    #[rstest::rstest]
    fn test_calendar_unresolved_hour_is_fatal(timeline_two_days: Rc<Timeline>) {
        // No rule covers hours 21-23
        let rules = vec![all_day_rule("day", 0, 20)];
        let result = resolve_schedule(
            &"t1".into(),
            &PeriodScheduleRule::Calendar(rules),
            &timeline_two_days,
            None,
        );
        assert!(result.is_err());
    }

    #[rstest::rstest]
    fn test_cost_derived_assignment(
        timeline_two_days: Rc<Timeline>,
        cost_surface_evening_peak: MarginalCostSurface,
    ) {
        let rule = PeriodScheduleRule::CostDerived {
            peak_share: 4.0 / 24.0,
            shoulder_share: 4.0 / 24.0,
        };
        let schedule = resolve_schedule(
            &"t1".into(),
            &rule,
            &timeline_two_days,
            Some(&cost_surface_evening_peak),
        )
        .unwrap();

        // The fixture's costliest hours are 17-20, next costliest 13-16
        for hour in 17..=20 {
            assert_eq!(schedule.period_of(hour), &PeriodID::new("peak"));
        }
        for hour in 13..=16 {
            assert_eq!(schedule.period_of(hour), &PeriodID::new("shoulder"));
        }
        assert_eq!(schedule.period_of(3), &PeriodID::new("off-peak"));
    }

    #[rstest::rstest]
    fn test_cost_derived_tie_break_by_hour(timeline_two_days: Rc<Timeline>) {
        // All slots cost the same, so ties are broken by hour index: the earliest
        // hours become peak
        let n = timeline_two_days.len();
        let components = crate::marginal_cost::CostComponent::iter()
            .map(|component| (component, vec![0.01; n]))
            .collect();
        let costs = MarginalCostSurface::new(Rc::clone(&timeline_two_days), components).unwrap();

        let rule = PeriodScheduleRule::CostDerived {
            peak_share: 2.0 / 24.0,
            shoulder_share: 0.0,
        };
        let schedule =
            resolve_schedule(&"t1".into(), &rule, &timeline_two_days, Some(&costs)).unwrap();
        assert_eq!(schedule.period_of(0), &PeriodID::new("peak"));
        assert_eq!(schedule.period_of(1), &PeriodID::new("peak"));
        assert_eq!(schedule.period_of(2), &PeriodID::new("off-peak"));
        assert_eq!(schedule.periods.len(), 2);
    }

    #[rstest::rstest]
    fn test_cost_derived_is_deterministic(
        timeline_two_days: Rc<Timeline>,
        cost_surface_evening_peak: MarginalCostSurface,
    ) {
        let rule = PeriodScheduleRule::CostDerived {
            peak_share: 0.25,
            shoulder_share: 0.25,
        };
        let first = resolve_schedule(
            &"t1".into(),
            &rule,
            &timeline_two_days,
            Some(&cost_surface_evening_peak),
        )
        .unwrap();
        let second = resolve_schedule(
            &"t1".into(),
            &rule,
            &timeline_two_days,
            Some(&cost_surface_evening_peak),
        )
        .unwrap();
        assert_eq!(first, second);
    }
}
