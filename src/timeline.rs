//! The shared interval axis for one reference year.
//!
//! Every load and marginal-cost series in a run is aligned to a single [`Timeline`]: one
//! entry per sub-daily interval, with the calendar attributes (month, hour of day, weekday
//! or weekend) precomputed once so the aggregation stages can classify intervals without
//! re-deriving them per customer.
use crate::diagnostics::{DataQualityIssue, DataQualityKind};
use crate::units::Hours;
use anyhow::{Result, bail, ensure};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Weekday};
use itertools::Itertools;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::collections::HashMap;

/// Whether an interval falls on a weekday or at the weekend
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum DayType {
    /// Monday to Friday
    #[string = "weekday"]
    Weekday,
    /// Saturday and Sunday
    #[string = "weekend"]
    Weekend,
}

impl DayType {
    /// Classify a chrono weekday
    fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }
}

/// The interval axis shared by all series in a run
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    /// Interval start times, with an explicit UTC offset
    pub timestamps: Vec<DateTime<FixedOffset>>,
    /// Month of year (1-12) per interval
    pub months: Vec<u32>,
    /// Hour of day (0-23) per interval
    pub hours: Vec<u32>,
    /// Weekday/weekend classification per interval
    pub day_types: Vec<DayType>,
    /// The uniform interval length
    pub interval_length: Hours,
}

impl Timeline {
    /// Build a timeline from interval start times.
    ///
    /// The timestamps must be uniformly spaced. Duplicate timestamps, a non-monotonic
    /// index and partial-year coverage are reported as data-quality issues rather than
    /// errors; whether they abort the run is the caller's decision.
    pub fn new(
        timestamps: Vec<DateTime<FixedOffset>>,
    ) -> Result<(Self, Vec<DataQualityIssue>)> {
        ensure!(
            timestamps.len() >= 2,
            "A timeline requires at least two intervals to establish the interval length"
        );

        // The nominal interval length is the most common positive gap; ties go to the
        // shortest so a finer series with occasional holes keeps its true resolution.
        let mut gap_counts: HashMap<chrono::TimeDelta, usize> = HashMap::new();
        for (a, b) in timestamps.iter().tuple_windows() {
            let gap = *b - *a;
            if gap > chrono::TimeDelta::zero() {
                *gap_counts.entry(gap).or_insert(0) += 1;
            }
        }
        let Some(interval) = gap_counts
            .iter()
            .max_by_key(|(gap, count)| (**count, std::cmp::Reverse(**gap)))
            .map(|(gap, _)| *gap)
        else {
            bail!("Interval series contains no forward time steps");
        };

        let mut issues = Vec::new();
        for (a, b) in timestamps.iter().tuple_windows() {
            let gap = *b - *a;
            if gap.is_zero() {
                issues.push(DataQualityIssue {
                    kind: DataQualityKind::DuplicateTimestamp,
                    message: format!("Duplicate timestamp {a} in interval series"),
                });
            } else if gap < chrono::TimeDelta::zero() {
                issues.push(DataQualityIssue {
                    kind: DataQualityKind::NonMonotonicTime,
                    message: format!("Time index decreases from {a} to {b}"),
                });
            } else if gap != interval {
                issues.push(DataQualityIssue {
                    kind: DataQualityKind::IrregularSpacing,
                    message: format!(
                        "Gap of {gap} between {a} and {b} differs from the nominal \
                         interval of {interval}"
                    ),
                });
            }
        }
        let interval_length = Hours(interval.num_seconds() as f64 / 3600.0);

        // Coverage check against the reference year of the first timestamp
        let year = timestamps[0].year();
        let days_in_year = NaiveDate::from_ymd_opt(year, 12, 31)
            .expect("valid date")
            .ordinal();
        let covered = interval_length.value() * timestamps.len() as f64;
        let expected = f64::from(days_in_year) * 24.0;
        if covered + 1e-9 < expected {
            issues.push(DataQualityIssue {
                kind: DataQualityKind::PartialYearCoverage,
                message: format!(
                    "Interval series covers {covered:.1} of {expected:.1} hours in {year}"
                ),
            });
        }

        let months = timestamps.iter().map(|t| t.month()).collect();
        let hours = timestamps.iter().map(|t| t.hour()).collect();
        let day_types = timestamps
            .iter()
            .map(|t| DayType::from_weekday(t.weekday()))
            .collect();

        Ok((
            Self {
                timestamps,
                months,
                hours,
                day_types,
                interval_length,
            },
            issues,
        ))
    }

    /// The number of intervals
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the timeline is empty
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The months (1-12) with at least one interval, in calendar order
    pub fn months_present(&self) -> Vec<u32> {
        (1..=12)
            .filter(|month| self.months.contains(month))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn hourly_timestamps(start: &str, count: usize) -> Vec<DateTime<FixedOffset>> {
        let start: DateTime<FixedOffset> = start.parse().unwrap();
        (0..count)
            .map(|i| start + TimeDelta::hours(i as i64))
            .collect()
    }

    #[test]
    fn test_timeline_attributes() {
        // 2023-01-01 is a Sunday
        let (timeline, issues) =
            Timeline::new(hourly_timestamps("2023-01-01T00:00:00-08:00", 48)).unwrap();
        assert_eq!(timeline.interval_length, Hours(1.0));
        assert_eq!(timeline.months, vec![1; 48]);
        assert_eq!(timeline.hours[25], 1);
        assert_eq!(timeline.day_types[0], DayType::Weekend);
        assert_eq!(timeline.day_types[24], DayType::Weekday);
        assert_eq!(timeline.months_present(), vec![1]);

        // Two days out of a year is partial coverage
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DataQualityKind::PartialYearCoverage);
    }

    #[test]
    fn test_timeline_full_year() {
        let (_, issues) =
            Timeline::new(hourly_timestamps("2023-01-01T00:00:00-08:00", 8760)).unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_timeline_duplicate_timestamp() {
        let mut timestamps = hourly_timestamps("2023-01-01T00:00:00-08:00", 8760);
        timestamps[10] = timestamps[9];
        let (_, issues) = Timeline::new(timestamps).unwrap();
        assert!(
            issues
                .iter()
                .any(|issue| issue.kind == DataQualityKind::DuplicateTimestamp)
        );
    }

    #[test]
    fn test_timeline_non_monotonic() {
        let mut timestamps = hourly_timestamps("2023-01-01T00:00:00-08:00", 8760);
        timestamps.swap(10, 11);
        let (_, issues) = Timeline::new(timestamps).unwrap();
        assert!(
            issues
                .iter()
                .any(|issue| issue.kind == DataQualityKind::NonMonotonicTime)
        );
    }

    #[test]
    fn test_timeline_irregular_spacing() {
        let mut timestamps = hourly_timestamps("2023-01-01T00:00:00-08:00", 8760);
        timestamps[100] += TimeDelta::minutes(30);
        let (timeline, issues) = Timeline::new(timestamps).unwrap();
        assert_eq!(timeline.interval_length, Hours(1.0));
        assert!(
            issues
                .iter()
                .any(|issue| issue.kind == DataQualityKind::IrregularSpacing)
        );
    }
}
