//! Traversal schedules
//!
//! A [`Schedule`] says when a connector may traverse (hour-of-day intervals),
//! how fast (target documents per minute), and what happens once the
//! repository has been fully traversed (the retry delay).
//!
//! Schedules persist in a compact string form:
//!
//! ```text
//! [#]name:load:retry_delay_ms:start-end[:start-end...]
//! ```
//!
//! A leading `#` marks the schedule disabled. The older three-field form
//! `name:load:start-end...` (no retry delay) is still accepted on input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::{ScheduleError, ScheduleResult};

/// Retry delay sentinel: stop once the repository end is reached
pub const POLLING_DISABLED: i64 = -1;

/// Default target load in documents per minute
pub const DEFAULT_LOAD: u32 = 200;

/// Default delay before polling a drained repository again (5 minutes)
pub const DEFAULT_RETRY_DELAY_MILLIS: i64 = 300_000;

// ============================================================================
// Schedule Interval
// ============================================================================

/// A half-open hour range `[start, end)` within a day
///
/// An end of 0 means "through midnight". An end lower than the start wraps
/// past midnight, so `22-4` covers 22:00 through 03:59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleInterval {
    start: u8,
    end: u8,
}

impl ScheduleInterval {
    /// Create a new interval, validating both hours
    pub fn new(start: u32, end: u32) -> ScheduleResult<Self> {
        if start > 23 {
            return Err(ScheduleError::invalid_hour(start));
        }
        if end > 24 {
            return Err(ScheduleError::invalid_hour(end));
        }
        Ok(Self {
            start: start as u8,
            end: end as u8,
        })
    }

    /// The whole day (`0-0`)
    pub fn all_day() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn start(&self) -> u32 {
        self.start as u32
    }

    pub fn end(&self) -> u32 {
        self.end as u32
    }

    /// Check whether `hour` (0-23) falls inside this interval
    pub fn contains(&self, hour: u32) -> bool {
        let start = self.start as u32;
        let end = if self.end == 0 { 24 } else { self.end as u32 };

        if end < start {
            hour >= start || hour < end
        } else {
            start <= hour && hour < end
        }
    }

    /// Whether the interval wraps past midnight
    pub fn spans_midnight(&self) -> bool {
        self.end != 0 && self.end < self.start
    }

    /// Hours of the day covered by this interval
    pub fn hours(&self) -> Vec<u32> {
        (0..24).filter(|h| self.contains(*h)).collect()
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for ScheduleInterval {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidInterval {
            interval: s.to_string(),
        };

        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse::<u32>().map_err(|_| invalid())?;
        let end = end.trim().parse::<u32>().map_err(|_| invalid())?;

        Self::new(start, end)
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// When and how fast a connector instance may traverse
///
/// Schedules are immutable values; the `with_*` methods return modified
/// copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    connector_name: String,
    disabled: bool,
    load: u32,
    retry_delay_millis: i64,
    intervals: Vec<ScheduleInterval>,
}

impl Schedule {
    /// Create a new enabled schedule
    ///
    /// Fails if any two intervals cover the same hour.
    pub fn new(
        connector_name: impl Into<String>,
        load: u32,
        retry_delay_millis: i64,
        intervals: Vec<ScheduleInterval>,
    ) -> ScheduleResult<Self> {
        let connector_name = connector_name.into();
        if connector_name.contains(':') {
            return Err(ScheduleError::malformed(
                connector_name,
                "connector name may not contain ':'",
            ));
        }

        check_disjoint(&intervals)?;

        Ok(Self {
            connector_name,
            disabled: false,
            load,
            retry_delay_millis,
            intervals,
        })
    }

    /// The schedule a newly created connector receives: all day, default load
    pub fn default_for(connector_name: impl Into<String>) -> Self {
        Self {
            connector_name: connector_name.into(),
            disabled: false,
            load: DEFAULT_LOAD,
            retry_delay_millis: DEFAULT_RETRY_DELAY_MILLIS,
            intervals: vec![ScheduleInterval::all_day()],
        }
    }

    /// Parse the persisted string form
    pub fn parse(input: &str) -> ScheduleResult<Self> {
        let trimmed = input.trim();
        let (disabled, body) = match trimmed.strip_prefix('#') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let fields: Vec<&str> = body.split(':').collect();
        if fields.len() < 2 || fields[0].is_empty() {
            return Err(ScheduleError::malformed(
                input,
                "expected name:load:retry_delay:intervals",
            ));
        }

        let name = fields[0];
        let load = fields[1]
            .trim()
            .parse::<u32>()
            .map_err(|_| ScheduleError::invalid_number("load", fields[1]))?;

        // Legacy form has no retry delay; its third field is already an interval.
        let (retry_delay_millis, interval_fields) = match fields.get(2) {
            Some(field) if !field.contains('-') || field.trim().starts_with('-') => {
                let delay = if field.trim().is_empty() {
                    DEFAULT_RETRY_DELAY_MILLIS
                } else {
                    field
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| ScheduleError::invalid_number("retry_delay", *field))?
                };
                (delay, &fields[3.min(fields.len())..])
            }
            _ => (DEFAULT_RETRY_DELAY_MILLIS, &fields[2..]),
        };

        let intervals = interval_fields
            .iter()
            .filter(|f| !f.trim().is_empty())
            .map(|f| f.parse::<ScheduleInterval>())
            .collect::<ScheduleResult<Vec<_>>>()?;

        let schedule = Self::new(name, load, retry_delay_millis, intervals)?;
        Ok(schedule.with_disabled(disabled))
    }

    pub fn connector_name(&self) -> &str {
        &self.connector_name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Target load in documents per minute
    pub fn load(&self) -> u32 {
        self.load
    }

    pub fn retry_delay_millis(&self) -> i64 {
        self.retry_delay_millis
    }

    pub fn intervals(&self) -> &[ScheduleInterval] {
        &self.intervals
    }

    /// Positive retry delay as a `Duration`, if polling is configured
    pub fn retry_delay(&self) -> Option<Duration> {
        (self.retry_delay_millis > 0).then(|| Duration::from_millis(self.retry_delay_millis as u64))
    }

    /// Whether the connector should stop once the repository is drained
    pub fn is_polling_disabled(&self) -> bool {
        self.retry_delay_millis == POLLING_DISABLED
    }

    /// A "run once" schedule that has already paused itself
    ///
    /// Such a schedule is disabled, never polls, and still has intervals, so
    /// a traversal restart should re-enable it.
    pub fn is_paused_run_once(&self) -> bool {
        self.disabled && self.retry_delay_millis == POLLING_DISABLED && !self.intervals.is_empty()
    }

    /// Check whether the connector may traverse during `hour` (0-23)
    pub fn should_run(&self, hour: u32) -> bool {
        self.intervals.iter().any(|i| i.contains(hour))
    }

    /// Copy with the disabled flag set
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Copy bound to a different connector name
    pub fn with_connector_name(mut self, name: impl Into<String>) -> Self {
        self.connector_name = name.into();
        self
    }
}

/// Reject interval sets in which any hour is covered twice
fn check_disjoint(intervals: &[ScheduleInterval]) -> ScheduleResult<()> {
    let mut owner: [Option<usize>; 24] = [None; 24];

    for (idx, interval) in intervals.iter().enumerate() {
        for hour in interval.hours() {
            if let Some(prev) = owner[hour as usize] {
                return Err(ScheduleError::OverlappingIntervals {
                    first: intervals[prev].to_string(),
                    second: interval.to_string(),
                });
            }
            owner[hour as usize] = Some(idx);
        }
    }

    Ok(())
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disabled {
            write!(f, "#")?;
        }
        write!(
            f,
            "{}:{}:{}",
            self.connector_name, self.load, self.retry_delay_millis
        )?;
        for interval in &self.intervals {
            write!(f, ":{interval}")?;
        }
        Ok(())
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Schedule {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(start: u32, end: u32) -> ScheduleInterval {
        ScheduleInterval::new(start, end).unwrap()
    }

    #[test]
    fn test_interval_wraps_midnight() {
        let wrap = interval(22, 4);
        let matching: Vec<u32> = (0..24).filter(|h| wrap.contains(*h)).collect();
        assert_eq!(matching, vec![0, 1, 2, 3, 22, 23]);
        assert!(wrap.spans_midnight());

        for hour in 4..22 {
            assert!(!wrap.contains(hour), "hour {hour} should not match");
        }
    }

    #[test]
    fn test_interval_end_zero_means_midnight() {
        let evening = interval(18, 0);
        assert!(evening.contains(18));
        assert!(evening.contains(23));
        assert!(!evening.contains(0));
        assert!(!evening.contains(17));
        assert!(!evening.spans_midnight());

        assert_eq!(ScheduleInterval::all_day().hours().len(), 24);
    }

    #[test]
    fn test_interval_plain_range() {
        let work = interval(9, 17);
        assert!(work.contains(9));
        assert!(work.contains(16));
        assert!(!work.contains(17));
        assert!(!work.contains(8));
    }

    #[test]
    fn test_interval_rejects_bad_hours() {
        assert!(ScheduleInterval::new(24, 2).is_err());
        assert!(ScheduleInterval::new(3, 25).is_err());
        assert!("x-3".parse::<ScheduleInterval>().is_err());
        assert!("7".parse::<ScheduleInterval>().is_err());
    }

    #[test]
    fn test_schedule_should_run_multiple_intervals() {
        let schedule =
            Schedule::new("docs", 100, 5000, vec![interval(1, 3), interval(22, 0)]).unwrap();

        assert!(schedule.should_run(1));
        assert!(schedule.should_run(2));
        assert!(!schedule.should_run(3));
        assert!(schedule.should_run(23));
        assert!(!schedule.should_run(0));
    }

    #[test]
    fn test_schedule_no_intervals_never_runs() {
        let schedule = Schedule::new("docs", 100, 5000, vec![]).unwrap();
        assert!((0..24).all(|h| !schedule.should_run(h)));
    }

    #[test]
    fn test_schedule_rejects_overlap() {
        let result = Schedule::new("docs", 100, 5000, vec![interval(1, 5), interval(4, 6)]);
        assert!(matches!(
            result,
            Err(ScheduleError::OverlappingIntervals { .. })
        ));

        let wrap_overlap = Schedule::new("docs", 100, 5000, vec![interval(22, 2), interval(0, 1)]);
        assert!(wrap_overlap.is_err());
    }

    #[test]
    fn test_schedule_parse_full_form() {
        let schedule = Schedule::parse("#docs:250:60000:1-2:22-4").unwrap();

        assert_eq!(schedule.connector_name(), "docs");
        assert!(schedule.is_disabled());
        assert_eq!(schedule.load(), 250);
        assert_eq!(schedule.retry_delay_millis(), 60_000);
        assert_eq!(schedule.intervals().len(), 2);
        assert_eq!(schedule.to_string(), "#docs:250:60000:1-2:22-4");
    }

    #[test]
    fn test_schedule_parse_legacy_form() {
        let schedule = Schedule::parse("docs:100:0-0").unwrap();

        assert!(!schedule.is_disabled());
        assert_eq!(schedule.retry_delay_millis(), DEFAULT_RETRY_DELAY_MILLIS);
        assert_eq!(schedule.intervals(), &[ScheduleInterval::all_day()]);
    }

    #[test]
    fn test_schedule_parse_polling_disabled() {
        let schedule = Schedule::parse("docs:100:-1:0-0").unwrap();

        assert!(schedule.is_polling_disabled());
        assert!(schedule.retry_delay().is_none());
        assert!(!schedule.is_paused_run_once());
        assert!(schedule.with_disabled(true).is_paused_run_once());
    }

    #[test]
    fn test_schedule_parse_errors() {
        assert!(Schedule::parse("").is_err());
        assert!(Schedule::parse("docs").is_err());
        assert!(Schedule::parse("docs:lots:100:0-0").is_err());
        assert!(Schedule::parse("docs:100:soon:0-0").is_err());
        assert!(Schedule::parse("docs:100:100:5-99").is_err());
    }

    #[test]
    fn test_paused_run_once_requires_intervals() {
        let schedule = Schedule::new("docs", 100, POLLING_DISABLED, vec![])
            .unwrap()
            .with_disabled(true);
        assert!(!schedule.is_paused_run_once());
    }

    #[test]
    fn test_schedule_serde_uses_string_form() {
        let schedule = Schedule::default_for("docs");
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, "\"docs:200:300000:0-0\"");

        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }
}
