use std::fmt;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{ProfileError, Result};
use crate::raw::RawScheduleEntry;

/// Length of the repeating schedule day.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// The daily schedules a profile can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    Basal,
    CarbRatio,
    Sensitivity,
    TargetLow,
    TargetHigh,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 5] = [
        ScheduleKind::Basal,
        ScheduleKind::CarbRatio,
        ScheduleKind::Sensitivity,
        ScheduleKind::TargetLow,
        ScheduleKind::TargetHigh,
    ];

    /// Key used for this schedule in a Nightscout profile record.
    pub fn field_name(self) -> &'static str {
        match self {
            ScheduleKind::Basal => "basal",
            ScheduleKind::CarbRatio => "carbratio",
            ScheduleKind::Sensitivity => "sens",
            ScheduleKind::TargetLow => "target_low",
            ScheduleKind::TargetHigh => "target_high",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleKind::Basal => "basal",
            ScheduleKind::CarbRatio => "carb ratio",
            ScheduleKind::Sensitivity => "sensitivity",
            ScheduleKind::TargetLow => "target low",
            ScheduleKind::TargetHigh => "target high",
        };
        f.write_str(name)
    }
}

/// A change point in a daily schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEntry {
    /// Seconds since local midnight at which `value` takes effect.
    pub offset_secs: u32,
    pub value: f64,
}

impl ScheduleEntry {
    pub fn new(offset_secs: u32, value: f64) -> Self {
        Self { offset_secs, value }
    }

    /// Build an entry from its wire form.
    ///
    /// `timeAsSeconds` wins over `time` when both are present.
    pub fn from_raw(raw: &RawScheduleEntry) -> Result<Self> {
        let offset_secs = match (&raw.time_as_seconds, &raw.time) {
            (Some(seconds), _) => {
                let seconds = seconds.to_f64("timeAsSeconds")?;
                if !(0.0..f64::from(SECONDS_PER_DAY)).contains(&seconds) {
                    return Err(ProfileError::invalid(
                        "timeAsSeconds",
                        seconds.to_string(),
                        "must be within one day",
                    ));
                }
                seconds as u32
            }
            (None, Some(time)) => parse_time_of_day(time)?,
            (None, None) => {
                return Err(ProfileError::MissingField {
                    record: "schedule entry",
                    field: "time",
                });
            }
        };
        let value = raw.value.to_f64("value")?;
        Ok(Self { offset_secs, value })
    }
}

/// Parse "HH:MM" into seconds since midnight.
fn parse_time_of_day(time: &str) -> Result<u32> {
    let invalid = |reason: &str| ProfileError::invalid("time", time, reason);

    let (hours, minutes) = time.trim().split_once(':').ok_or_else(|| invalid("expected HH:MM"))?;
    let hours: u32 = hours.parse().map_err(|_| invalid("hours are not a number"))?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid("minutes are not a number"))?;
    if hours >= 24 || minutes >= 60 {
        return Err(invalid("outside the 24 hour day"));
    }
    Ok(hours * 3600 + minutes * 60)
}

/// A schedule entry placed on the absolute timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsoluteScheduleEntry {
    pub start: DateTime<Tz>,
    pub value: f64,
}

/// A repeating daily step function from time-of-day to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSchedule {
    entries: Vec<ScheduleEntry>,
}

impl TimeSchedule {
    /// Entries need not be sorted. Entries sharing an offset keep their
    /// input order, so the later one wins lookups.
    pub fn new(mut entries: Vec<ScheduleEntry>) -> Self {
        entries.sort_by_key(|e| e.offset_secs);
        Self { entries }
    }

    pub fn from_raw(raw: &[RawScheduleEntry]) -> Result<Self> {
        let entries = raw
            .iter()
            .map(ScheduleEntry::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry in effect at `offset_secs` after local midnight.
    ///
    /// Before the first entry of the day the last entry is still in effect
    /// from the previous day. Offsets past one day wrap.
    pub fn entry_at(&self, offset_secs: u32) -> Result<&ScheduleEntry> {
        let last = self.entries.last().ok_or(ProfileError::EmptySchedule)?;
        let offset_secs = offset_secs % SECONDS_PER_DAY;
        let idx = self.entries.partition_point(|e| e.offset_secs <= offset_secs);
        Ok(match idx {
            0 => last,
            n => &self.entries[n - 1],
        })
    }

    pub fn value_at(&self, offset_secs: u32) -> Result<f64> {
        self.entry_at(offset_secs).map(|e| e.value)
    }

    /// Materialize the schedule between two instants in zone `tz`.
    ///
    /// The first item is the segment already in effect at `start`, stamped
    /// with its own start (possibly on the previous local day). Every change
    /// point in `(start, end]` follows, in order.
    pub fn between(
        &self,
        tz: Tz,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<AbsoluteScheduleEntry> {
        if start > end || self.entries.is_empty() {
            return Vec::new();
        }

        let local_start = start.with_timezone(&tz);
        let start_day = local_start.date_naive();
        let end_day = end.with_timezone(&tz).date_naive();
        let start_offset = local_start.time().num_seconds_from_midnight();

        let idx = self.entries.partition_point(|e| e.offset_secs <= start_offset);
        let (active_day, active) = match idx {
            0 => (
                start_day.pred_opt().unwrap_or(start_day),
                &self.entries[self.entries.len() - 1],
            ),
            n => (start_day, &self.entries[n - 1]),
        };

        let mut items = vec![AbsoluteScheduleEntry {
            start: local_instant(tz, active_day, active.offset_secs),
            value: active.value,
        }];

        let mut day = start_day;
        while day <= end_day {
            for (i, entry) in self.entries.iter().enumerate() {
                // shadowed by a later entry at the same offset
                if self
                    .entries
                    .get(i + 1)
                    .is_some_and(|next| next.offset_secs == entry.offset_secs)
                {
                    continue;
                }
                let at = local_instant(tz, day, entry.offset_secs);
                let at_utc = at.with_timezone(&Utc);
                if at_utc > start && at_utc <= end {
                    items.push(AbsoluteScheduleEntry {
                        start: at,
                        value: entry.value,
                    });
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        items
    }
}

/// Resolve a local wall-clock offset on `day` to an instant in `tz`.
///
/// Ambiguous times take the earlier instant; times inside a spring-forward
/// gap move to the first valid local minute after it.
fn local_instant(tz: Tz, day: NaiveDate, offset_secs: u32) -> DateTime<Tz> {
    let naive = day.and_time(chrono::NaiveTime::MIN) + Duration::seconds(i64::from(offset_secs));
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => first_valid_after(tz, naive),
    }
}

fn first_valid_after(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut probe = naive.with_second(0).unwrap_or(naive);
    // no real-world gap lasts longer than a day
    for _ in 0..(24 * 60) {
        probe += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return dt;
        }
    }
    tz.from_utc_datetime(&naive)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::raw::RawNumber;

    fn hours(h: u32) -> u32 {
        h * 3600
    }

    fn schedule(entries: &[(u32, f64)]) -> TimeSchedule {
        TimeSchedule::new(
            entries
                .iter()
                .map(|&(offset, value)| ScheduleEntry::new(offset, value))
                .collect(),
        )
    }

    // ==================== Lookup Tests ====================

    #[test]
    fn test_value_at_midnight_wraparound() {
        let s = schedule(&[(hours(6), 1.0), (hours(22), 2.0)]);
        assert_eq!(s.value_at(hours(2)).unwrap(), 2.0);
    }

    #[test]
    fn test_value_at_exact_boundary_is_inclusive() {
        let s = schedule(&[(0, 0.5), (hours(6), 0.8), (hours(22), 0.3)]);
        assert_eq!(s.value_at(hours(6)).unwrap(), 0.8);
        assert_eq!(s.value_at(hours(6) - 1).unwrap(), 0.5);
        assert_eq!(s.value_at(hours(22)).unwrap(), 0.3);
    }

    #[test]
    fn test_value_at_last_second_of_day() {
        let s = schedule(&[(0, 0.5), (hours(22), 0.3)]);
        assert_eq!(s.value_at(SECONDS_PER_DAY - 1).unwrap(), 0.3);
        assert_eq!(s.value_at(0).unwrap(), 0.5);
    }

    #[test]
    fn test_value_at_single_entry() {
        let s = schedule(&[(hours(12), 7.0)]);
        assert_eq!(s.value_at(0).unwrap(), 7.0);
        assert_eq!(s.value_at(hours(12)).unwrap(), 7.0);
        assert_eq!(s.value_at(hours(23)).unwrap(), 7.0);
    }

    #[test]
    fn test_value_at_empty_schedule_fails() {
        let s = TimeSchedule::default();
        assert_eq!(s.value_at(0), Err(ProfileError::EmptySchedule));
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let s = schedule(&[(hours(22), 0.3), (0, 0.5), (hours(6), 0.8)]);
        let offsets: Vec<u32> = s.entries().iter().map(|e| e.offset_secs).collect();
        assert_eq!(offsets, vec![0, hours(6), hours(22)]);
    }

    #[test]
    fn test_duplicate_offset_later_entry_wins() {
        let s = schedule(&[(0, 0.5), (hours(6), 0.8), (hours(6), 0.9)]);
        assert_eq!(s.value_at(hours(7)).unwrap(), 0.9);
    }

    // ==================== Raw Parsing Tests ====================

    #[test]
    fn test_entry_from_time_as_seconds_string() {
        let raw = RawScheduleEntry {
            time: Some("06:00".to_string()),
            time_as_seconds: Some(RawNumber::Text("21600".to_string())),
            value: RawNumber::Text("0.8".to_string()),
        };
        assert_eq!(ScheduleEntry::from_raw(&raw).unwrap(), ScheduleEntry::new(21600, 0.8));
    }

    #[test]
    fn test_entry_from_hh_mm() {
        let raw = RawScheduleEntry {
            time: Some("04:30".to_string()),
            time_as_seconds: None,
            value: RawNumber::Number(0.45),
        };
        assert_eq!(ScheduleEntry::from_raw(&raw).unwrap().offset_secs, 16200);
    }

    #[test]
    fn test_entry_rejects_out_of_day_offsets() {
        let raw = RawScheduleEntry::at_seconds(SECONDS_PER_DAY, 1.0);
        assert!(matches!(
            ScheduleEntry::from_raw(&raw),
            Err(ProfileError::InvalidField { field: "timeAsSeconds", .. })
        ));

        let raw = RawScheduleEntry {
            time: Some("24:00".to_string()),
            time_as_seconds: None,
            value: RawNumber::Number(1.0),
        };
        assert!(ScheduleEntry::from_raw(&raw).is_err());
    }

    #[test]
    fn test_entry_without_time_fails() {
        let raw = RawScheduleEntry {
            time: None,
            time_as_seconds: None,
            value: RawNumber::Number(1.0),
        };
        assert_eq!(
            ScheduleEntry::from_raw(&raw),
            Err(ProfileError::MissingField {
                record: "schedule entry",
                field: "time"
            })
        );
    }

    #[test]
    fn test_from_raw_empty_list_is_allowed() {
        let s = TimeSchedule::from_raw(&[]).unwrap();
        assert!(s.is_empty());
    }

    // ==================== Absolute Time Tests ====================

    #[test]
    fn test_between_crosses_local_midnight() {
        // Fixed offset zone, five hours behind UTC
        let tz: Tz = "Etc/GMT+5".parse().unwrap();
        let s = schedule(&[(0, 1.0), (hours(6), 0.7), (hours(12), 0.8), (hours(22), 0.9)]);

        let items = s.between(
            tz,
            Utc.with_ymd_and_hms(2017, 7, 7, 20, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2017, 7, 8, 6, 0, 0).unwrap(),
        );

        let expected = vec![
            (tz.with_ymd_and_hms(2017, 7, 7, 12, 0, 0).unwrap(), 0.8),
            (tz.with_ymd_and_hms(2017, 7, 7, 22, 0, 0).unwrap(), 0.9),
            (tz.with_ymd_and_hms(2017, 7, 8, 0, 0, 0).unwrap(), 1.0),
        ];
        let actual: Vec<_> = items.iter().map(|i| (i.start, i.value)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_between_start_before_first_entry_uses_previous_day() {
        let tz: Tz = "UTC".parse().unwrap();
        let s = schedule(&[(hours(6), 1.0), (hours(22), 2.0)]);
        let items = s.between(
            tz,
            Utc.with_ymd_and_hms(2020, 1, 2, 2, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 2, 7, 0, 0).unwrap(),
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].start, tz.with_ymd_and_hms(2020, 1, 1, 22, 0, 0).unwrap());
        assert_eq!(items[0].value, 2.0);
        assert_eq!(items[1].value, 1.0);
    }

    #[test]
    fn test_between_reversed_range_is_empty() {
        let tz: Tz = "UTC".parse().unwrap();
        let s = schedule(&[(0, 1.0)]);
        let start = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        assert!(s.between(tz, start, start - Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_between_spans_multiple_days() {
        let tz: Tz = "UTC".parse().unwrap();
        let s = schedule(&[(0, 1.0), (hours(12), 2.0)]);
        let items = s.between(
            tz,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap(),
        );
        let values: Vec<f64> = items.iter().map(|i| i.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_local_instant_in_spring_forward_gap() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2017, 3, 12).unwrap();
        let at = local_instant(tz, day, hours(2) + 1800);
        assert_eq!(at, tz.with_ymd_and_hms(2017, 3, 12, 3, 0, 0).unwrap());
    }

    // ==================== Property-Based Tests ====================

    #[cfg(test)]
    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        fn distinct_entries() -> impl Strategy<Value = (Vec<(u32, f64)>, Vec<(u32, f64)>)> {
            prop::collection::btree_map(0u32..SECONDS_PER_DAY, -100.0f64..100.0, 1..24)
                .prop_flat_map(|map| {
                    let sorted: Vec<(u32, f64)> = map.into_iter().collect();
                    (Just(sorted.clone()), Just(sorted).prop_shuffle())
                })
        }

        proptest! {
            #[test]
            fn lookup_is_independent_of_input_order(
                (sorted, shuffled) in distinct_entries(),
                query in 0u32..SECONDS_PER_DAY,
            ) {
                let a = schedule(&sorted);
                let b = schedule(&shuffled);
                prop_assert_eq!(a.value_at(query).unwrap(), b.value_at(query).unwrap());
            }

            #[test]
            fn value_before_first_entry_is_last_entry(
                (sorted, _) in distinct_entries(),
            ) {
                let s = schedule(&sorted);
                let first = sorted[0].0;
                prop_assume!(first > 0);
                let last = sorted[sorted.len() - 1].1;
                prop_assert_eq!(s.value_at(first - 1).unwrap(), last);
            }

            #[test]
            fn lookup_returns_a_schedule_value(
                (sorted, _) in distinct_entries(),
                query in 0u32..SECONDS_PER_DAY,
            ) {
                let s = schedule(&sorted);
                let value = s.value_at(query).unwrap();
                prop_assert!(sorted.iter().any(|&(_, v)| v == value));
            }
        }
    }
}
