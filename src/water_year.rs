//! Water years and the time axis of a lidar collection.
//!
//! A collection's time variable is stored as "hours since <Oct 1 of the year
//! before the water year>" and each flight is stamped at 23:00 on its date.
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use std::str::FromStr;

use crate::error::DateTimeError;

/// Hour of the day every flight is stamped at.
pub const FLIGHT_HOUR: u32 = 23;
/// Calendar written into new collections.
pub const STANDARD_CALENDAR: &str = "standard";

/// The water year a date belongs to: its calendar year for months up to and
/// including October, otherwise the next calendar year.
pub fn water_year(date: NaiveDate) -> i32 {
    if date.month() <= 10 {
        date.year()
    } else {
        date.year() + 1
    }
}

/// Midnight on October 1 of the year before `water_year`, the epoch of that
/// water year's collection.
pub fn water_year_start(water_year: i32) -> Result<NaiveDateTime, DateTimeError> {
    let start_year = water_year - 1;
    NaiveDate::from_ymd_opt(start_year, 10, 1)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or(DateTimeError::InvalidYearMonthDay(start_year, 10, 1))
}

/// Time of day every flight is stamped at.
pub const FLIGHT_TIME: NaiveTime = match NaiveTime::from_hms_opt(FLIGHT_HOUR, 0, 0) {
    Some(t) => t,
    None => panic!("FLIGHT_HOUR must be a valid hour"),
};

/// The timestamp recorded for a flight on `date`.
pub fn flight_datetime(date: NaiveDate) -> NaiveDateTime {
    date.and_time(FLIGHT_TIME)
}

/// The unit part of a CF "<unit> since <epoch>" string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum TimeUnit {
    #[strum(to_string = "seconds", serialize = "second", serialize = "s")]
    Seconds,
    #[strum(to_string = "minutes", serialize = "minute", serialize = "min")]
    Minutes,
    #[strum(to_string = "hours", serialize = "hour", serialize = "h")]
    Hours,
    #[strum(to_string = "days", serialize = "day", serialize = "d")]
    Days,
}

impl TimeUnit {
    fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86400.0,
        }
    }
}

/// A parsed CF time convention ("<unit> since <epoch>").
#[derive(Debug, Clone, PartialEq)]
pub struct TimeConvention {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl TimeConvention {
    /// The convention written into a new collection for `water_year`.
    pub fn for_water_year(water_year: i32) -> Result<Self, DateTimeError> {
        Ok(Self {
            unit: TimeUnit::Hours,
            epoch: water_year_start(water_year)?,
        })
    }

    /// Parse a units string and calendar name as stored on a time variable.
    pub fn parse(units: &str, calendar: Option<&str>) -> Result<Self, DateTimeError> {
        if let Some(cal) = calendar {
            check_calendar(cal)?;
        }

        let (unit_str, epoch_str) = units
            .split_once(" since ")
            .ok_or_else(|| DateTimeError::InvalidTimeUnits(units.to_string()))?;
        let unit = TimeUnit::from_str(unit_str.trim())
            .map_err(|_| DateTimeError::InvalidTimeUnits(units.to_string()))?;
        let epoch = parse_epoch(epoch_str.trim())
            .ok_or_else(|| DateTimeError::InvalidTimeUnits(units.to_string()))?;
        Ok(Self { unit, epoch })
    }

    /// The string stored in the `units` attribute, e.g. "hours since 2019-10-01 00:00:00".
    pub fn units_string(&self) -> String {
        format!(
            "{} since {}",
            self.unit,
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Convert a datetime into a value on this time axis.
    pub fn to_value(&self, t: NaiveDateTime) -> f64 {
        let delta = t - self.epoch;
        delta.num_seconds() as f64 / self.unit.seconds()
    }

    /// Convert a value on this time axis back into a datetime, rounded to
    /// the nearest second. Fill values and anything else outside the range
    /// of representable datetimes are an error.
    pub fn to_datetime(&self, value: f64) -> Result<NaiveDateTime, DateTimeError> {
        let secs = (value * self.unit.seconds()).round();
        if !secs.is_finite() || secs.abs() >= i64::MAX as f64 {
            return Err(DateTimeError::TimeValueOutOfRange(value));
        }
        TimeDelta::try_seconds(secs as i64)
            .and_then(|delta| self.epoch.checked_add_signed(delta))
            .ok_or(DateTimeError::TimeValueOutOfRange(value))
    }

    /// The value stored for a flight on `date`.
    pub fn flight_value(&self, date: NaiveDate) -> f64 {
        self.to_value(flight_datetime(date))
    }

    /// The water year this axis was created for (the epoch's year + 1).
    pub fn water_year(&self) -> i32 {
        self.epoch.year() + 1
    }
}

fn check_calendar(calendar: &str) -> Result<(), DateTimeError> {
    match calendar.to_ascii_lowercase().as_str() {
        "standard" | "gregorian" | "proleptic_gregorian" => Ok(()),
        _ => Err(DateTimeError::UnsupportedCalendar(calendar.to_string())),
    }
}

fn parse_epoch(s: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    // CF allows a trailing time zone; only UTC is meaningful here.
    let s = s.trim_end_matches(" UTC").trim_end_matches('Z');

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Where an observation goes on a collection's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIndex {
    pub index: usize,
    /// `false` when the value is already present on the axis, i.e. a duplicate.
    pub is_new: bool,
}

/// Find where a flight on `date` belongs on the time axis `times`.
///
/// If the flight's time value is already on the axis, its position is
/// returned with `is_new = false`; otherwise the next position past the end.
/// This only reads `times`; the caller performs any write.
pub fn compute_time_index(
    times: &[f64],
    convention: &TimeConvention,
    date: NaiveDate,
) -> TimeIndex {
    let t = convention.flight_value(date);
    match times.iter().position(|&v| v == t) {
        Some(index) => TimeIndex { index, is_new: false },
        None => TimeIndex { index: times.len(), is_new: true },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case(ymd(2020, 4, 14), 2020)]
    #[case(ymd(2019, 11, 3), 2020)]
    #[case(ymd(2019, 10, 31), 2019)]
    #[case(ymd(2019, 12, 31), 2020)]
    #[case(ymd(2020, 1, 1), 2020)]
    #[case(ymd(2020, 9, 30), 2020)]
    fn test_water_year(#[case] date: NaiveDate, #[case] expected: i32) {
        assert_eq!(water_year(date), expected);
    }

    #[test]
    fn test_units_string_round_trip() {
        let conv = TimeConvention::for_water_year(2020).unwrap();
        assert_eq!(conv.units_string(), "hours since 2019-10-01 00:00:00");
        let parsed = TimeConvention::parse(&conv.units_string(), Some("standard")).unwrap();
        assert_eq!(parsed, conv);
        assert_eq!(parsed.water_year(), 2020);
    }

    #[rstest]
    #[case("hours since 2019-10-01 00:00:00", TimeUnit::Hours)]
    #[case("hours since 2019-10-01", TimeUnit::Hours)]
    #[case("days since 2019-10-01T00:00:00", TimeUnit::Days)]
    #[case("Seconds since 2019-10-01 00:00:00 UTC", TimeUnit::Seconds)]
    fn test_parse_units(#[case] units: &str, #[case] unit: TimeUnit) {
        let conv = TimeConvention::parse(units, None).unwrap();
        assert_eq!(conv.unit, unit);
        assert_eq!(conv.epoch, ymd(2019, 10, 1).and_time(NaiveTime::MIN));
    }

    #[test]
    fn test_parse_bad_units() {
        assert!(TimeConvention::parse("hours after 2019-10-01", None).is_err());
        assert!(TimeConvention::parse("fortnights since 2019-10-01", None).is_err());
        assert!(TimeConvention::parse("hours since yesterday", None).is_err());
        assert!(TimeConvention::parse("hours since 2019-10-01", Some("noleap")).is_err());
    }

    #[test]
    fn test_flight_value() {
        let conv = TimeConvention::for_water_year(2020).unwrap();
        // First day of the water year is stamped at 23:00
        assert_abs_diff_eq!(conv.flight_value(ymd(2019, 10, 1)), 23.0);
        assert_abs_diff_eq!(conv.flight_value(ymd(2019, 10, 2)), 47.0);
        // 2020 is a leap year: Oct 1 -> Apr 14 is 196 days
        assert_abs_diff_eq!(conv.flight_value(ymd(2020, 4, 14)), 196.0 * 24.0 + 23.0);
        assert_eq!(
            conv.to_datetime(conv.flight_value(ymd(2020, 4, 14))).unwrap(),
            flight_datetime(ymd(2020, 4, 14))
        );
    }

    #[rstest]
    #[case(9.969_209_968_386_869e36_f32 as f64)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(-1e300)]
    #[case(1e15)]
    fn test_unrepresentable_time_values(#[case] value: f64) {
        let conv = TimeConvention::for_water_year(2020).unwrap();
        let err = conv.to_datetime(value).unwrap_err();
        assert!(matches!(err, DateTimeError::TimeValueOutOfRange(_)));
    }

    #[test]
    fn test_time_index_new_and_existing() {
        let conv = TimeConvention::for_water_year(2020).unwrap();
        let times = vec![conv.flight_value(ymd(2020, 2, 1)), conv.flight_value(ymd(2020, 3, 1))];

        let idx = compute_time_index(&times, &conv, ymd(2020, 4, 1));
        assert_eq!(idx, TimeIndex { index: 2, is_new: true });

        let idx = compute_time_index(&times, &conv, ymd(2020, 3, 1));
        assert_eq!(idx, TimeIndex { index: 1, is_new: false });

        let idx = compute_time_index(&[], &conv, ymd(2020, 3, 1));
        assert_eq!(idx, TimeIndex { index: 0, is_new: true });
    }

    #[test]
    fn test_time_index_is_idempotent() {
        let conv = TimeConvention::for_water_year(2020).unwrap();
        let times = vec![conv.flight_value(ymd(2020, 2, 1))];
        for date in [ymd(2020, 2, 1), ymd(2020, 5, 5)] {
            let first = compute_time_index(&times, &conv, date);
            let second = compute_time_index(&times, &conv, date);
            assert_eq!(first, second);
        }
    }
}
