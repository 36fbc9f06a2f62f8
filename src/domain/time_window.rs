use crate::error::ScheduleError;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Day index as stored by the backend: 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub fn new(index: u8) -> Result<Self, ScheduleError> {
        if index > 6 {
            return Err(ScheduleError::InvalidWindow(format!(
                "day_of_week must be 0-6, got {index}"
            )));
        }
        Ok(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn of_date(date: NaiveDate) -> Self {
        Self::from(date.weekday())
    }

    pub fn weekday(self) -> Weekday {
        match self.0 {
            0 => Weekday::Sun,
            1 => Weekday::Mon,
            2 => Weekday::Tue,
            3 => Weekday::Wed,
            4 => Weekday::Thu,
            5 => Weekday::Fri,
            _ => Weekday::Sat,
        }
    }

    pub fn name(self) -> &'static str {
        match self.weekday() {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        Self(weekday.num_days_from_sunday() as u8)
    }
}

impl TryFrom<u8> for DayOfWeek {
    type Error = ScheduleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DayOfWeek> for u8 {
    fn from(day: DayOfWeek) -> Self {
        day.0
    }
}

/// What a window repeats on: every given weekday, or one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WindowAnchor {
    Weekly(DayOfWeek),
    Date(NaiveDate),
}

impl WindowAnchor {
    pub fn from_parts(
        day_of_week: Option<u8>,
        specific_date: Option<NaiveDate>,
    ) -> Result<Self, ScheduleError> {
        match (day_of_week, specific_date) {
            (Some(day), None) => Ok(Self::Weekly(DayOfWeek::new(day)?)),
            (None, Some(date)) => Ok(Self::Date(date)),
            (Some(_), Some(_)) => Err(ScheduleError::InvalidWindow(
                "exactly one of day_of_week or specific_date may be set".to_string(),
            )),
            (None, None) => Err(ScheduleError::InvalidWindow(
                "one of day_of_week or specific_date is required".to_string(),
            )),
        }
    }

    pub fn day_of_week(self) -> DayOfWeek {
        match self {
            Self::Weekly(day) => day,
            Self::Date(date) => DayOfWeek::of_date(date),
        }
    }

    pub fn applies_on(self, date: NaiveDate) -> bool {
        match self {
            Self::Weekly(day) => day == DayOfWeek::of_date(date),
            Self::Date(anchor) => anchor == date,
        }
    }
}

impl fmt::Display for WindowAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weekly(day) => f.write_str(day.name()),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Half-open `[start, end)` interval in minutes since midnight. Never wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow", into = "RawTimeWindow")]
pub struct TimeWindow {
    anchor: WindowAnchor,
    start_minute: u16,
    end_minute: u16,
}

impl TimeWindow {
    pub fn new(anchor: WindowAnchor, start_minute: u16, end_minute: u16) -> Result<Self, ScheduleError> {
        if start_minute >= MINUTES_PER_DAY || end_minute >= MINUTES_PER_DAY {
            return Err(ScheduleError::InvalidWindow(format!(
                "window bounds must be within 00:00-23:59, got {start_minute}-{end_minute}"
            )));
        }
        if start_minute >= end_minute {
            return Err(ScheduleError::InvalidWindow(format!(
                "start {} must be before end {}",
                format_hhmm(start_minute),
                format_hhmm(end_minute)
            )));
        }
        Ok(Self {
            anchor,
            start_minute,
            end_minute,
        })
    }

    pub fn from_parts(
        day_of_week: Option<u8>,
        specific_date: Option<NaiveDate>,
        start_minute: u16,
        end_minute: u16,
    ) -> Result<Self, ScheduleError> {
        Self::new(
            WindowAnchor::from_parts(day_of_week, specific_date)?,
            start_minute,
            end_minute,
        )
    }

    pub fn weekly(day: DayOfWeek, start_minute: u16, end_minute: u16) -> Result<Self, ScheduleError> {
        Self::new(WindowAnchor::Weekly(day), start_minute, end_minute)
    }

    pub fn on_date(date: NaiveDate, start_minute: u16, end_minute: u16) -> Result<Self, ScheduleError> {
        Self::new(WindowAnchor::Date(date), start_minute, end_minute)
    }

    pub fn anchor(&self) -> WindowAnchor {
        self.anchor
    }

    pub fn start_minute(&self) -> u16 {
        self.start_minute
    }

    pub fn end_minute(&self) -> u16 {
        self.end_minute
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end_minute - self.start_minute
    }

    /// `outer.start <= inner.start && inner.end <= outer.end` on the same anchor.
    pub fn contains(&self, inner: &TimeWindow) -> bool {
        self.anchor == inner.anchor
            && self.start_minute <= inner.start_minute
            && inner.end_minute <= self.end_minute
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.anchor == other.anchor
            && self.start_minute < other.end_minute
            && other.start_minute < self.end_minute
    }

    /// Re-anchors a weekly window onto a concrete date it recurs on.
    pub fn project_onto(&self, date: NaiveDate) -> Option<TimeWindow> {
        self.anchor.applies_on(date).then_some(TimeWindow {
            anchor: WindowAnchor::Date(date),
            ..*self
        })
    }

    pub(crate) fn with_range(&self, start_minute: u16, end_minute: u16) -> Option<TimeWindow> {
        (start_minute < end_minute).then_some(TimeWindow {
            anchor: self.anchor,
            start_minute,
            end_minute,
        })
    }

    pub(crate) fn same_range(&self, other: &TimeWindow) -> bool {
        self.start_minute == other.start_minute && self.end_minute == other.end_minute
    }
}

impl PartialOrd for TimeWindow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeWindow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.anchor
            .cmp(&other.anchor)
            .then(self.start_minute.cmp(&other.start_minute))
            .then(self.end_minute.cmp(&other.end_minute))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.anchor,
            format_hhmm(self.start_minute),
            format_hhmm(self.end_minute)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTimeWindow {
    day_of_week: Option<u8>,
    specific_date: Option<NaiveDate>,
    start_time: String,
    end_time: String,
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = ScheduleError;

    fn try_from(raw: RawTimeWindow) -> Result<Self, Self::Error> {
        TimeWindow::from_parts(
            raw.day_of_week,
            raw.specific_date,
            parse_hhmm(&raw.start_time)?,
            parse_hhmm(&raw.end_time)?,
        )
    }
}

impl From<TimeWindow> for RawTimeWindow {
    fn from(window: TimeWindow) -> Self {
        let (day_of_week, specific_date) = match window.anchor {
            WindowAnchor::Weekly(day) => (Some(day.index()), None),
            WindowAnchor::Date(date) => (None, Some(date)),
        };
        Self {
            day_of_week,
            specific_date,
            start_time: format_hhmm(window.start_minute),
            end_time: format_hhmm(window.end_minute),
        }
    }
}

#[derive(Clone, Copy)]
enum Meridiem {
    Am,
    Pm,
}

/// Parses free-text clock input: `HH:MM` (24h), `H:MM AM/PM`, or `HHMM`.
pub fn parse_time_input(input: &str) -> Option<u16> {
    let upper = input.trim().to_ascii_uppercase();
    let (body, meridiem) = if let Some(body) = upper.strip_suffix("AM") {
        (body.trim_end(), Some(Meridiem::Am))
    } else if let Some(body) = upper.strip_suffix("PM") {
        (body.trim_end(), Some(Meridiem::Pm))
    } else {
        (upper.as_str(), None)
    };

    let (hour, minute) = match body.split_once(':') {
        Some((hour, minute)) => (parse_digits(hour, 1, 2)?, parse_digits(minute, 2, 2)?),
        None if meridiem.is_none() && body.len() == 4 => {
            (parse_digits(body.get(..2)?, 2, 2)?, parse_digits(body.get(2..)?, 2, 2)?)
        }
        None => return None,
    };
    if minute > 59 {
        return None;
    }

    let hour = match meridiem {
        None if hour <= 23 => hour,
        None => return None,
        Some(_) if !(1..=12).contains(&hour) => return None,
        Some(Meridiem::Am) => hour % 12,
        Some(Meridiem::Pm) => hour % 12 + 12,
    };
    Some(hour * 60 + minute)
}

/// Strict `HH:MM` used for stored boundaries.
pub fn parse_hhmm(value: &str) -> Result<u16, ScheduleError> {
    let invalid = || ScheduleError::InvalidTimeFormat(value.to_string());
    let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour = parse_digits(hour, 2, 2).ok_or_else(invalid)?;
    let minute = parse_digits(minute, 2, 2).ok_or_else(invalid)?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(hour * 60 + minute)
}

pub fn parse_time(value: &str) -> Result<u16, ScheduleError> {
    parse_time_input(value).ok_or_else(|| ScheduleError::InvalidTimeFormat(value.to_string()))
}

fn parse_digits(value: &str, min_len: usize, max_len: usize) -> Option<u16> {
    if value.len() < min_len || value.len() > max_len || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

pub fn format_hhmm(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

pub fn format_display_time(minutes: u16) -> String {
    let hour = minutes / 60;
    let (display_hour, suffix) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{display_hour}:{:02} {suffix}", minutes % 60)
}

/// Serde adapter for `Option<u16>` minutes stored as `HH:MM` text.
pub mod optional_hhmm {
    use super::{format_hhmm, parse_hhmm};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<u16>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(minutes) => serializer.serialize_some(&format_hhmm(*minutes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| parse_hhmm(&value).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Parses `YYYY-MM-DD` as a calendar date with no timezone attached.
pub fn parse_local_date(value: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::InvalidDate(value.to_string()))
}
