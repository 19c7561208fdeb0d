//! Alarm schedules: normalizing user input to local wall-clock seconds and
//! deciding which entry fires on a given poll.

use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeZone};

use crate::errors::TimerError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// One schedule as supplied by the caller.
///
/// Every variant is normalized to a local [`NaiveDateTime`] with the
/// sub-second part truncated.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleSpec {
    /// A local wall-clock timestamp.
    At(NaiveDateTime),
    /// An ISO-8601 (or similar) string. A bare time of day means today.
    Text(String),
    /// `year, month, day, hour, minute, second[, microsecond]`.
    Fields(Vec<i64>),
}

impl ScheduleSpec {
    /// Resolves the schedule to a whole local second.
    pub fn normalize(&self) -> Result<NaiveDateTime, TimerError> {
        match self {
            ScheduleSpec::At(at) => Ok(at.trunc_subsecs(0)),
            ScheduleSpec::Text(text) => parse_text(text).map(|at| at.trunc_subsecs(0)),
            ScheduleSpec::Fields(fields) => from_fields(fields),
        }
    }
}

impl From<NaiveDateTime> for ScheduleSpec {
    fn from(at: NaiveDateTime) -> Self {
        ScheduleSpec::At(at)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for ScheduleSpec {
    fn from(at: DateTime<Tz>) -> Self {
        ScheduleSpec::At(at.with_timezone(&Local).naive_local())
    }
}

impl From<SystemTime> for ScheduleSpec {
    fn from(at: SystemTime) -> Self {
        DateTime::<Local>::from(at).into()
    }
}

impl From<&str> for ScheduleSpec {
    fn from(text: &str) -> Self {
        ScheduleSpec::Text(text.to_string())
    }
}

impl From<String> for ScheduleSpec {
    fn from(text: String) -> Self {
        ScheduleSpec::Text(text)
    }
}

impl From<Vec<i64>> for ScheduleSpec {
    fn from(fields: Vec<i64>) -> Self {
        ScheduleSpec::Fields(fields)
    }
}

impl From<[i64; 6]> for ScheduleSpec {
    fn from(fields: [i64; 6]) -> Self {
        ScheduleSpec::Fields(fields.to_vec())
    }
}

impl From<[i64; 7]> for ScheduleSpec {
    fn from(fields: [i64; 7]) -> Self {
        ScheduleSpec::Fields(fields.to_vec())
    }
}

/// The current local wall-clock time, truncated to the second.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

fn parse_text(text: &str) -> Result<NaiveDateTime, TimerError> {
    let text = text.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Local).naive_local());
    }
    if let Ok(at) = text.parse::<NaiveDateTime>() {
        return Ok(at);
    }
    if let Some(at) = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Ok(at);
    }
    if let Ok(day) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(day.and_time(NaiveTime::MIN));
    }
    if let Some(time) = TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
    {
        return Ok(Local::now().date_naive().and_time(time));
    }

    Err(TimerError::InvalidSchedule(format!(
        "Could not parse '{text}' as a timestamp."
    )))
}

fn from_fields(fields: &[i64]) -> Result<NaiveDateTime, TimerError> {
    if !matches!(fields.len(), 6 | 7) {
        return Err(TimerError::InvalidSchedule(format!(
            "Expected 6 or 7 fields (year..second[, microsecond]), got {}.",
            fields.len()
        )));
    }
    let invalid =
        || TimerError::InvalidSchedule(format!("{fields:?} is not a valid date and time."));

    let year = i32::try_from(fields[0]).map_err(|_| invalid())?;
    let mut rest = [0u32; 6];
    for (slot, value) in rest.iter_mut().zip(&fields[1..]) {
        *slot = u32::try_from(*value).map_err(|_| invalid())?;
    }
    let [month, day, hour, minute, second, micro] = rest;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micro))
        .map(|at| at.trunc_subsecs(0))
        .ok_or_else(invalid)
}

/// Normalizes a whole schedule list, failing on the first bad entry.
pub(crate) fn normalize_all<I, S>(schedules: I) -> Result<Vec<NaiveDateTime>, TimerError>
where
    I: IntoIterator<Item = S>,
    S: Into<ScheduleSpec>,
{
    schedules
        .into_iter()
        .map(|spec| spec.into().normalize())
        .collect()
}

/// The worker's view of the schedule list.
///
/// Each entry fires at most once per wall-clock second. Entries sharing a
/// timestamp fire in list order, one per call to [`ScheduleBook::next_due`].
#[derive(Debug)]
pub(crate) struct ScheduleBook {
    entries: Vec<(usize, NaiveDateTime)>,
    keep: bool,
    second: Option<NaiveDateTime>,
    fired: Vec<usize>,
}

impl ScheduleBook {
    pub(crate) fn new(schedules: &[NaiveDateTime], keep: bool) -> Self {
        ScheduleBook {
            entries: schedules.iter().copied().enumerate().collect(),
            keep,
            second: None,
            fired: Vec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Picks the entry to fire at `now`, if any, and returns its current list
    /// index. Without `keep` the entry is removed from the book.
    pub(crate) fn next_due(&mut self, now: NaiveDateTime) -> Option<usize> {
        if self.second != Some(now) {
            self.second = Some(now);
            self.fired.clear();
        }

        let index = self
            .entries
            .iter()
            .position(|(id, at)| *at == now && !self.fired.contains(id))?;
        self.fired.push(self.entries[index].0);
        if !self.keep {
            self.entries.remove(index);
        }
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_common_text_forms() {
        for text in [
            "2024-07-05 11:11:30",
            "2024-07-05T11:11:30",
            "2024-07-05 11:11:30.750",
            "2024/07/05 11:11:30",
        ] {
            assert_eq!(
                ScheduleSpec::from(text).normalize().unwrap(),
                at(11, 11, 30),
                "{text}"
            );
        }
        assert_eq!(
            ScheduleSpec::from("2024-07-05").normalize().unwrap(),
            at(0, 0, 0)
        );
        assert_eq!(
            ScheduleSpec::from("2024-07-05 11:11").normalize().unwrap(),
            at(11, 11, 0)
        );
    }

    #[test]
    fn bare_time_means_today() {
        let parsed = ScheduleSpec::from("23:59:58").normalize().unwrap();
        assert_eq!(parsed.date(), Local::now().date_naive());
        assert_eq!(parsed.time(), NaiveTime::from_hms_opt(23, 59, 58).unwrap());
    }

    #[test]
    fn offsets_are_converted_to_local_time() {
        let utc = chrono::Utc.with_ymd_and_hms(2024, 7, 5, 11, 11, 30).unwrap();
        let expected = utc.with_timezone(&Local).naive_local();
        assert_eq!(
            ScheduleSpec::from("2024-07-05T11:11:30Z").normalize().unwrap(),
            expected
        );
        assert_eq!(ScheduleSpec::from(utc).normalize().unwrap(), expected);
    }

    #[test]
    fn rejects_garbage_text() {
        assert!(matches!(
            ScheduleSpec::from("5").normalize(),
            Err(TimerError::InvalidSchedule(_))
        ));
        assert!(ScheduleSpec::from("tomorrow-ish").normalize().is_err());
    }

    #[test]
    fn field_tuples() {
        assert_eq!(
            ScheduleSpec::from([2024, 7, 5, 11, 11, 30]).normalize().unwrap(),
            at(11, 11, 30)
        );
        assert_eq!(
            ScheduleSpec::from([2024, 7, 5, 11, 11, 30, 999_999])
                .normalize()
                .unwrap(),
            at(11, 11, 30)
        );
        assert!(ScheduleSpec::from(vec![2024, 7, 5]).normalize().is_err());
        assert!(ScheduleSpec::from([2024, 13, 5, 11, 11, 30]).normalize().is_err());
        assert!(ScheduleSpec::from([2024, 7, 5, -1, 11, 30]).normalize().is_err());
    }

    #[test]
    fn timestamps_lose_their_fraction() {
        let precise = at(11, 11, 30) + Duration::milliseconds(640);
        let normalized = ScheduleSpec::from(precise).normalize().unwrap();
        assert_eq!(normalized.nanosecond(), 0);
        assert_eq!(normalized, at(11, 11, 30));
    }

    #[test]
    fn normalize_all_stops_at_the_first_bad_entry() {
        let ok = normalize_all(["2024-07-05 11:11:30", "2024-07-05 11:11:31"]).unwrap();
        assert_eq!(ok, vec![at(11, 11, 30), at(11, 11, 31)]);
        assert!(normalize_all(["2024-07-05 11:11:30", "nope"]).is_err());
    }

    #[test]
    fn fires_once_per_second_without_keep() {
        let mut book = ScheduleBook::new(&[at(10, 0, 0), at(10, 0, 1)], false);
        assert_eq!(book.next_due(at(9, 59, 59)), None);
        assert_eq!(book.next_due(at(10, 0, 0)), Some(0));
        assert_eq!(book.next_due(at(10, 0, 0)), None);
        assert_eq!(book.next_due(at(10, 0, 1)), Some(0));
        assert!(book.is_empty());
    }

    #[test]
    fn kept_entries_do_not_refire_within_the_same_second() {
        let mut book = ScheduleBook::new(&[at(10, 0, 0)], true);
        assert_eq!(book.next_due(at(10, 0, 0)), Some(0));
        assert_eq!(book.next_due(at(10, 0, 0)), None);
        assert_eq!(book.next_due(at(10, 0, 1)), None);
        assert!(!book.is_empty());
    }

    #[test]
    fn duplicate_timestamps_fire_in_list_order() {
        let mut book = ScheduleBook::new(&[at(10, 0, 0), at(9, 0, 0), at(10, 0, 0)], false);
        assert_eq!(book.next_due(at(10, 0, 0)), Some(0));
        // The duplicate moved from index 2 to 1 after the removal.
        assert_eq!(book.next_due(at(10, 0, 0)), Some(1));
        assert_eq!(book.next_due(at(10, 0, 0)), None);

        let mut kept = ScheduleBook::new(&[at(10, 0, 0), at(10, 0, 0)], true);
        assert_eq!(kept.next_due(at(10, 0, 0)), Some(0));
        assert_eq!(kept.next_due(at(10, 0, 0)), Some(1));
        assert_eq!(kept.next_due(at(10, 0, 0)), None);
    }
}
