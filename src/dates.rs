//! Calendar dates as linear day counts.
//!
//! All dates inside the crate are a [`Day`]: the number of days since the 31st of December before
//! the configured epoch year, so the 1st of January of the epoch year is day `1`. Conversions in
//! both directions are memoized in a [`DateCache`], which is built once per run and shared by
//! reference.
use crate::{config::DateConfig, Day};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use qu::ick_use::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Days before the first of each month, in a non-leap year.
const CUMULATIVE_MONTH_DAYS: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in `month` (1-12) of `year`. Returns 0 for months outside 1-12.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    if month == 2 && is_leap_year(year) {
        return 29;
    }
    match month.checked_sub(1) {
        Some(idx) => MONTH_DAYS.get(idx as usize).copied().unwrap_or(0),
        None => 0,
    }
}

/// A (year, month, day) triple. Not necessarily coherent: see [`DateCache::is_coherent`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    pub fn to_naive(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month(), date.day())
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// The textual layouts dates are accepted in.
///
/// Separators may be `-`, `/` or `.`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DateFormat {
    /// `2021-11-17`
    YearMonthDay,
    /// `17-11-2021`
    DayMonthYear,
    /// `20211117`
    CompactYearMonthDay,
    /// `17112021`
    CompactDayMonthYear,
}

// Order matters: the first matching pattern wins. The compact year-first pattern only accepts
// plausible years, months and days so that compact day-first dates fall through to it.
static PATTERNS: Lazy<[(DateFormat, Regex); 4]> = Lazy::new(|| {
    [
        (
            DateFormat::YearMonthDay,
            Regex::new(r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})$").unwrap(),
        ),
        (
            DateFormat::DayMonthYear,
            Regex::new(r"^(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})$").unwrap(),
        ),
        (
            DateFormat::CompactYearMonthDay,
            Regex::new(r"^(1[89]\d{2}|2\d{3})(0[1-9]|1[0-2])(0[1-9]|[12]\d|3[01])$").unwrap(),
        ),
        (
            DateFormat::CompactDayMonthYear,
            Regex::new(r"^(\d{2})(\d{2})(\d{4})$").unwrap(),
        ),
    ]
});

impl DateFormat {
    /// Work out which layout `text` is in. Usually done once per input column.
    pub fn detect(text: &str) -> Option<Self> {
        let text = text.trim();
        PATTERNS
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(format, _)| *format)
    }

    fn regex(self) -> &'static Regex {
        let idx = match self {
            DateFormat::YearMonthDay => 0,
            DateFormat::DayMonthYear => 1,
            DateFormat::CompactYearMonthDay => 2,
            DateFormat::CompactDayMonthYear => 3,
        };
        &PATTERNS[idx].1
    }

    /// Split `text` into (year, month, day), without checking coherence.
    fn split(self, text: &str) -> Option<(i32, u32, u32)> {
        let caps = self.regex().captures(text)?;
        let part = |idx: usize| caps.get(idx).map(|m| m.as_str());
        let (year, month, day) = match self {
            DateFormat::YearMonthDay | DateFormat::CompactYearMonthDay => {
                (part(1)?, part(2)?, part(3)?)
            }
            DateFormat::DayMonthYear | DateFormat::CompactDayMonthYear => {
                (part(3)?, part(2)?, part(1)?)
            }
        };
        Some((year.parse().ok()?, month.parse().ok()?, day.parse().ok()?))
    }
}

/// Converts between calendar dates and day counts, remembering every successful conversion.
///
/// The caches only ever grow and are keyed by deterministic input, so the cache can be shared
/// between threads; insertion takes a write lock.
pub struct DateCache {
    epoch_year: i32,
    max_year: i32,
    /// `year_starts[i]` is the number of days before the 1st of January of `epoch_year + i`. The
    /// final entry is the total number of supported days.
    year_starts: Vec<Day>,
    by_date: RwLock<HashMap<CalendarDate, Day>>,
    by_text: RwLock<HashMap<DateFormat, HashMap<String, Day>>>,
    by_day: RwLock<HashMap<Day, CalendarDate>>,
}

impl DateCache {
    /// Supports dates from the 1st of January `epoch_year` to the 31st of December `max_year`.
    pub fn new(epoch_year: i32, max_year: i32) -> Result<Self> {
        ensure!(
            epoch_year <= max_year,
            "epoch year {} is after the maximum year {}",
            epoch_year,
            max_year
        );
        ensure!(
            max_year - epoch_year < 5000,
            "date range {}-{} is too wide",
            epoch_year,
            max_year
        );
        let mut year_starts = Vec::with_capacity((max_year - epoch_year + 2) as usize);
        let mut total: Day = 0;
        for year in epoch_year..=max_year {
            year_starts.push(total);
            total += if is_leap_year(year) { 366 } else { 365 };
        }
        year_starts.push(total);

        Ok(Self {
            epoch_year,
            max_year,
            year_starts,
            by_date: RwLock::new(HashMap::new()),
            by_text: RwLock::new(HashMap::new()),
            by_day: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &DateConfig) -> Result<Self> {
        Self::new(config.epoch_year, config.max_year)
    }

    pub fn epoch_year(&self) -> i32 {
        self.epoch_year
    }

    pub fn max_year(&self) -> i32 {
        self.max_year
    }

    /// The day count of the 31st of December of the maximum year.
    pub fn last_day(&self) -> Day {
        self.year_starts.last().copied().unwrap_or(0)
    }

    /// Whether the triple is a real date inside the supported range.
    pub fn is_coherent(&self, year: i32, month: u32, day: u32) -> bool {
        (self.epoch_year..=self.max_year).contains(&year)
            && (1..=12).contains(&month)
            && day >= 1
            && day <= days_in_month(year, month)
    }

    /// Convert a calendar date to a day count.
    ///
    /// Incoherent dates are logged and give `None`.
    pub fn to_days(&self, year: i32, month: u32, day: u32) -> Option<Day> {
        let date = CalendarDate::new(year, month, day);
        if let Some(days) = self.by_date.read().get(&date) {
            return Some(*days);
        }
        if !self.is_coherent(year, month, day) {
            event!(Level::WARN, "rejecting invalid date {}", date);
            return None;
        }
        let idx = (year - self.epoch_year) as usize;
        let mut days =
            self.year_starts[idx] + CUMULATIVE_MONTH_DAYS[month as usize - 1] + day as Day;
        if month > 2 && is_leap_year(year) {
            days += 1;
        }
        self.remember(date, days);
        Some(days)
    }

    /// Parse a date string in a previously detected layout.
    pub fn parse(&self, text: &str, format: DateFormat) -> Option<Day> {
        let text = text.trim();
        if let Some(days) = self
            .by_text
            .read()
            .get(&format)
            .and_then(|texts| texts.get(text))
        {
            return Some(*days);
        }
        let (year, month, day) = match format.split(text) {
            Some(parts) => parts,
            None => {
                event!(
                    Level::WARN,
                    "date \"{}\" does not match layout {:?}",
                    text,
                    format
                );
                return None;
            }
        };
        let days = self.to_days(year, month, day)?;
        self.by_text
            .write()
            .entry(format)
            .or_default()
            .insert(text.to_owned(), days);
        Some(days)
    }

    /// Detect the layout of `text` and parse it.
    pub fn parse_any(&self, text: &str) -> Option<Day> {
        match DateFormat::detect(text) {
            Some(format) => self.parse(text, format),
            None => {
                event!(Level::WARN, "unrecognised date layout \"{}\"", text.trim());
                None
            }
        }
    }

    /// Convert a day count back to a calendar date.
    pub fn from_days(&self, days: Day) -> Option<CalendarDate> {
        if let Some(date) = self.by_day.read().get(&days) {
            return Some(*date);
        }
        if days < 1 || days > self.last_day() {
            event!(Level::WARN, "day count {} is out of range", days);
            return None;
        }
        // index of the last year starting before `days`
        let idx = self.year_starts.partition_point(|&start| start < days) - 1;
        let year = self.epoch_year + idx as i32;
        let leap = is_leap_year(year);
        let day_of_year = days - self.year_starts[idx];
        let month_start = |month: usize| {
            CUMULATIVE_MONTH_DAYS[month] + if leap && month >= 2 { 1 } else { 0 }
        };
        let month = (0..12)
            .rev()
            .find(|&month| month_start(month) < day_of_year)
            .unwrap_or(0);
        let date = CalendarDate::new(
            year,
            month as u32 + 1,
            (day_of_year - month_start(month)) as u32,
        );
        self.remember(date, days);
        Some(date)
    }

    pub fn from_naive(&self, date: NaiveDate) -> Option<Day> {
        self.to_days(date.year(), date.month(), date.day())
    }

    /// The same calendar day `years` years later (or earlier). The 29th of February maps to the
    /// 28th in non-leap years.
    pub fn add_years(&self, days: Day, years: i32) -> Option<Day> {
        let date = self.from_days(days)?;
        let year = date.year + years;
        let day = date.day.min(days_in_month(year, date.month));
        self.to_days(year, date.month, day)
    }

    /// Completed years between `birth` and `at`.
    pub fn age_in_years(&self, birth: Day, at: Day) -> Option<i32> {
        let birth = self.from_days(birth)?;
        let at = self.from_days(at)?;
        let mut age = at.year - birth.year;
        if (at.month, at.day) < (birth.month, birth.day) {
            age -= 1;
        }
        Some(age)
    }

    fn remember(&self, date: CalendarDate, days: Day) {
        self.by_date.write().insert(date, days);
        self.by_day.write().insert(days, date);
    }
}

impl fmt::Debug for DateCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DateCache")
            .field("epoch_year", &self.epoch_year)
            .field("max_year", &self.max_year)
            .field("cached", &self.by_day.read().len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{is_leap_year, CalendarDate, DateCache, DateFormat};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn cache() -> DateCache {
        DateCache::new(1900, 2100).unwrap()
    }

    #[rstest]
    #[case(1900, false)]
    #[case(2000, true)]
    #[case(2024, true)]
    #[case(2023, false)]
    #[case(2100, false)]
    fn leap_years(#[case] year: i32, #[case] leap: bool) {
        assert_eq!(is_leap_year(year), leap);
    }

    #[test]
    fn epoch_is_day_one() {
        let dates = cache();
        assert_eq!(dates.to_days(1900, 1, 1), Some(1));
        assert_eq!(dates.to_days(1900, 12, 31), Some(365));
        assert_eq!(dates.to_days(1901, 1, 1), Some(366));
    }

    #[test]
    fn round_trip_and_strictly_increasing() {
        let dates = cache();
        let mut last = 0;
        for year in [1900, 1999, 2000, 2001, 2024, 2100] {
            for month in 1..=12 {
                for day in 1..=super::days_in_month(year, month) {
                    let days = dates.to_days(year, month, day).unwrap();
                    assert!(days > last, "{}-{}-{} not increasing", year, month, day);
                    last = days;
                    assert_eq!(
                        dates.from_days(days),
                        Some(CalendarDate::new(year, month, day))
                    );
                }
            }
        }
    }

    #[test]
    fn every_day_round_trips() {
        let dates = DateCache::new(1995, 2005).unwrap();
        for days in 1..=dates.last_day() {
            let date = dates.from_days(days).unwrap();
            assert_eq!(dates.to_days(date.year, date.month, date.day), Some(days));
        }
    }

    #[test]
    fn leap_day_adds_one_step() {
        let dates = cache();
        let leap = dates.to_days(2000, 3, 1).unwrap() - dates.to_days(2000, 2, 28).unwrap();
        let plain = dates.to_days(2001, 3, 1).unwrap() - dates.to_days(2001, 2, 28).unwrap();
        assert_eq!(leap, 2);
        assert_eq!(plain, 1);
    }

    #[test]
    fn agrees_with_chrono() {
        let dates = cache();
        let base = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
        for (y, m, d) in [(1904, 2, 29), (1950, 7, 4), (2000, 2, 29), (2021, 11, 17)] {
            let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
            let expected = (date - base).num_days() as i32 + 1;
            assert_eq!(dates.from_naive(date), Some(expected));
        }
    }

    #[test]
    fn rejects_incoherent_dates() {
        let dates = cache();
        assert_eq!(dates.to_days(2001, 2, 29), None);
        assert_eq!(dates.to_days(1900, 2, 29), None);
        assert_eq!(dates.to_days(2001, 4, 31), None);
        assert_eq!(dates.to_days(2001, 6, 31), None);
        assert_eq!(dates.to_days(2001, 9, 31), None);
        assert_eq!(dates.to_days(2001, 11, 31), None);
        assert_eq!(dates.to_days(2001, 13, 1), None);
        assert_eq!(dates.to_days(2001, 1, 0), None);
        assert_eq!(dates.to_days(1899, 12, 31), None);
        assert_eq!(dates.to_days(2101, 1, 1), None);
        assert!(dates.to_days(2000, 2, 29).is_some());
        assert_eq!(dates.from_days(0), None);
        assert_eq!(dates.from_days(dates.last_day() + 1), None);
    }

    #[rstest]
    #[case("2021-11-17", DateFormat::YearMonthDay)]
    #[case("2021/11/17", DateFormat::YearMonthDay)]
    #[case("17-11-2021", DateFormat::DayMonthYear)]
    #[case("17.11.2021", DateFormat::DayMonthYear)]
    #[case("20211117", DateFormat::CompactYearMonthDay)]
    #[case("17112021", DateFormat::CompactDayMonthYear)]
    fn detects_layouts(#[case] text: &str, #[case] format: DateFormat) {
        assert_eq!(DateFormat::detect(text), Some(format));
        let dates = cache();
        assert_eq!(dates.parse(text, format), dates.to_days(2021, 11, 17));
    }

    #[test]
    fn conversions_are_remembered_both_ways() {
        let dates = cache();
        assert!(format!("{:?}", dates).contains("cached: 0"));
        let leap_day = dates.to_days(2000, 2, 29).unwrap();
        let parsed = dates.parse("2021-11-17", DateFormat::YearMonthDay).unwrap();
        let new_year = dates.to_days(1950, 1, 1).unwrap();
        assert!(format!("{:?}", dates).contains("cached: 3"));

        for (days, date) in [
            (leap_day, CalendarDate::new(2000, 2, 29)),
            (parsed, CalendarDate::new(2021, 11, 17)),
            (new_year, CalendarDate::new(1950, 1, 1)),
        ] {
            assert_eq!(dates.by_day.read().get(&days), Some(&date));
            assert_eq!(dates.by_date.read().get(&date), Some(&days));
            assert_eq!(dates.from_days(days), Some(date));
        }
        assert_eq!(
            dates.by_text.read()[&DateFormat::YearMonthDay].get("2021-11-17"),
            Some(&parsed)
        );
        // converting back again adds nothing, and failures are never stored
        assert_eq!(dates.to_days(2001, 2, 29), None);
        assert!(format!("{:?}", dates).contains("cached: 3"));
    }

    #[test]
    fn parse_failures_are_none() {
        let dates = cache();
        assert_eq!(DateFormat::detect("yesterday"), None);
        assert_eq!(dates.parse_any("yesterday"), None);
        assert_eq!(dates.parse("2021-02-30", DateFormat::YearMonthDay), None);
        assert_eq!(dates.parse("2021-11-17", DateFormat::DayMonthYear), None);
        // cached answers are stable
        assert_eq!(
            dates.parse(" 2021-11-17 ", DateFormat::YearMonthDay),
            dates.parse("2021-11-17", DateFormat::YearMonthDay)
        );
    }

    #[test]
    fn years_and_ages() {
        let dates = cache();
        let birth = dates.to_days(2000, 2, 29).unwrap();
        assert_eq!(dates.add_years(birth, 1), dates.to_days(2001, 2, 28));
        assert_eq!(dates.add_years(birth, 4), dates.to_days(2004, 2, 29));
        let birth = dates.to_days(1980, 6, 15).unwrap();
        assert_eq!(dates.age_in_years(birth, dates.to_days(2020, 6, 14).unwrap()), Some(39));
        assert_eq!(dates.age_in_years(birth, dates.to_days(2020, 6, 15).unwrap()), Some(40));
    }
}
