//! Time windows relative to per-patient reference points.
use crate::{dates::DateCache, Anchors, Day, Patient};
use qu::ick_use::*;
use std::{cmp, fmt, str::FromStr};

/// A named point in a patient's timeline that offsets are measured from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Index,
    PopulationStart,
    PopulationEnd,
    CohortStart,
    CohortEnd,
    /// The patient's birthday; the offset is an age in years rather than a number of days.
    Age,
}

impl Reference {
    pub fn code(self) -> &'static str {
        use Reference::*;
        match self {
            Index => "INDEX",
            PopulationStart => "POPULATIONSTART",
            PopulationEnd => "POPULATIONEND",
            CohortStart => "COHORTSTART",
            CohortEnd => "COHORTEND",
            Age => "AGE",
        }
    }
}

impl FromStr for Reference {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        use Reference::*;
        let normalized: String = input
            .chars()
            .filter(|ch| !matches!(ch, '_' | ' ' | '-'))
            .map(|ch| ch.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            // an empty reference means the index date
            "" | "INDEX" | "INDEXDATE" => Ok(Index),
            "POPULATIONSTART" => Ok(PopulationStart),
            "POPULATIONEND" => Ok(PopulationEnd),
            "COHORTSTART" => Ok(CohortStart),
            "COHORTEND" => Ok(CohortEnd),
            "AGE" => Ok(Age),
            _ => Err(format_err!("unknown reference point \"{}\"", input.trim())),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A reference point plus an offset (days, or years for [`Reference::Age`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Anchor {
    pub reference: Reference,
    pub offset: i32,
}

impl Anchor {
    pub fn new(reference: Reference, offset: i32) -> Self {
        Self { reference, offset }
    }

    pub fn index(offset: i32) -> Self {
        Self::new(Reference::Index, offset)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.offset < 0 {
            write!(f, "{}{}", self.reference, self.offset)
        } else {
            write!(f, "{}+{}", self.reference, self.offset)
        }
    }
}

/// Unresolved window bounds. A missing bound is unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct WindowSpec {
    pub start: Option<Anchor>,
    pub end: Option<Anchor>,
}

impl WindowSpec {
    pub fn new(start: Option<Anchor>, end: Option<Anchor>) -> Self {
        Self { start, end }
    }

    /// A window with both bounds (if present) given as offsets from the index date.
    pub fn around_index(start: Option<i32>, end: Option<i32>) -> Self {
        Self::new(start.map(Anchor::index), end.map(Anchor::index))
    }
}

/// A resolved window. The start is inclusive, the end is exclusive.
///
/// Unbounded sides use [`Window::UNBOUNDED_START`] and [`Window::UNBOUNDED_END`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Window {
    start: Day,
    end: Day,
}

impl Window {
    pub const UNBOUNDED_START: Day = Day::MIN;
    pub const UNBOUNDED_END: Day = Day::MAX;

    /// A window whose end is not after its start is empty.
    pub fn new(start: Day, end: Day) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::new(Self::UNBOUNDED_START, Self::UNBOUNDED_END)
    }

    pub fn start(&self) -> Day {
        self.start
    }

    pub fn end(&self) -> Day {
        self.end
    }

    pub fn has_start(&self) -> bool {
        self.start != Self::UNBOUNDED_START
    }

    pub fn has_end(&self) -> bool {
        self.end != Self::UNBOUNDED_END
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, day: Day) -> bool {
        day >= self.start && day < self.end
    }

    /// Whether the half-open interval `[start, end)` shares at least one day with the window.
    pub fn overlaps(&self, start: Day, end: Day) -> bool {
        start < self.end && end > self.start && start < end
    }

    /// Number of days `[start, end)` shares with the window, never negative.
    pub fn overlap_days(&self, start: Day, end: Day) -> i64 {
        let from = cmp::max(start, self.start) as i64;
        let to = cmp::min(end, self.end) as i64;
        cmp::max(to - from, 0)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.has_start(), self.has_end()) {
            (true, true) => write!(f, "{} - {}", self.start, self.end),
            (true, false) => write!(f, "{}+", self.start),
            (false, true) => write!(f, "-{}", self.end),
            (false, false) => f.write_str("all time"),
        }
    }
}

/// Everything needed to turn an [`Anchor`] into a [`Day`] for one patient.
#[derive(Debug, Copy, Clone)]
pub struct Frame<'a> {
    pub patient: &'a Patient,
    pub anchors: Anchors,
    pub dates: &'a DateCache,
}

impl<'a> Frame<'a> {
    pub fn new(patient: &'a Patient, anchors: Anchors, dates: &'a DateCache) -> Self {
        Self {
            patient,
            anchors,
            dates,
        }
    }

    pub fn resolve(&self, anchor: Anchor) -> Day {
        use Reference::*;
        let offset = anchor.offset;
        match anchor.reference {
            Index => self.anchors.index.saturating_add(offset),
            PopulationStart => self.patient.population_start.saturating_add(offset),
            PopulationEnd => self.patient.population_end.saturating_add(offset),
            CohortStart => self.anchors.cohort_start.saturating_add(offset),
            CohortEnd => self.anchors.cohort_end.saturating_add(offset),
            Age => match self.dates.add_years(self.patient.birth_date, offset) {
                Some(day) => day,
                // outside the calendar range, so approximate
                None => self
                    .patient
                    .birth_date
                    .saturating_add((offset as f64 * 365.25).round() as Day),
            },
        }
    }

    pub fn window(&self, spec: &WindowSpec) -> Window {
        let start = spec
            .start
            .map(|anchor| self.resolve(anchor))
            .unwrap_or(Window::UNBOUNDED_START);
        let end = spec
            .end
            .map(|anchor| self.resolve(anchor))
            .unwrap_or(Window::UNBOUNDED_END);
        Window::new(start, end)
    }
}

#[cfg(test)]
mod test {
    use super::{Anchor, Frame, Reference, Window, WindowSpec};
    use crate::test_util::{patient, run};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_references() {
        assert_eq!("".parse::<Reference>().unwrap(), Reference::Index);
        assert_eq!("Index".parse::<Reference>().unwrap(), Reference::Index);
        assert_eq!(
            "cohort_start".parse::<Reference>().unwrap(),
            Reference::CohortStart
        );
        assert_eq!(
            "Population End".parse::<Reference>().unwrap(),
            Reference::PopulationEnd
        );
        assert_eq!("age".parse::<Reference>().unwrap(), Reference::Age);
        assert!("yesterday".parse::<Reference>().is_err());
    }

    #[test]
    fn resolves_each_reference() {
        let run = run();
        let patient = patient(&run);
        let index = run.dates.to_days(2010, 6, 1).unwrap();
        let frame = Frame::new(&patient, patient.anchors(index), &run.dates);

        assert_eq!(frame.resolve(Anchor::index(-30)), index - 30);
        assert_eq!(
            frame.resolve(Anchor::new(Reference::PopulationStart, 0)),
            patient.population_start
        );
        assert_eq!(
            frame.resolve(Anchor::new(Reference::PopulationEnd, -1)),
            patient.population_end - 1
        );
        assert_eq!(
            frame.resolve(Anchor::new(Reference::CohortStart, 10)),
            patient.cohort_start + 10
        );
        assert_eq!(
            frame.resolve(Anchor::new(Reference::CohortEnd, 0)),
            patient.cohort_end
        );
        assert_eq!(
            frame.resolve(Anchor::new(Reference::Age, 50)),
            run.dates.to_days(2010, 1, 1).unwrap()
        );
    }

    #[test]
    fn missing_bounds_are_unbounded() {
        let run = run();
        let patient = patient(&run);
        let frame = Frame::new(&patient, patient.anchors(1000), &run.dates);

        let window = frame.window(&WindowSpec::around_index(None, Some(0)));
        assert!(!window.has_start());
        assert_eq!(window.end(), 1000);
        assert!(window.contains(-5_000_000));
        assert!(!window.contains(1000));

        let window = frame.window(&WindowSpec::default());
        assert_eq!(window, Window::unbounded());
        assert_eq!(window.to_string(), "all time");
    }

    #[test]
    fn half_open_overlaps() {
        let window = Window::new(70, 100);
        assert!(window.contains(70));
        assert!(window.contains(99));
        assert!(!window.contains(100));
        assert!(window.overlaps(90, 105));
        assert!(!window.overlaps(100, 120));
        assert!(!window.overlaps(50, 70));
        assert_eq!(window.overlap_days(90, 105), 10);
        assert_eq!(window.overlap_days(60, 80), 10);
        assert_eq!(window.overlap_days(120, 130), 0);
        assert_eq!(Window::unbounded().overlap_days(10, 20), 10);
        assert_eq!(window.to_string(), "70 - 100");
    }
}
