pub mod bag;
pub mod codes;
pub mod config;
pub mod covariate;
pub mod dates;
pub mod error;
pub mod exclusion;
pub mod extract;
pub mod fracture_risk;
pub mod items;
mod util;
pub mod window;

pub use anyhow::{Context, Error};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub use crate::{
    bag::{Histogram, HistogramStats, KeyPart, KeyPattern, KeyValue, MultiKey, MultiKeyBag},
    config::Config,
    covariate::{Covariate, Covariates, Prefiltered},
    dates::{CalendarDate, DateCache, DateFormat},
    error::{BagError, DefinitionError, ExtractError, Stream},
    exclusion::ExclusionCriteria,
    extract::{extract_batch, Feature, FeatureSet, Selection},
    items::{Item, ItemList},
    util::{header, read_lines, statistics_table, ResultExt},
    window::{Anchor, Frame, Reference, Window, WindowSpec},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

/// A date, as a number of days since the configured epoch (see [`dates`]).
pub type Day = i32;

/// Everything a run needs that outlives a single patient: the configuration and the date cache
/// built from it.
///
/// Build one per run and pass it around by reference.
#[derive(Debug)]
pub struct RunContext {
    pub config: Config,
    pub dates: DateCache,
}

impl RunContext {
    pub fn new(config: Config) -> Result<Self> {
        let dates = DateCache::from_config(&config.dates)?;
        Ok(Self { config, dates })
    }
}

/// A patient with their record streams.
///
/// Each stream must be sorted by date (prescriptions by start date). Extraction checks this and
/// fails with [`ExtractError::Unsorted`] rather than computing values from a shuffled record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: ArcStr,
    pub birth_date: Day,
    pub sex: Option<Sex>,
    /// Start of registration in the source population.
    pub population_start: Day,
    /// End of registration in the source population.
    pub population_end: Day,
    pub cohort_start: Day,
    pub cohort_end: Day,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl Patient {
    /// The anchors a patient gets when their own cohort period is used.
    pub fn anchors(&self, index: Day) -> Anchors {
        Anchors {
            index,
            cohort_start: self.cohort_start,
            cohort_end: self.cohort_end,
        }
    }

    pub fn check_events_sorted(&self) -> Result<(), ExtractError> {
        check_sorted(self, Stream::Events, self.events.iter().map(|evt| evt.date))
    }

    pub fn check_prescriptions_sorted(&self) -> Result<(), ExtractError> {
        check_sorted(
            self,
            Stream::Prescriptions,
            self.prescriptions.iter().map(|rx| rx.start),
        )
    }

    pub fn check_measurements_sorted(&self) -> Result<(), ExtractError> {
        check_sorted(
            self,
            Stream::Measurements,
            self.measurements.iter().map(|m| m.date),
        )
    }

    /// Check all three streams.
    pub fn check_sorted(&self) -> Result<(), ExtractError> {
        self.check_events_sorted()?;
        self.check_prescriptions_sorted()?;
        self.check_measurements_sorted()
    }
}

fn check_sorted(
    patient: &Patient,
    stream: Stream,
    dates: impl Iterator<Item = Day>,
) -> Result<(), ExtractError> {
    let mut last = Day::MIN;
    for (position, date) in dates.enumerate() {
        if date < last {
            return Err(ExtractError::Unsorted {
                patient_id: patient.patient_id.to_string(),
                stream,
                position,
                date,
            });
        }
        last = date;
    }
    Ok(())
}

/// The per-patient reference points that are not part of the patient record itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Anchors {
    pub index: Day,
    pub cohort_start: Day,
    pub cohort_end: Day,
}

/// A coded clinical event, e.g. a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub code: ArcStr,
    pub date: Day,
}

/// A drug prescription, coded with an ATC code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub atc: ArcStr,
    pub start: Day,
    /// Exclusive. `None` means the prescription is still running.
    pub end: Option<Day>,
}

impl Prescription {
    /// The end of the prescription, treating running prescriptions as lasting until `open_end`.
    pub fn end_or(&self, open_end: Day) -> Day {
        self.end.unwrap_or(open_end)
    }
}

/// A measurement, e.g. a lab result. The value may be numeric or categorical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub code: ArcStr,
    pub date: Day,
    pub value: ArcStr,
    #[serde(default)]
    pub unit: Option<ArcStr>,
}

impl Measurement {
    /// The value as a number, if it is one.
    pub fn numeric_value(&self) -> Option<f64> {
        let value = self.value.trim().parse::<f64>().ok()?;
        if value.is_finite() {
            Some(value)
        } else {
            event!(
                Level::DEBUG,
                "ignoring non-finite value for measurement {}",
                self.code
            );
            None
        }
    }
}

/// Sex is encoded 'M' or 'F'.
///
/// Ordering is arbitrary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum Sex {
    #[serde(rename = "M", alias = "m")]
    Male,
    #[serde(rename = "F", alias = "f")]
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sex::Male => f.write_str("Male"),
            Sex::Female => f.write_str("Female"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::{ArcStr, Event, Measurement, Patient, Prescription, RunContext, Sex};
    use crate::{Config, Day};

    pub fn run() -> RunContext {
        RunContext::new(Config::default()).unwrap()
    }

    /// A patient born 1960-01-01, registered 1990-2020, with empty streams.
    pub fn patient(run: &RunContext) -> Patient {
        let dates = &run.dates;
        Patient {
            patient_id: "p1".into(),
            birth_date: dates.to_days(1960, 1, 1).unwrap(),
            sex: Some(Sex::Female),
            population_start: dates.to_days(1990, 1, 1).unwrap(),
            population_end: dates.to_days(2020, 1, 1).unwrap(),
            cohort_start: dates.to_days(2000, 1, 1).unwrap(),
            cohort_end: dates.to_days(2015, 1, 1).unwrap(),
            events: vec![],
            prescriptions: vec![],
            measurements: vec![],
        }
    }

    pub fn event(code: &str, date: Day) -> Event {
        Event {
            code: ArcStr::from(code),
            date,
        }
    }

    pub fn rx(atc: &str, start: Day, end: Option<Day>) -> Prescription {
        Prescription {
            atc: atc.into(),
            start,
            end,
        }
    }

    pub fn measurement(code: &str, date: Day, value: &str) -> Measurement {
        Measurement {
            code: code.into(),
            date,
            value: value.into(),
            unit: None,
        }
    }
}
