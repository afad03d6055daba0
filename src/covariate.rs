//! Covariate definitions and the per-patient values they produce.
//!
//! A definition is one `;`-separated line:
//!
//! ```text
//! domain;codes;label;start ref;start offset;end ref;end offset;value ref;value offset;mode
//! DRUG;C10;statins;INDEX;-365;INDEX;0;;;PRESENT
//! MEASUREMENT;BMI;bmi;INDEX;-730;INDEX;1;INDEX;0;NEARESTBEFOREELSEAFTER
//! ```
//!
//! An empty window offset leaves that side of the window unbounded. The value reference is only
//! used by modes that measure time or distance from a point (`DAYSSINCEUSE`, `NEAREST`, ...).
mod parse;
mod values;

pub use self::values::Records;
pub(crate) use self::parse::{parse_covariate, split_fields};

use crate::{
    codes::{AtcMatcher, CodeSet, MeasurementFilter},
    error::{DefinitionError, ExtractError},
    window::{Anchor, Frame, WindowSpec},
    Anchors, ArcStr, Patient, RunContext,
};
use itertools::Itertools;
use qu::ick_use::*;
use std::{fmt, str::FromStr};

/// The number of fields a covariate definition must have at least.
pub const COVARIATE_FIELDS: usize = 10;

/// The measurement code that selects the fracture risk estimator.
pub const FRACTURE_RISK_CODE: &str = "GARVAN";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Domain {
    Drug,
    Event,
    Measurement,
}

impl FromStr for Domain {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_uppercase().as_str() {
            "DRUG" | "ATC" | "PRESCRIPTION" => Ok(Domain::Drug),
            "EVENT" => Ok(Domain::Event),
            "MEASUREMENT" | "LAB" => Ok(Domain::Measurement),
            _ => Err(format_err!("unknown domain \"{}\"", input.trim())),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Domain::Drug => f.write_str("DRUG"),
            Domain::Event => f.write_str("EVENT"),
            Domain::Measurement => f.write_str("MEASUREMENT"),
        }
    }
}

/// What a covariate matches and how it turns the matches into a value.
///
/// Modes that measure from a point in time carry the anchor of that point.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Drug { atc: AtcMatcher, mode: DrugMode },
    Event { codes: CodeSet, mode: EventMode },
    Measurement {
        filter: MeasurementFilter,
        mode: MeasurementMode,
    },
    /// Absolute fracture risk at the anchor, see [`crate::fracture_risk`].
    FractureRisk { at: Anchor },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrugMode {
    Count,
    Present,
    DistinctCodes,
    DaysOfUse,
    DaysSinceStart(Anchor),
    DaysSinceUse(Anchor),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventMode {
    Count,
    Present,
    Incident,
    TimeToIncident(Anchor),
    TimeSinceFirst(Anchor),
    TimeSinceLast(Anchor),
    AgeAtFirst(Anchor),
    AgeAtLast(Anchor),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeasurementMode {
    Count,
    Present,
    NumericCount,
    Nearest(Anchor),
    NearestBefore(Anchor),
    NearestAfter(Anchor),
    NearestBeforeElseAfter(Anchor),
    Highest,
    Lowest,
    Average,
}

impl DrugMode {
    pub fn code(&self) -> &'static str {
        use DrugMode::*;
        match self {
            Count => "COUNT",
            Present => "PRESENT",
            DistinctCodes => "DISTINCTCODES",
            DaysOfUse => "DAYSOFUSE",
            DaysSinceStart(_) => "DAYSSINCESTART",
            DaysSinceUse(_) => "DAYSSINCEUSE",
        }
    }
}

impl EventMode {
    pub fn code(&self) -> &'static str {
        use EventMode::*;
        match self {
            Count => "COUNT",
            Present => "PRESENT",
            Incident => "INCIDENT",
            TimeToIncident(_) => "TIMETOINCIDENT",
            TimeSinceFirst(_) => "TIMESINCEFIRST",
            TimeSinceLast(_) => "TIMESINCELAST",
            AgeAtFirst(_) => "AGEATFIRST",
            AgeAtLast(_) => "AGEATLAST",
        }
    }
}

impl MeasurementMode {
    pub fn code(&self) -> &'static str {
        use MeasurementMode::*;
        match self {
            Count => "COUNT",
            Present => "PRESENT",
            NumericCount => "NUMERICCOUNT",
            Nearest(_) => "NEAREST",
            NearestBefore(_) => "NEARESTBEFORE",
            NearestAfter(_) => "NEARESTAFTER",
            NearestBeforeElseAfter(_) => "NEARESTBEFOREELSEAFTER",
            Highest => "HIGHEST",
            Lowest => "LOWEST",
            Average => "AVERAGE",
        }
    }
}

impl Target {
    pub fn domain(&self) -> Domain {
        match self {
            Target::Drug { .. } => Domain::Drug,
            Target::Event { .. } => Domain::Event,
            Target::Measurement { .. } | Target::FractureRisk { .. } => Domain::Measurement,
        }
    }

    pub fn mode_code(&self) -> &'static str {
        match self {
            Target::Drug { mode, .. } => mode.code(),
            Target::Event { mode, .. } => mode.code(),
            Target::Measurement { mode, .. } => mode.code(),
            Target::FractureRisk { .. } => "RISK",
        }
    }
}

/// One parsed definition line.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariate {
    /// The line this was parsed from.
    pub definition: String,
    pub label: Option<ArcStr>,
    pub window: WindowSpec,
    pub target: Target,
}

impl Covariate {
    /// Parse a single covariate definition.
    pub fn parse(line: &str) -> Result<Self, DefinitionError> {
        let fields = split_fields(line, COVARIATE_FIELDS);
        if fields.len() < COVARIATE_FIELDS {
            return Err(DefinitionError::new(
                line,
                format!(
                    "expected at least {} fields, found {}",
                    COVARIATE_FIELDS,
                    fields.len()
                ),
            ));
        }
        parse_covariate(&fields, line)
    }

    /// The column title: the label if there is one, otherwise `DOMAIN_CODES_MODE`.
    pub fn title(&self) -> String {
        match &self.label {
            Some(label) => label.to_string(),
            None => self.description(),
        }
    }

    /// An automatic description, e.g. `DRUG_C10_N02_PRESENT`.
    pub fn description(&self) -> String {
        let codes: Vec<String> = match &self.target {
            Target::Drug { atc, .. } => atc.prefixes().iter().map(|c| c.to_string()).collect(),
            Target::Event { codes, .. } => codes.iter().map(|c| c.to_string()).collect(),
            Target::Measurement { filter, .. } => filter
                .to_string()
                .split(',')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
            Target::FractureRisk { .. } => vec![FRACTURE_RISK_CODE.to_string()],
        };
        let codes = if codes.is_empty() {
            "ALL".to_string()
        } else {
            codes.join("_")
        };
        format!(
            "{}_{}_{}",
            self.target.domain(),
            codes,
            self.target.mode_code()
        )
    }

    /// Compute the value of this covariate for one patient.
    pub fn value(&self, records: &Records<'_>, frame: &Frame<'_>, run: &RunContext) -> String {
        values::compute(self, records, frame, run)
    }
}

/// A parsed definition set.
///
/// Parsing never fails outright: bad lines are recorded as diagnostics and mark the whole set
/// invalid. Check [`Covariates::is_valid`] before use; [`Covariates::compute_values`] refuses to
/// run on an invalid set.
#[derive(Debug, Clone, Default)]
pub struct Covariates {
    covariates: Vec<Covariate>,
    diagnostics: Vec<DefinitionError>,
}

impl Covariates {
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for line in lines {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            match Covariate::parse(line) {
                Ok(cov) => out.covariates.push(cov),
                Err(e) => {
                    event!(Level::WARN, "{}", e);
                    out.diagnostics.push(e);
                }
            }
        }
        out
    }

    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[DefinitionError] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.covariates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covariates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Covariate> {
        self.covariates.iter()
    }

    /// Comma-joined column titles, in definition order.
    pub fn header(&self) -> String {
        self.covariates.iter().map(Covariate::title).join(",")
    }

    /// Select the records each covariate can match. Do this once per patient and reuse the result
    /// for every index date.
    pub fn prefilter<'p>(&self, patient: &'p Patient) -> Result<Prefiltered<'p>, ExtractError> {
        patient.check_sorted()?;
        Ok(Prefiltered {
            patient_id: patient.patient_id.clone(),
            records: self
                .covariates
                .iter()
                .map(|cov| Records::select(cov, patient))
                .collect(),
        })
    }

    /// One value per covariate, in definition order.
    ///
    /// `prefiltered` must come from [`Covariates::prefilter`] on this set for this patient.
    pub fn compute_values(
        &self,
        patient: &Patient,
        anchors: Anchors,
        prefiltered: &Prefiltered<'_>,
        run: &RunContext,
    ) -> Result<Vec<String>, ExtractError> {
        if !self.is_valid() {
            return Err(ExtractError::InvalidDefinitions(self.diagnostics.len()));
        }
        if prefiltered.patient_id != patient.patient_id
            || prefiltered.records.len() != self.covariates.len()
        {
            return Err(ExtractError::PrefilterMismatch {
                patient_id: patient.patient_id.to_string(),
                prefiltered_for: prefiltered.patient_id.to_string(),
            });
        }
        let frame = Frame::new(patient, anchors, &run.dates);
        Ok(self
            .covariates
            .iter()
            .zip(prefiltered.records.iter())
            .map(|(cov, records)| cov.value(records, &frame, run))
            .collect())
    }

    /// Prefilter and compute in one go, for when a patient has a single index date.
    pub fn values(
        &self,
        patient: &Patient,
        anchors: Anchors,
        run: &RunContext,
    ) -> Result<Vec<String>, ExtractError> {
        let prefiltered = self.prefilter(patient)?;
        self.compute_values(patient, anchors, &prefiltered, run)
    }
}

impl<'a> IntoIterator for &'a Covariates {
    type Item = &'a Covariate;
    type IntoIter = std::slice::Iter<'a, Covariate>;
    fn into_iter(self) -> Self::IntoIter {
        self.covariates.iter()
    }
}

/// A patient's records, split up by the covariate they can match.
#[derive(Debug)]
pub struct Prefiltered<'p> {
    patient_id: ArcStr,
    records: Vec<Records<'p>>,
}

impl<'p> Prefiltered<'p> {
    pub fn records(&self) -> &[Records<'p>] {
        &self.records
    }
}
