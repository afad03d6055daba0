//! Exclusion criteria: covariate definitions with a threshold test on the computed value.
//!
//! Each line is a covariate definition with two more fields:
//!
//! - `...;=;current` excludes when the value is `current`
//! - `...;<>;0` excludes when the value is anything but `0`
//! - `...;18;65` excludes when the value is a number between 18 and 65 inclusive. Either side
//!   may be left empty to leave the range open.
use crate::{
    covariate::{parse_covariate, split_fields, Covariate, Records},
    error::{DefinitionError, ExtractError},
    window::Frame,
    Anchors, ArcStr, Patient, RunContext,
};
use qu::ick_use::*;
use std::fmt;

/// The number of fields an exclusion definition must have.
pub const EXCLUSION_FIELDS: usize = 12;

/// When a computed value excludes a patient.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Equals(ArcStr),
    NotEquals(ArcStr),
    /// Inclusive. Empty and non-numeric values are never in range.
    Range { min: Option<f64>, max: Option<f64> },
}

impl Rule {
    fn parse(first: &str, second: &str) -> Result<Self, String> {
        match first {
            "=" => return Ok(Rule::Equals(second.into())),
            "<>" => return Ok(Rule::NotEquals(second.into())),
            _ => (),
        }
        let bound = |field: &str| -> Result<Option<f64>, String> {
            if field.is_empty() {
                return Ok(None);
            }
            match field.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(v)),
                _ => Err(format!("threshold \"{}\" is not a number", field)),
            }
        };
        let (min, max) = (bound(first)?, bound(second)?);
        if min.is_none() && max.is_none() {
            return Err("both thresholds are empty".into());
        }
        Ok(Rule::Range { min, max })
    }

    pub fn excludes(&self, value: &str) -> bool {
        match self {
            Rule::Equals(expected) => value == &**expected,
            Rule::NotEquals(expected) => value != &**expected,
            Rule::Range { min, max } => match value.trim().parse::<f64>() {
                Ok(v) if !v.is_nan() => {
                    min.map_or(true, |min| v >= min) && max.map_or(true, |max| v <= max)
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rule::Equals(v) => write!(f, "= \"{}\"", v),
            Rule::NotEquals(v) => write!(f, "<> \"{}\"", v),
            Rule::Range {
                min: Some(min),
                max: Some(max),
            } => write!(f, "{} - {}", min, max),
            Rule::Range { min: Some(min), .. } => write!(f, ">= {}", min),
            Rule::Range { max: Some(max), .. } => write!(f, "<= {}", max),
            Rule::Range { .. } => f.write_str("never"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub covariate: Covariate,
    pub rule: Rule,
}

impl Criterion {
    pub fn parse(line: &str) -> Result<Self, DefinitionError> {
        let fields = split_fields(line, EXCLUSION_FIELDS);
        if fields.len() != EXCLUSION_FIELDS {
            return Err(DefinitionError::new(
                line,
                format!(
                    "expected {} fields, found {}",
                    EXCLUSION_FIELDS,
                    fields.len()
                ),
            ));
        }
        let covariate = parse_covariate(&fields[..10], line)?;
        let rule = Rule::parse(fields[10], fields[11])
            .map_err(|message| DefinitionError::new(line, message))?;
        Ok(Self { covariate, rule })
    }
}

/// A parsed set of exclusion criteria, evaluated in definition order.
#[derive(Debug, Clone, Default)]
pub struct ExclusionCriteria {
    criteria: Vec<Criterion>,
    diagnostics: Vec<DefinitionError>,
}

impl ExclusionCriteria {
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for line in lines {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            match Criterion::parse(line) {
                Ok(criterion) => out.criteria.push(criterion),
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
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Criterion> {
        self.criteria.iter()
    }

    /// Whether any criterion excludes the patient. Stops at the first that does.
    pub fn exclude(
        &self,
        patient: &Patient,
        anchors: Anchors,
        run: &RunContext,
    ) -> Result<bool, ExtractError> {
        Ok(self.first_exclusion(patient, anchors, run)?.is_some())
    }

    /// The position of the first criterion that excludes the patient.
    pub fn first_exclusion(
        &self,
        patient: &Patient,
        anchors: Anchors,
        run: &RunContext,
    ) -> Result<Option<usize>, ExtractError> {
        if !self.is_valid() {
            return Err(ExtractError::InvalidDefinitions(self.diagnostics.len()));
        }
        patient.check_sorted()?;
        let frame = Frame::new(patient, anchors, &run.dates);
        for (idx, criterion) in self.criteria.iter().enumerate() {
            let records = Records::select(&criterion.covariate, patient);
            let value = criterion.covariate.value(&records, &frame, run);
            if criterion.rule.excludes(&value) {
                event!(
                    Level::DEBUG,
                    "patient {} excluded by \"{}\" (value \"{}\", rule {})",
                    patient.patient_id,
                    criterion.covariate.definition,
                    value,
                    criterion.rule
                );
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }
}
