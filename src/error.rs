//! Error types for definition parsing, extraction and aggregation.
//!
//! Date conversion failures are not represented here: they are logged and surface as `None`, so
//! one bad record never aborts a pass over a dataset.
use crate::Day;
use std::fmt;
use thiserror::Error;

/// A problem with one definition line.
///
/// These are collected while parsing rather than returned eagerly, so that every bad line in a
/// definition file is reported in one go.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} in definition \"{definition}\"")]
pub struct DefinitionError {
    /// The offending line, verbatim.
    pub definition: String,
    pub message: String,
}

impl DefinitionError {
    pub fn new(definition: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            message: message.into(),
        }
    }
}

/// Which record stream of a patient an error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stream {
    Events,
    Prescriptions,
    Measurements,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stream::Events => f.write_str("events"),
            Stream::Prescriptions => f.write_str("prescriptions"),
            Stream::Measurements => f.write_str("measurements"),
        }
    }
}

/// Failures while computing values for a patient.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    /// A record stream was not in non-decreasing date order. This is a precondition violation
    /// upstream and is never recovered from.
    #[error("{stream} of patient {patient_id} are not sorted by date: record {position} ({date}) comes before an earlier date")]
    Unsorted {
        patient_id: String,
        stream: Stream,
        position: usize,
        date: Day,
    },

    /// An extractor that needs every matched value to be numeric found one that isn't.
    #[error("measurement {code} of patient {patient_id} has non-numeric value \"{value}\"")]
    NonNumeric {
        patient_id: String,
        code: String,
        value: String,
    },

    /// The definition set had errors and must not be used.
    #[error("definitions are invalid ({0} errors), refusing to compute values")]
    InvalidDefinitions(usize),

    /// Records prefiltered for another patient or another definition set.
    #[error("records prefiltered for patient {prefiltered_for} do not fit patient {patient_id} and these definitions")]
    PrefilterMismatch {
        patient_id: String,
        prefiltered_for: String,
    },

    /// An item parameter couldn't be interpreted by the extractor consuming it.
    #[error("item \"{item}\": parameter {index} (\"{value}\") {message}")]
    Parameter {
        item: String,
        index: usize,
        value: String,
        message: &'static str,
    },

    #[error(transparent)]
    Bag(#[from] BagError),
}

/// Misuse of a [`MultiKeyBag`](crate::bag::MultiKeyBag).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BagError {
    #[error("keys may have at most {max} components, found {found}")]
    TooManyComponents { max: usize, found: usize },

    /// Histograms need exactly one free component, see
    /// [`MultiKeyBag::histogram`](crate::bag::MultiKeyBag::histogram).
    #[error("histogram key must have {expected} components (or {arity} ending in a wildcard), found {found}")]
    HistogramShape {
        expected: usize,
        arity: usize,
        found: usize,
    },

    #[error("histogram value \"{0}\" is not numeric")]
    NonNumeric(String),
}
