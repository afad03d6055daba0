//! Window based feature extractors.
//!
//! Each extractor reads one item (see [`crate::items`]) and one record stream of a patient. The
//! stream is checked to be in date order first, and an [`ExtractError::Unsorted`] is returned if
//! it is not.
use crate::{
    bag::{KeyValue, MultiKey, MultiKeyBag},
    error::ExtractError,
    items::{Item, ItemList},
    window::{Window, WindowSpec},
    Day, Event, Measurement, Patient, Prescription,
};
use noisy_float::prelude::*;
use qu::ick_use::*;
use rayon::prelude::*;

fn window(index: Day, spec: WindowSpec) -> Window {
    let start = spec
        .start
        .map(|anchor| index.saturating_add(anchor.offset))
        .unwrap_or(Window::UNBOUNDED_START);
    let end = spec
        .end
        .map(|anchor| index.saturating_add(anchor.offset))
        .unwrap_or(Window::UNBOUNDED_END);
    Window::new(start, end)
}

fn matching_events<'p>(
    patient: &'p Patient,
    item: &'p Item,
) -> Result<impl Iterator<Item = &'p Event>, ExtractError> {
    patient.check_events_sorted()?;
    Ok(patient
        .events
        .iter()
        .filter(move |evt| item.codes.matches(&evt.code)))
}

fn matching_prescriptions<'p>(
    patient: &'p Patient,
    item: &'p Item,
    index: Day,
) -> Result<impl Iterator<Item = &'p Prescription>, ExtractError> {
    patient.check_prescriptions_sorted()?;
    let window = window(index, item.window()?);
    let open_end = patient.population_end;
    Ok(patient.prescriptions.iter().filter(move |rx| {
        item.atc.matches(&rx.atc) && window.overlaps(rx.start, rx.end_or(open_end))
    }))
}

/// Whether the patient has any event of the item in the window.
pub fn comorbidity(patient: &Patient, index: Day, item: &Item) -> Result<bool, ExtractError> {
    Ok(event_count(patient, index, item)? > 0)
}

/// Whether any prescription of the item overlaps the window. Running prescriptions last until
/// the end of the population period.
pub fn prescription_flag(
    patient: &Patient,
    index: Day,
    item: &Item,
) -> Result<bool, ExtractError> {
    Ok(matching_prescriptions(patient, item, index)?.next().is_some())
}

pub fn event_count(patient: &Patient, index: Day, item: &Item) -> Result<usize, ExtractError> {
    let window = window(index, item.window()?);
    Ok(matching_events(patient, item)?
        .filter(|evt| window.contains(evt.date))
        .count())
}

/// The number of prescriptions of the item overlapping the window.
pub fn prescription_count(
    patient: &Patient,
    index: Day,
    item: &Item,
) -> Result<usize, ExtractError> {
    Ok(matching_prescriptions(patient, item, index)?.count())
}

/// How to pick one measurement out of those in the window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Closest to the index date on either side. Equally close measurements keep the earlier.
    Nearest,
    First,
    Last,
    /// Every matched value must be numeric.
    Highest,
    /// Every matched value must be numeric.
    Lowest,
}

/// Pick a measurement of the item in the window.
pub fn select_measurement<'p>(
    patient: &'p Patient,
    index: Day,
    item: &Item,
    selection: Selection,
) -> Result<Option<&'p Measurement>, ExtractError> {
    patient.check_measurements_sorted()?;
    let window = window(index, item.window()?);
    let mut matched = patient.measurements.iter().filter(|m| {
        item.codes.matches(&m.code) && item.accepts_value(&m.value) && window.contains(m.date)
    });
    let numeric = |m: &Measurement| {
        m.numeric_value().ok_or_else(|| ExtractError::NonNumeric {
            patient_id: patient.patient_id.to_string(),
            code: m.code.to_string(),
            value: m.value.to_string(),
        })
    };
    Ok(match selection {
        Selection::First => matched.next(),
        Selection::Last => matched.last(),
        Selection::Nearest => {
            let mut best: Option<(i64, &Measurement)> = None;
            for m in matched {
                let distance = (m.date as i64 - index as i64).abs();
                if best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, m));
                }
            }
            best.map(|(_, m)| m)
        }
        Selection::Highest | Selection::Lowest => {
            let mut best: Option<(f64, &Measurement)> = None;
            for m in matched {
                let value = numeric(m)?;
                let better = match (selection, best) {
                    (_, None) => true,
                    (Selection::Highest, Some((b, _))) => value > b,
                    (_, Some((b, _))) => value < b,
                };
                if better {
                    best = Some((value, m));
                }
            }
            best.map(|(_, m)| m)
        }
    })
}

/// Days from the index date to the first event of the item after it, if there is one within the
/// horizon (inclusive).
pub fn time_to_next_event(
    patient: &Patient,
    index: Day,
    item: &Item,
) -> Result<Option<i32>, ExtractError> {
    let horizon = item.horizon()?;
    Ok(matching_events(patient, item)?
        .find(|evt| evt.date > index)
        .map(|evt| evt.date - index)
        .filter(|days| horizon.map_or(true, |h| *days <= h)))
}

/// Days from the last event of the item before the index date to the index date, if there is one
/// within the horizon (inclusive).
pub fn time_since_previous_event(
    patient: &Patient,
    index: Day,
    item: &Item,
) -> Result<Option<i32>, ExtractError> {
    let horizon = item.horizon()?;
    Ok(matching_events(patient, item)?
        .take_while(|evt| evt.date < index)
        .last()
        .map(|evt| index - evt.date)
        .filter(|days| horizon.map_or(true, |h| *days <= h)))
}

/// An extractor, applied to every item of a list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Feature {
    Comorbidity,
    PrescriptionFlag,
    EventCount,
    PrescriptionCount,
    Measurement(Selection),
    TimeToNextEvent,
    TimeSincePreviousEvent,
}

impl Feature {
    /// The value of the feature for one item, or `None` when there is nothing to report (no
    /// measurement, or no event within the horizon).
    pub fn value(
        self,
        patient: &Patient,
        index: Day,
        item: &Item,
    ) -> Result<Option<KeyValue>, ExtractError> {
        let flag = |present: bool| KeyValue::Int(present as i64);
        Ok(match self {
            Feature::Comorbidity => Some(flag(comorbidity(patient, index, item)?)),
            Feature::PrescriptionFlag => Some(flag(prescription_flag(patient, index, item)?)),
            Feature::EventCount => Some(KeyValue::Int(event_count(patient, index, item)? as i64)),
            Feature::PrescriptionCount => Some(KeyValue::Int(
                prescription_count(patient, index, item)? as i64,
            )),
            Feature::Measurement(selection) => select_measurement(patient, index, item, selection)?
                .map(|m| match m.numeric_value() {
                    Some(v) => KeyValue::Double(r64(v)),
                    None => KeyValue::from(m.value.trim()),
                }),
            Feature::TimeToNextEvent => time_to_next_event(patient, index, item)?
                .map(|days| KeyValue::Int(days.into())),
            Feature::TimeSincePreviousEvent => time_since_previous_event(patient, index, item)?
                .map(|days| KeyValue::Int(days.into())),
        })
    }
}

/// A feature over a list of items.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub feature: Feature,
    pub items: ItemList,
}

impl FeatureSet {
    pub fn new(feature: Feature, items: ItemList) -> Self {
        Self { feature, items }
    }

    /// Count the features of one patient into `bag`, under keys `strata ++ [label, value]`.
    ///
    /// Items with no value are skipped.
    pub fn extract_into(
        &self,
        patient: &Patient,
        index: Day,
        strata: &[KeyValue],
        bag: &mut MultiKeyBag,
    ) -> Result<(), ExtractError> {
        if !self.items.is_valid() {
            return Err(ExtractError::InvalidDefinitions(
                self.items.diagnostics().len(),
            ));
        }
        for item in self.items.iter() {
            if let Some(value) = self.feature.value(patient, index, item)? {
                let key: MultiKey = strata
                    .iter()
                    .cloned()
                    .chain([KeyValue::from(&item.label), value])
                    .collect();
                bag.add(key)?;
            }
        }
        Ok(())
    }
}

/// Run every feature set over every `(patient, index date)` pair in parallel, and merge the
/// results. `strata` gives the leading key components for a patient, e.g. their sex.
pub fn extract_batch<S>(
    sets: &[FeatureSet],
    subjects: &[(Patient, Day)],
    strata: S,
) -> Result<MultiKeyBag, ExtractError>
where
    S: Fn(&Patient) -> Vec<KeyValue> + Sync + Send,
{
    event!(
        Level::INFO,
        "extracting {} feature sets for {} patients",
        sets.len(),
        subjects.len()
    );
    subjects
        .par_iter()
        .try_fold(MultiKeyBag::new, |mut bag, (patient, index)| {
            let strata = strata(patient);
            for set in sets {
                set.extract_into(patient, *index, &strata, &mut bag)?;
            }
            Ok::<_, ExtractError>(bag)
        })
        .try_reduce(MultiKeyBag::new, |mut left, right| {
            left.merge(&right);
            Ok(left)
        })
}
