//! Turning prefiltered records into covariate values.
//!
//! Values are strings: counts and flags are never empty, everything that measures something
//! about a record is empty when there is no record to measure.
use super::{Covariate, DrugMode, EventMode, MeasurementMode, Target};
use crate::{
    fracture_risk::{self, FractureRiskInputs},
    window::{Frame, Window},
    Day, Event, Measurement, Patient, Prescription, RunContext,
};
use std::collections::BTreeSet;

/// The records of a patient that one covariate can match, in stream order.
#[derive(Debug, Clone)]
pub enum Records<'p> {
    Prescriptions(Vec<&'p Prescription>),
    Events(Vec<&'p Event>),
    Measurements(Vec<&'p Measurement>),
}

impl<'p> Records<'p> {
    pub fn select(covariate: &Covariate, patient: &'p Patient) -> Self {
        match &covariate.target {
            Target::Drug { atc, .. } => Records::Prescriptions(
                patient
                    .prescriptions
                    .iter()
                    .filter(|rx| atc.matches(&rx.atc))
                    .collect(),
            ),
            Target::Event { codes, .. } => Records::Events(
                patient
                    .events
                    .iter()
                    .filter(|evt| codes.matches(&evt.code))
                    .collect(),
            ),
            Target::Measurement { filter, .. } => Records::Measurements(
                patient
                    .measurements
                    .iter()
                    .filter(|m| filter.matches(m))
                    .collect(),
            ),
            // the codes come from the run configuration, so filter at computation time
            Target::FractureRisk { .. } => {
                Records::Measurements(patient.measurements.iter().collect())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::Prescriptions(v) => v.len(),
            Records::Events(v) => v.len(),
            Records::Measurements(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prescriptions(&self) -> &[&'p Prescription] {
        match self {
            Records::Prescriptions(v) => v,
            _ => &[],
        }
    }

    fn events(&self) -> &[&'p Event] {
        match self {
            Records::Events(v) => v,
            _ => &[],
        }
    }

    fn measurements(&self) -> &[&'p Measurement] {
        match self {
            Records::Measurements(v) => v,
            _ => &[],
        }
    }
}

pub(super) fn compute(
    covariate: &Covariate,
    records: &Records<'_>,
    frame: &Frame<'_>,
    run: &RunContext,
) -> String {
    let window = frame.window(&covariate.window);
    match &covariate.target {
        Target::Drug { mode, .. } => drug(*mode, records.prescriptions(), window, frame),
        Target::Event { mode, .. } => event(*mode, records.events(), window, frame),
        Target::Measurement { mode, .. } => {
            measurement(*mode, records.measurements(), window, frame)
        }
        Target::FractureRisk { at } => {
            fracture_risk(records.measurements(), window, frame.resolve(*at), frame, run)
        }
    }
}

fn flag(present: bool) -> String {
    let flag = if present { "1" } else { "0" };
    flag.to_string()
}

fn or_empty<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn drug(mode: DrugMode, records: &[&Prescription], window: Window, frame: &Frame<'_>) -> String {
    let open_end = frame.patient.population_end;
    let overlapping = records
        .iter()
        .map(|rx| (*rx, rx.end_or(open_end)))
        .filter(|(rx, end)| window.overlaps(rx.start, *end));
    match mode {
        DrugMode::Count => overlapping.count().to_string(),
        DrugMode::Present => flag(overlapping.count() > 0),
        DrugMode::DistinctCodes => overlapping
            .map(|(rx, _)| &*rx.atc)
            .collect::<BTreeSet<_>>()
            .len()
            .to_string(),
        DrugMode::DaysOfUse => overlapping
            .map(|(rx, end)| window.overlap_days(rx.start, end))
            .sum::<i64>()
            .to_string(),
        DrugMode::DaysSinceStart(anchor) => {
            let at = frame.resolve(anchor) as i64;
            or_empty(overlapping.map(|(rx, _)| at - rx.start as i64).max())
        }
        DrugMode::DaysSinceUse(anchor) => {
            let at = frame.resolve(anchor);
            let mut since: Option<i64> = None;
            for (rx, end) in overlapping {
                if rx.start <= at && at < end {
                    return "0".into();
                }
                if end <= at {
                    let days = at as i64 - end as i64;
                    since = Some(since.map_or(days, |s| s.min(days)));
                }
            }
            or_empty(since)
        }
    }
}

fn event(mode: EventMode, records: &[&Event], window: Window, frame: &Frame<'_>) -> String {
    let in_window = || records.iter().filter(move |evt| window.contains(evt.date));
    // the earliest matched event is first, since streams are sorted
    let incident = || in_window().next().is_some() && records[0].date >= window.start();
    let at_or_before = |at: Day| in_window().filter(move |evt| evt.date <= at);
    let age = |date: Day| frame.dates.age_in_years(frame.patient.birth_date, date);
    match mode {
        EventMode::Count => in_window().count().to_string(),
        EventMode::Present => flag(in_window().next().is_some()),
        EventMode::Incident => flag(incident()),
        EventMode::TimeToIncident(anchor) => {
            if !incident() {
                return String::new();
            }
            let at = frame.resolve(anchor) as i64;
            or_empty(in_window().next().map(|evt| evt.date as i64 - at))
        }
        EventMode::TimeSinceFirst(anchor) => {
            let at = frame.resolve(anchor);
            or_empty(at_or_before(at).next().map(|evt| at as i64 - evt.date as i64))
        }
        EventMode::TimeSinceLast(anchor) => {
            let at = frame.resolve(anchor);
            or_empty(at_or_before(at).last().map(|evt| at as i64 - evt.date as i64))
        }
        EventMode::AgeAtFirst(anchor) => {
            let at = frame.resolve(anchor);
            or_empty(at_or_before(at).next().and_then(|evt| age(evt.date)))
        }
        EventMode::AgeAtLast(anchor) => {
            let at = frame.resolve(anchor);
            or_empty(at_or_before(at).last().and_then(|evt| age(evt.date)))
        }
    }
}

/// Which side of the anchor a nearest measurement may be on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Side {
    Either,
    Before,
    After,
}

/// The measurement closest to `at`. Equally close measurements keep the first in stream order.
fn nearest<'a>(
    records: impl Iterator<Item = &'a Measurement>,
    at: Day,
    side: Side,
) -> Option<&'a Measurement> {
    let mut best: Option<(i64, &Measurement)> = None;
    for m in records {
        let distance = m.date as i64 - at as i64;
        let allowed = match side {
            Side::Either => true,
            Side::Before => distance < 0,
            Side::After => distance > 0,
        };
        if !allowed {
            continue;
        }
        if best.map_or(true, |(d, _)| distance.abs() < d) {
            best = Some((distance.abs(), m));
        }
    }
    best.map(|(_, m)| m)
}

/// Strictly better values replace the current pick, so ties keep the first.
fn extreme<'a>(
    records: impl Iterator<Item = &'a Measurement>,
    better: impl Fn(f64, f64) -> bool,
) -> Option<&'a Measurement> {
    let mut best: Option<(f64, &Measurement)> = None;
    for m in records {
        if let Some(value) = m.numeric_value() {
            if best.map_or(true, |(b, _)| better(value, b)) {
                best = Some((value, m));
            }
        }
    }
    best.map(|(_, m)| m)
}

fn value_of(measurement: Option<&Measurement>) -> String {
    measurement
        .map(|m| m.value.trim().to_string())
        .unwrap_or_default()
}

fn measurement(
    mode: MeasurementMode,
    records: &[&Measurement],
    window: Window,
    frame: &Frame<'_>,
) -> String {
    let in_window = || {
        records
            .iter()
            .copied()
            .filter(move |m| window.contains(m.date))
    };
    match mode {
        MeasurementMode::Count => in_window().count().to_string(),
        MeasurementMode::Present => flag(in_window().next().is_some()),
        MeasurementMode::NumericCount => in_window()
            .filter(|m| m.numeric_value().is_some())
            .count()
            .to_string(),
        MeasurementMode::Nearest(anchor) => {
            value_of(nearest(in_window(), frame.resolve(anchor), Side::Either))
        }
        MeasurementMode::NearestBefore(anchor) => {
            value_of(nearest(in_window(), frame.resolve(anchor), Side::Before))
        }
        MeasurementMode::NearestAfter(anchor) => {
            value_of(nearest(in_window(), frame.resolve(anchor), Side::After))
        }
        MeasurementMode::NearestBeforeElseAfter(anchor) => {
            let at = frame.resolve(anchor);
            value_of(
                nearest(in_window(), at, Side::Before)
                    .or_else(|| nearest(in_window(), at, Side::After)),
            )
        }
        MeasurementMode::Highest => value_of(extreme(in_window(), |a, b| a > b)),
        MeasurementMode::Lowest => value_of(extreme(in_window(), |a, b| a < b)),
        MeasurementMode::Average => {
            let (sum, n) = in_window()
                .filter_map(Measurement::numeric_value)
                .fold((0., 0usize), |(sum, n), v| (sum + v, n + 1));
            if n == 0 {
                String::new()
            } else {
                (sum / n as f64).to_string()
            }
        }
    }
}

/// The latest numeric value of `code` in the window, on or before `at`.
fn latest(records: &[&Measurement], code: &str, window: Window, at: Day) -> Option<f64> {
    records
        .iter()
        .filter(|m| &*m.code == code && window.contains(m.date) && m.date <= at)
        .filter_map(|m| m.numeric_value())
        .last()
}

fn fracture_risk(
    records: &[&Measurement],
    window: Window,
    at: Day,
    frame: &Frame<'_>,
    run: &RunContext,
) -> String {
    let config = &run.config.fracture_risk;
    let patient = frame.patient;
    let (sex, age) = match (
        patient.sex,
        frame.dates.age_in_years(patient.birth_date, at),
    ) {
        (Some(sex), Some(age)) => (sex, age),
        _ => return String::new(),
    };
    let count = |code: &str| {
        latest(records, code, window, at)
            .map(|v| v.max(0.).round() as u32)
            .unwrap_or(0)
    };
    let within_five_years = frame
        .dates
        .add_years(at, 5)
        .map_or(false, |five| window.has_end() && window.end() <= five);
    let inputs = FractureRiskInputs {
        age: age as f64,
        sex,
        weight: latest(records, &config.weight_code, window, at),
        bmd: latest(records, &config.bmd_code, window, at),
        falls: count(&*config.falls_code),
        fractures: count(&*config.fractures_code),
        period_years: if within_five_years { 5 } else { 10 },
    };
    or_empty(fracture_risk::estimate(config, &inputs).map(|risk| format!("{:.4}", risk)))
}

#[cfg(test)]
mod test {
    use crate::{
        covariate::{Covariate, Records},
        test_util::{event, measurement, patient, run, rx},
        window::Frame,
        Patient, RunContext,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const INDEX: i32 = 40_000;

    fn value(run: &RunContext, patient: &Patient, line: &str) -> String {
        let cov = Covariate::parse(line).unwrap();
        let records = Records::select(&cov, patient);
        let frame = Frame::new(patient, patient.anchors(INDEX), &run.dates);
        cov.value(&records, &frame, run)
    }

    #[rstest]
    #[case("COUNT", "2")]
    #[case("PRESENT", "1")]
    #[case("DISTINCTCODES", "2")]
    #[case("DAYSOFUSE", "15")]
    #[case("DAYSSINCESTART", "25")]
    #[case("DAYSSINCEUSE", "5")]
    fn drug_modes(#[case] mode: &str, #[case] expected: &str) {
        let run = run();
        let mut patient = patient(&run);
        patient.prescriptions = vec![
            rx("C10AA01", INDEX - 100, Some(INDEX - 50)),
            rx("C10AA01", INDEX - 25, Some(INDEX - 15)),
            rx("C10AA05", INDEX - 10, Some(INDEX - 5)),
            rx("N02BE01", INDEX - 20, None),
        ];
        let line = format!("DRUG;C10;;INDEX;-30;INDEX;0;INDEX;0;{}", mode);
        assert_eq!(value(&run, &patient, &line), expected);
    }

    #[test]
    fn drug_in_use_at_reference() {
        let run = run();
        let mut patient = patient(&run);
        patient.prescriptions = vec![rx("N02BE01", INDEX - 20, None)];
        let line = "DRUG;N02;;INDEX;-30;INDEX;0;INDEX;0;DAYSSINCEUSE";
        assert_eq!(value(&run, &patient, line), "0");
        // open ended prescriptions run until the end of the population period
        let line = "DRUG;N02;;INDEX;-30;;;INDEX;0;DAYSOFUSE";
        assert_eq!(
            value(&run, &patient, line),
            (patient.population_end - (INDEX - 20)).to_string()
        );
    }

    #[test]
    fn drug_nothing_found() {
        let run = run();
        let patient = patient(&run);
        for (mode, expected) in [
            ("COUNT", "0"),
            ("PRESENT", "0"),
            ("DAYSOFUSE", "0"),
            ("DAYSSINCESTART", ""),
            ("DAYSSINCEUSE", ""),
        ] {
            let line = format!("DRUG;C10;;INDEX;-30;INDEX;0;INDEX;0;{}", mode);
            assert_eq!(value(&run, &patient, &line), expected, "{}", mode);
        }
    }

    #[rstest]
    #[case("COUNT", "2")]
    #[case("PRESENT", "1")]
    #[case("INCIDENT", "1")]
    #[case("TIMETOINCIDENT", "-20")]
    #[case("TIMESINCEFIRST", "20")]
    #[case("TIMESINCELAST", "5")]
    fn event_modes(#[case] mode: &str, #[case] expected: &str) {
        let run = run();
        let mut patient = patient(&run);
        patient.events = vec![
            event("I21", INDEX - 20),
            event("I63", INDEX - 10),
            event("I21", INDEX - 5),
            event("I21", INDEX + 5),
        ];
        let line = format!("EVENT;I21;;INDEX;-30;INDEX;1;INDEX;0;{}", mode);
        assert_eq!(value(&run, &patient, &line), expected);
    }

    #[test]
    fn incident_needs_clean_history() {
        let run = run();
        let mut patient = patient(&run);
        patient.events = vec![event("A", INDEX - 40), event("A", INDEX - 5)];
        let line = "EVENT;A;;INDEX;-30;INDEX;0;INDEX;0;INCIDENT";
        assert_eq!(value(&run, &patient, line), "0");
        let line = "EVENT;A;;INDEX;-30;INDEX;0;INDEX;0;TIMETOINCIDENT";
        assert_eq!(value(&run, &patient, line), "");
        // history but nothing in the window
        let line = "EVENT;A;;INDEX;-3;INDEX;0;INDEX;0;INCIDENT";
        assert_eq!(value(&run, &patient, line), "0");
    }

    #[test]
    fn ages_at_events() {
        let run = run();
        let mut patient = patient(&run);
        let d = |y, m, day| run.dates.to_days(y, m, day).unwrap();
        patient.events = vec![event("E11", d(1999, 12, 31)), event("E11", d(2005, 6, 1))];
        let line = "EVENT;E11;;;;;;POPULATIONEND;0;AGEATFIRST";
        assert_eq!(value(&run, &patient, line), "39");
        let line = "EVENT;E11;;;;;;POPULATIONEND;0;AGEATLAST";
        assert_eq!(value(&run, &patient, line), "45");
    }

    #[rstest]
    #[case("NEAREST", "9")]
    #[case("NEARESTBEFORE", "9")]
    #[case("NEARESTAFTER", "12")]
    #[case("NEARESTBEFOREELSEAFTER", "9")]
    #[case("HIGHEST", "12")]
    #[case("LOWEST", "5")]
    #[case("AVERAGE", "8.75")]
    #[case("COUNT", "5")]
    #[case("NUMERICCOUNT", "4")]
    fn measurement_modes(#[case] mode: &str, #[case] expected: &str) {
        let run = run();
        let mut patient = patient(&run);
        patient.measurements = vec![
            measurement("HBA1C", INDEX - 20, "5"),
            measurement("HBA1C", INDEX - 15, "pending"),
            measurement("HBA1C", INDEX - 2, "9"),
            measurement("HBA1C", INDEX + 3, "12"),
            measurement("HBA1C", INDEX + 6, "9"),
            measurement("HBA1C", INDEX + 100, "30"),
        ];
        let line = format!("MEASUREMENT;HBA1C;;INDEX;-30;INDEX;30;INDEX;0;{}", mode);
        assert_eq!(value(&run, &patient, &line), expected);
    }

    #[test]
    fn nearest_ties_keep_first() {
        let run = run();
        let mut patient = patient(&run);
        patient.measurements = vec![
            measurement("BP", INDEX - 4, "120"),
            measurement("BP", INDEX + 4, "140"),
        ];
        let line = "MEASUREMENT;BP;;;;;;INDEX;0;NEAREST";
        assert_eq!(value(&run, &patient, line), "120");
        let line = "MEASUREMENT;BP;;INDEX;0;;;INDEX;0;NEARESTBEFOREELSEAFTER";
        assert_eq!(value(&run, &patient, line), "140");
        let line = "MEASUREMENT;BP;;INDEX;0;;;INDEX;0;NEARESTBEFORE";
        assert_eq!(value(&run, &patient, line), "");
    }

    #[test]
    fn categorical_values() {
        let run = run();
        let mut patient = patient(&run);
        patient.measurements = vec![
            measurement("SMOKE", INDEX - 200, "never"),
            measurement("SMOKE", INDEX - 20, "current"),
        ];
        let line = "MEASUREMENT;SMOKE,current;;;;;;INDEX;0;PRESENT";
        assert_eq!(value(&run, &patient, line), "1");
        let line = "MEASUREMENT;SMOKE;;;;;;INDEX;0;NEARESTBEFORE";
        assert_eq!(value(&run, &patient, line), "current");
        let line = "MEASUREMENT;SMOKE;;;;;;INDEX;0;HIGHEST";
        assert_eq!(value(&run, &patient, line), "");
    }

    #[test]
    fn fracture_risk() {
        let run = run();
        let mut patient = patient(&run);
        let at = run.dates.to_days(2010, 1, 1).unwrap();
        patient.measurements = vec![measurement("WEIGHT", at - 30, "70")];
        let cov = Covariate::parse("MEASUREMENT;GARVAN;;INDEX;-3650;INDEX;1;INDEX;0;").unwrap();
        let records = Records::select(&cov, &patient);
        let frame = Frame::new(&patient, patient.anchors(at), &run.dates);
        let risk: f64 = cov.value(&records, &frame, &run).parse().unwrap();
        // aged 50, so below the baseline risk at age 70
        assert!(risk > 0. && risk < 0.05, "{}", risk);

        patient.measurements.clear();
        let records = Records::select(&cov, &patient);
        let frame = Frame::new(&patient, patient.anchors(at), &run.dates);
        assert_eq!(cov.value(&records, &frame, &run), "");
    }
}
