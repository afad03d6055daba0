use clap::Parser;
use cohort_covariates::{
    header, key, pattern, read_lines, statistics_table, Config, Covariates, Day, DefinitionError,
    ExclusionCriteria, KeyValue, MultiKeyBag, Patient, ResultExt, RunContext,
};
use qu::ick_use::*;
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Parser)]
struct Opt {
    /// Covariate definitions, one per line.
    #[clap(long, short)]
    definitions: PathBuf,
    /// Exclusion criteria, one per line.
    #[clap(long, short)]
    exclusions: Option<PathBuf>,
    /// JSON array of patients, each with an `index` day.
    #[clap(long, short)]
    patients: PathBuf,
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Don't print the summary table after the values.
    #[clap(long)]
    no_summary: bool,
}

#[derive(Deserialize)]
struct Subject {
    #[serde(flatten)]
    patient: Patient,
    index: Day,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let run = RunContext::new(config)?;

    let lines = read_lines(&opt.definitions)?;
    let covariates = Covariates::parse(lines.iter().map(String::as_str));
    report_diagnostics("covariate", covariates.diagnostics())?;

    let exclusions = match &opt.exclusions {
        Some(path) => {
            let lines = read_lines(path)?;
            ExclusionCriteria::parse(lines.iter().map(String::as_str))
        }
        None => ExclusionCriteria::default(),
    };
    report_diagnostics("exclusion", exclusions.diagnostics())?;

    let subjects = load_subjects(&opt.patients)?;
    event!(Level::INFO, "loaded {} patients", subjects.len());

    let mut writer = csv::Writer::from_writer(io::stdout());
    let mut record = vec!["patient_id".to_string()];
    record.extend(covariates.iter().map(|cov| cov.title()));
    writer.write_record(&record)?;

    let mut bag = MultiKeyBag::new();
    let mut excluded = 0;
    for Subject { patient, index } in subjects.iter() {
        let anchors = patient.anchors(*index);
        if exclusions.exclude(patient, anchors, &run)? {
            excluded += 1;
            continue;
        }
        let values = covariates
            .values(patient, anchors, &run)
            .with_context(|| format!("computing covariates for patient {}", patient.patient_id))?;
        for (cov, value) in covariates.iter().zip(values.iter()) {
            if let Ok(value) = value.parse::<f64>() {
                if let Some(value) = KeyValue::double(value) {
                    bag.add(key![cov.title(), value])?;
                }
            }
        }
        let mut record = vec![patient.patient_id.to_string()];
        record.extend(values);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    event!(
        Level::INFO,
        "{} of {} patients excluded",
        excluded,
        subjects.len()
    );

    if !opt.no_summary {
        let patterns = covariates
            .iter()
            .map(|cov| {
                let title = cov.title();
                pattern![title, _]
            })
            .filter(|pattern| bag.contains(pattern))
            .collect::<Vec<_>>();
        header("Covariate distributions");
        let table = statistics_table(&bag, &patterns, &run.config.statistics.percentiles)?;
        println!("{}", table.for_terminal());
    }
    Ok(())
}

fn load_subjects(path: &Path) -> Result<Vec<Subject>> {
    fn inner(path: &Path) -> Result<Vec<Subject>> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
    inner(path).with_context(|| format!("loading patients from \"{}\"", path.display()))
}

fn report_diagnostics(kind: &str, diagnostics: &[DefinitionError]) -> Result {
    if diagnostics.is_empty() {
        return Ok(());
    }
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic);
    }
    Err(format_err!(
        "{} {} definitions are invalid",
        diagnostics.len(),
        kind
    ))
    .print_error()
}
