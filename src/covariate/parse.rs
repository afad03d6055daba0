use super::{Covariate, Domain, DrugMode, EventMode, MeasurementMode, Target, FRACTURE_RISK_CODE};
use crate::{
    codes::{AtcMatcher, CodeSet, MeasurementFilter},
    error::DefinitionError,
    window::{Anchor, Reference, WindowSpec},
    ArcStr,
};

/// Split a definition line into trimmed fields.
///
/// A trailing `;` that would add an empty field beyond `required` is dropped.
pub(crate) fn split_fields(line: &str, required: usize) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split(';').map(str::trim).collect();
    if fields.len() > required && fields.last() == Some(&"") {
        fields.pop();
    }
    fields
}

/// Parse the first ten fields of a definition. The caller checks the field count.
pub(crate) fn parse_covariate(fields: &[&str], line: &str) -> Result<Covariate, DefinitionError> {
    let (label, window, target) =
        inner(fields).map_err(|message| DefinitionError::new(line, message))?;
    Ok(Covariate {
        definition: line.to_string(),
        label,
        window,
        target,
    })
}

fn inner(fields: &[&str]) -> Result<(Option<ArcStr>, WindowSpec, Target), String> {
    let domain: Domain = fields[0].parse().map_err(|e: anyhow::Error| e.to_string())?;
    let label = Some(fields[2]).filter(|l| !l.is_empty()).map(ArcStr::from);
    let window = WindowSpec::new(
        bound(fields[3], fields[4], "window start")?,
        bound(fields[5], fields[6], "window end")?,
    );
    let at = value_anchor(fields[7], fields[8])?;
    let target = target(domain, fields[1], fields[9], at)?;
    Ok((label, window, target))
}

fn reference(field: &str, what: &str) -> Result<Reference, String> {
    field
        .parse()
        .map_err(|e: anyhow::Error| format!("{} for {}", e, what))
}

fn offset(field: &str, what: &str) -> Result<i32, String> {
    field
        .parse()
        .map_err(|_| format!("{} offset \"{}\" is not a whole number", what, field))
}

/// An empty offset leaves the bound open.
fn bound(reference_field: &str, offset_field: &str, what: &str) -> Result<Option<Anchor>, String> {
    let reference = reference(reference_field, what)?;
    if offset_field.is_empty() {
        return Ok(None);
    }
    Ok(Some(Anchor::new(reference, offset(offset_field, what)?)))
}

/// An empty offset is 0.
fn value_anchor(reference_field: &str, offset_field: &str) -> Result<Anchor, String> {
    let reference = reference(reference_field, "value reference")?;
    let offset = if offset_field.is_empty() {
        0
    } else {
        offset(offset_field, "value reference")?
    };
    Ok(Anchor::new(reference, offset))
}

fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|ch| !matches!(ch, '_' | ' ' | '-'))
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

fn target(domain: Domain, codes: &str, mode: &str, at: Anchor) -> Result<Target, String> {
    if domain == Domain::Measurement && codes.eq_ignore_ascii_case(FRACTURE_RISK_CODE) {
        return Ok(Target::FractureRisk { at });
    }
    let token = normalize(mode);
    if token.is_empty() {
        return Err("missing value mode".into());
    }
    let mismatch = || format!("mode \"{}\" is not valid for the {} domain", mode, domain);
    Ok(match domain {
        Domain::Drug => Target::Drug {
            atc: AtcMatcher::parse(codes),
            mode: drug_mode(&token, at).ok_or_else(mismatch)?,
        },
        Domain::Event => Target::Event {
            codes: CodeSet::parse(codes),
            mode: event_mode(&token, at).ok_or_else(mismatch)?,
        },
        Domain::Measurement => Target::Measurement {
            filter: MeasurementFilter::parse(codes),
            mode: measurement_mode(&token, at).ok_or_else(mismatch)?,
        },
    })
}

fn drug_mode(token: &str, at: Anchor) -> Option<DrugMode> {
    use DrugMode::*;
    Some(match token {
        "COUNT" => Count,
        "PRESENT" => Present,
        "DISTINCTCODES" | "COUNTDISTINCTCODES" => DistinctCodes,
        "DAYSOFUSE" => DaysOfUse,
        "DAYSSINCESTART" => DaysSinceStart(at),
        "DAYSSINCEUSE" => DaysSinceUse(at),
        _ => return None,
    })
}

fn event_mode(token: &str, at: Anchor) -> Option<EventMode> {
    use EventMode::*;
    Some(match token {
        "COUNT" => Count,
        "PRESENT" => Present,
        "INCIDENT" => Incident,
        "TIMETOINCIDENT" => TimeToIncident(at),
        "TIMESINCEFIRST" => TimeSinceFirst(at),
        "TIMESINCELAST" => TimeSinceLast(at),
        "AGEATFIRST" => AgeAtFirst(at),
        "AGEATLAST" => AgeAtLast(at),
        _ => return None,
    })
}

fn measurement_mode(token: &str, at: Anchor) -> Option<MeasurementMode> {
    use MeasurementMode::*;
    Some(match token {
        "COUNT" => Count,
        "PRESENT" => Present,
        "NUMERICCOUNT" => NumericCount,
        "NEAREST" => Nearest(at),
        "NEARESTBEFORE" => NearestBefore(at),
        "NEARESTAFTER" => NearestAfter(at),
        "NEARESTBEFOREELSEAFTER" => NearestBeforeElseAfter(at),
        "HIGHEST" => Highest,
        "LOWEST" => Lowest,
        "AVERAGE" => Average,
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::split_fields;
    use crate::{
        codes::CodeSet,
        covariate::{Covariate, EventMode, MeasurementMode, Target},
        window::{Anchor, Reference},
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn trailing_separator() {
        assert_eq!(split_fields("a; b ;c;", 3), vec!["a", "b", "c"]);
        assert_eq!(split_fields("a;b;", 3), vec!["a", "b", ""]);
        assert_eq!(split_fields("a;b;c;;", 3), vec!["a", "b", "c", ""]);
    }

    #[rstest]
    #[case("DRUG;C10;;INDEX;-30;INDEX;0;;;NEAREST", "not valid for the DRUG domain")]
    #[case("EVENT;I21;;INDEX;-30;INDEX;0;;;DAYSSINCEUSE", "not valid for the EVENT domain")]
    #[case("MEASUREMENT;BMI;;INDEX;-30;INDEX;0;;;INCIDENT", "not valid for the MEASUREMENT")]
    #[case("EVENT;I21;;INDEX;-30;INDEX;0;;;", "missing value mode")]
    #[case("EVENT;I21;;INDEX;1.5;INDEX;0;;;COUNT", "not a whole number")]
    #[case("EVENT;I21;;TOMORROW;1;INDEX;0;;;COUNT", "unknown reference point")]
    #[case("THING;I21;;INDEX;1;INDEX;0;;;COUNT", "unknown domain")]
    fn rejects(#[case] line: &str, #[case] message: &str) {
        let error = Covariate::parse(line).unwrap_err();
        assert!(
            error.message.contains(message),
            "\"{}\" does not mention \"{}\"",
            error.message,
            message
        );
        assert_eq!(error.definition, line);
    }

    #[test]
    fn value_reference_defaults() {
        let cov = Covariate::parse("EVENT;I21;;;;;;;;TIME_SINCE_LAST").unwrap();
        assert_eq!(
            cov.target,
            Target::Event {
                codes: CodeSet::parse("I21"),
                mode: EventMode::TimeSinceLast(Anchor::index(0)),
            }
        );
        let cov = Covariate::parse("LAB;HBA1C;;;;;;COHORTSTART;7;nearest before").unwrap();
        match cov.target {
            Target::Measurement { mode, .. } => assert_eq!(
                mode,
                MeasurementMode::NearestBefore(Anchor::new(Reference::CohortStart, 7))
            ),
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn fracture_risk_ignores_mode() {
        let cov = Covariate::parse("MEASUREMENT;garvan;risk;INDEX;-3650;INDEX;1;INDEX;0;").unwrap();
        assert_eq!(
            cov.target,
            Target::FractureRisk {
                at: Anchor::index(0)
            }
        );
    }
}
