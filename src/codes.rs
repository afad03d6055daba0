//! Code filters used by covariate definitions.
//!
//! An empty filter matches every record of its stream.
use crate::{ArcStr, Measurement};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use std::{
    collections::{btree_set, BTreeSet},
    fmt,
    sync::Arc,
};

/// Split a comma-separated code field, dropping blanks.
pub fn split_codes(field: &str) -> impl Iterator<Item = &str> {
    field.split(',').map(str::trim).filter(|code| !code.is_empty())
}

/// A set of codes, matched exactly.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeSet {
    codes: Arc<BTreeSet<ArcStr>>,
}

impl CodeSet {
    /// Duplicates will be removed.
    pub fn new(codes: BTreeSet<ArcStr>) -> Self {
        Self {
            codes: Arc::new(codes),
        }
    }

    pub fn parse(field: &str) -> Self {
        split_codes(field).map(ArcStr::from).collect()
    }

    pub fn matches(&self, code: &str) -> bool {
        self.codes.is_empty() || self.codes.contains(code)
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, ArcStr> {
        self.codes.iter()
    }
}

impl FromIterator<ArcStr> for CodeSet {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = ArcStr>,
    {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for CodeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for code in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            f.write_str(code)?;
        }
        Ok(())
    }
}

/// Matches ATC codes by prefix, so `C10` matches `C10AA01`.
#[derive(Debug, Clone)]
pub struct AtcMatcher {
    prefixes: CodeSet,
    matcher: AhoCorasick,
}

impl AtcMatcher {
    pub fn new(prefixes: CodeSet) -> Self {
        let matcher = AhoCorasickBuilder::new()
            .anchored(true)
            .build(prefixes.iter().map(|code| code.as_bytes()));
        Self { prefixes, matcher }
    }

    pub fn parse(field: &str) -> Self {
        Self::new(CodeSet::parse(field))
    }

    pub fn matches(&self, atc: &str) -> bool {
        self.prefixes.is_empty() || self.matcher.is_match(atc)
    }

    pub fn prefixes(&self) -> &CodeSet {
        &self.prefixes
    }
}

impl PartialEq for AtcMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.prefixes == other.prefixes
    }
}

/// Which measurement values a filter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueFilter {
    Any,
    OneOf(BTreeSet<ArcStr>),
}

/// Selects measurements by type code and optionally by (categorical) value.
///
/// Written `TYPE` to match every value of a type, or `TYPE,A,B` to match only values `A` and
/// `B`. `TYPE,` matches measurements with an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementFilter {
    pub type_code: Option<ArcStr>,
    pub values: ValueFilter,
}

impl MeasurementFilter {
    pub fn parse(field: &str) -> Self {
        let field = field.trim();
        let mut parts = field.split(',');
        let type_code = parts
            .next()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(ArcStr::from);
        let values = if field.contains(',') {
            ValueFilter::OneOf(parts.map(|value| ArcStr::from(value.trim())).collect())
        } else {
            ValueFilter::Any
        };
        Self { type_code, values }
    }

    pub fn matches(&self, measurement: &Measurement) -> bool {
        if let Some(code) = &self.type_code {
            if **code != *measurement.code {
                return false;
            }
        }
        match &self.values {
            ValueFilter::Any => true,
            ValueFilter::OneOf(values) => values.contains(measurement.value.trim()),
        }
    }
}

impl fmt::Display for MeasurementFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(code) = &self.type_code {
            f.write_str(code)?;
        }
        if let ValueFilter::OneOf(values) = &self.values {
            for value in values {
                write!(f, ",{}", value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{AtcMatcher, CodeSet, MeasurementFilter, ValueFilter};
    use crate::test_util::measurement;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn exact_codes() {
        let codes = CodeSet::parse(" I21, I22 ,,");
        assert_eq!(codes.len(), 2);
        assert!(codes.matches("I21"));
        assert!(!codes.matches("I21.9"));
        assert_eq!(codes.to_string(), "I21,I22");
        assert!(CodeSet::parse("").matches("anything"));
    }

    #[rstest]
    #[case("C10", "C10AA01", true)]
    #[case("C10,N02", "N02BE01", true)]
    #[case("C10", "AC10", false)]
    #[case("C10AA", "C10", false)]
    #[case("", "B01AC06", true)]
    fn atc_prefixes(#[case] field: &str, #[case] atc: &str, #[case] expected: bool) {
        assert_eq!(AtcMatcher::parse(field).matches(atc), expected);
    }

    #[test]
    fn measurement_values() {
        let any = MeasurementFilter::parse("SMOKE");
        assert_eq!(any.values, ValueFilter::Any);
        assert!(any.matches(&measurement("SMOKE", 1, "current")));
        assert!(!any.matches(&measurement("BMI", 1, "current")));

        let some = MeasurementFilter::parse("SMOKE,current,ex");
        assert!(some.matches(&measurement("SMOKE", 1, "ex")));
        assert!(!some.matches(&measurement("SMOKE", 1, "never")));
        assert_eq!(some.to_string(), "SMOKE,current,ex");

        let empty = MeasurementFilter::parse("SMOKE,");
        assert!(empty.matches(&measurement("SMOKE", 1, "")));
        assert!(!empty.matches(&measurement("SMOKE", 1, "ex")));

        assert!(MeasurementFilter::parse("").matches(&measurement("BMI", 1, "20")));
    }
}
