//! Item lists: lightweight feature definitions for the extractors in [`crate::extract`].
//!
//! One item per line, `codes;label;value;param1;param2;...`:
//!
//! - `codes` is a comma separated list and must not be empty. Event and measurement codes match
//!   exactly, ATC codes by prefix.
//! - `label` names the feature. If empty the codes are joined with `_`.
//! - `value`, if given, restricts measurements to that (categorical) value.
//! - the parameters are read by position, by whichever extractor uses the item. Window based
//!   extractors read the window start and end offsets (from the index date) from the first two,
//!   the time to/since extractors read a horizon in days from the first. Empty means unbounded.
use crate::{
    codes::{split_codes, AtcMatcher, CodeSet},
    error::{DefinitionError, ExtractError},
    window::WindowSpec,
    ArcStr,
};
use qu::ick_use::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub codes: CodeSet,
    /// The same codes, for prefix matching.
    pub atc: AtcMatcher,
    pub label: ArcStr,
    pub value: Option<ArcStr>,
    pub parameters: Vec<ArcStr>,
}

impl Item {
    pub fn parse(line: &str) -> Result<Self, DefinitionError> {
        let mut fields = line.split(';').map(str::trim);
        let codes_field = fields.next().unwrap_or("");
        let codes = CodeSet::parse(codes_field);
        if codes.is_empty() {
            return Err(DefinitionError::new(line, "an item needs at least one code"));
        }
        let label = match fields.next() {
            Some(label) if !label.is_empty() => ArcStr::from(label),
            _ => ArcStr::from(split_codes(codes_field).collect::<Vec<_>>().join("_")),
        };
        let value = fields
            .next()
            .filter(|value| !value.is_empty())
            .map(ArcStr::from);
        let parameters = fields.map(ArcStr::from).collect();
        Ok(Item {
            atc: AtcMatcher::new(codes.clone()),
            codes,
            label,
            value,
            parameters,
        })
    }

    /// The parameter at `index`, or `None` if it is missing or empty.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.parameters
            .get(index)
            .map(|p| &**p)
            .filter(|p| !p.is_empty())
    }

    /// The parameter at `index` as a number of days.
    pub fn days(&self, index: usize) -> Result<Option<i32>, ExtractError> {
        match self.param(index) {
            None => Ok(None),
            Some(p) => p.parse().map(Some).map_err(|_| ExtractError::Parameter {
                item: self.label.to_string(),
                index,
                value: p.to_string(),
                message: "is not a whole number of days",
            }),
        }
    }

    /// The window given by the first two parameters, relative to the index date.
    pub fn window(&self) -> Result<WindowSpec, ExtractError> {
        Ok(WindowSpec::around_index(self.days(0)?, self.days(1)?))
    }

    /// The horizon given by the first parameter. Horizons are never negative.
    pub fn horizon(&self) -> Result<Option<i32>, ExtractError> {
        match self.days(0)? {
            Some(days) if days < 0 => Err(ExtractError::Parameter {
                item: self.label.to_string(),
                index: 0,
                value: days.to_string(),
                message: "is a negative horizon",
            }),
            other => Ok(other),
        }
    }

    /// Whether a measurement value is one this item accepts.
    pub fn accepts_value(&self, value: &str) -> bool {
        match &self.value {
            Some(expected) => **expected == *value.trim(),
            None => true,
        }
    }
}

/// A parsed item file. Like covariate definitions, bad lines are collected rather than failing
/// the whole list.
#[derive(Debug, Clone, Default)]
pub struct ItemList {
    items: Vec<Item>,
    diagnostics: Vec<DefinitionError>,
}

impl ItemList {
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for line in lines {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            match Item::parse(line) {
                Ok(item) => out.items.push(item),
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
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.iter().map(|item| &*item.label)
    }
}

impl<'a> IntoIterator for &'a ItemList {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod test {
    use super::{Item, ItemList};
    use crate::{window::WindowSpec, ExtractError};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_fields() {
        let item = Item::parse("I21, I22;;;-365;0").unwrap();
        assert_eq!(&*item.label, "I21_I22");
        assert_eq!(item.value, None);
        assert_eq!(
            item.window().unwrap(),
            WindowSpec::around_index(Some(-365), Some(0))
        );
        assert!(item.codes.matches("I22"));
        assert!(!item.codes.matches("I22.1"));

        let item = Item::parse("C10;statins;;").unwrap();
        assert_eq!(&*item.label, "statins");
        assert_eq!(item.window().unwrap(), WindowSpec::default());
        assert!(item.atc.matches("C10AA01"));

        let item = Item::parse("SMOKE;smoker;current;;30").unwrap();
        assert!(item.accepts_value("current"));
        assert!(!item.accepts_value("ex"));
        assert_eq!(item.param(0), None);
        assert_eq!(item.param(1), Some("30"));
        assert_eq!(item.param(7), None);
    }

    #[test]
    fn parameter_errors() {
        let item = Item::parse("I21;mi;;soon").unwrap();
        assert_eq!(
            item.window(),
            Err(ExtractError::Parameter {
                item: "mi".into(),
                index: 0,
                value: "soon".into(),
                message: "is not a whole number of days",
            })
        );
        assert!(Item::parse("I21;mi;;-5").unwrap().horizon().is_err());
        assert_eq!(Item::parse("I21;mi;;90").unwrap().horizon(), Ok(Some(90)));
    }

    #[test]
    fn lists_collect_diagnostics() {
        let list = ItemList::parse(vec!["I21;mi", "", " ;nothing", "E11;diabetes"]);
        assert!(!list.is_valid());
        assert_eq!(list.labels().collect::<Vec<_>>(), vec!["mi", "diabetes"]);
        assert_eq!(list.diagnostics()[0].definition, " ;nothing");
    }
}
