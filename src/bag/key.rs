use crate::ArcStr;
use noisy_float::prelude::*;
use std::{fmt, iter::FromIterator, ops::Deref};

/// One component of a [`MultiKey`].
///
/// Values of different kinds order by kind first (integers, then doubles, then strings).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyValue {
    Int(i64),
    Double(R64),
    Str(ArcStr),
}

impl KeyValue {
    /// `None` for NaN or infinite values.
    pub fn double(value: f64) -> Option<Self> {
        R64::try_new(value).map(KeyValue::Double)
    }

    /// The value as a number. Strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KeyValue::Int(v) => Some(*v as f64),
            KeyValue::Double(v) => Some(v.raw()),
            KeyValue::Str(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<R64> for KeyValue {
    fn from(v: R64) -> Self {
        KeyValue::Double(v)
    }
}

impl From<ArcStr> for KeyValue {
    fn from(v: ArcStr) -> Self {
        KeyValue::Str(v)
    }
}

impl From<&ArcStr> for KeyValue {
    fn from(v: &ArcStr) -> Self {
        KeyValue::Str(v.clone())
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Str(v.into())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Str(v.into())
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyValue::Int(v) => fmt::Display::fmt(v, f),
            KeyValue::Double(v) => fmt::Display::fmt(&v.raw(), f),
            KeyValue::Str(v) => f.write_str(v),
        }
    }
}

/// An ordered tuple of key components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct MultiKey(Vec<KeyValue>);

impl MultiKey {
    pub fn new(components: Vec<KeyValue>) -> Self {
        Self(components)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Vec<KeyValue> {
        self.0
    }

    /// This key with one component removed.
    pub fn without(&self, component: usize) -> Self {
        let mut parts = self.0.clone();
        if component < parts.len() {
            parts.remove(component);
        }
        Self(parts)
    }
}

impl Deref for MultiKey {
    type Target = [KeyValue];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<KeyValue> for MultiKey {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for MultiKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("(")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", part)?;
        }
        f.write_str(")")
    }
}

/// A key component in a query: a concrete value, or a wildcard that matches any value present
/// in the bag at that position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPart {
    Value(KeyValue),
    Any,
}

impl KeyPart {
    pub fn is_any(&self) -> bool {
        matches!(self, KeyPart::Any)
    }
}

impl From<KeyValue> for KeyPart {
    fn from(v: KeyValue) -> Self {
        KeyPart::Value(v)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyPart::Value(v) => write!(f, "{}", v),
            KeyPart::Any => f.write_str("*"),
        }
    }
}

/// A key that may contain wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPattern(Vec<KeyPart>);

impl KeyPattern {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn has_wildcards(&self) -> bool {
        self.0.iter().any(KeyPart::is_any)
    }

    /// The concrete key, if there are no wildcards.
    pub fn to_key(&self) -> Option<MultiKey> {
        self.0
            .iter()
            .map(|part| match part {
                KeyPart::Value(v) => Some(v.clone()),
                KeyPart::Any => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(MultiKey)
    }

    pub(crate) fn with(&self, part: KeyPart) -> Self {
        let mut parts = self.0.clone();
        parts.push(part);
        Self(parts)
    }
}

impl Deref for KeyPattern {
    type Target = [KeyPart];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<MultiKey> for KeyPattern {
    fn from(key: MultiKey) -> Self {
        Self(key.0.into_iter().map(KeyPart::Value).collect())
    }
}

impl From<&MultiKey> for KeyPattern {
    fn from(key: &MultiKey) -> Self {
        Self(key.0.iter().cloned().map(KeyPart::Value).collect())
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("(")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", part)?;
        }
        f.write_str(")")
    }
}

/// Build a [`MultiKey`]: `key!["M", 2020, "A"]`.
#[macro_export]
macro_rules! key {
    ($($value:expr),* $(,)?) => {
        $crate::MultiKey::new(vec![$($crate::KeyValue::from($value)),*])
    };
}

/// Build a [`KeyPattern`], with `_` for wildcards: `pattern!["M", _, "A"]`.
///
/// Each component must be a single token tree, so wrap anything longer in parentheses.
#[macro_export]
macro_rules! pattern {
    (@part _) => {
        $crate::KeyPart::Any
    };
    (@part $value:expr) => {
        $crate::KeyPart::Value($crate::KeyValue::from($value))
    };
    ($($part:tt),* $(,)?) => {
        $crate::KeyPattern::new(vec![$($crate::pattern!(@part $part)),*])
    };
}
