//! Immutable label sets.
//!
//! Labels are kept sorted by name, so equality and hashing never depend on
//! insertion order and a `Labels` value can key a `HashMap` directly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved label carrying the metric name.
pub const METRIC_NAME: &str = "__name__";

static LABEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid label name regex"));

/// Returns true if `name` is a legal Prometheus label name.
pub fn is_label_name_valid(name: &str) -> bool {
    !name.trim().is_empty() && LABEL_NAME.is_match(name)
}

/// Maps an arbitrary OTLP attribute key or metric name onto the label name
/// alphabet: illegal characters become `_`, and a leading digit gets a `_`
/// prefix.
pub fn sanitize_label_name(name: &str) -> String {
    if is_label_name_valid(name) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() + 1);
    if name.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.push('_');
    }
    out.extend(name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }));
    out
}

/// An immutable, order-independent set of labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels {
    map: BTreeMap<String, String>,
}

impl Labels {
    /// The empty label set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a label set from pairs; later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Labels {
            map: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Value of `__name__`, if any.
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates labels in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// A copy without `__name__`.
    pub fn drop_metric_name(&self) -> Labels {
        self.drop(&[METRIC_NAME])
    }

    /// A copy without the given keys.
    pub fn drop<S: AsRef<str>>(&self, keys: &[S]) -> Labels {
        if !keys.iter().any(|k| self.map.contains_key(k.as_ref())) {
            return self.clone();
        }
        self.to_builder().remove_range(keys).build()
    }

    /// Keeps the labels named in `names` when `on` is true, or everything
    /// else when `on` is false. `__name__` never survives either way.
    pub fn match_labels<S: AsRef<str>>(&self, on: bool, names: &[S]) -> Labels {
        let map = self
            .map
            .iter()
            .filter(|(k, _)| k.as_str() != METRIC_NAME)
            .filter(|(k, _)| names.iter().any(|n| n.as_ref() == k.as_str()) == on)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Labels { map }
    }

    /// Starts a builder over a private copy of these labels.
    pub fn to_builder(&self) -> LabelsBuilder {
        LabelsBuilder {
            map: self.map.clone(),
        }
    }

    pub fn builder() -> LabelsBuilder {
        LabelsBuilder::default()
    }
}

impl fmt::Display for Labels {
    /// Prometheus notation: `name{a="1", b="2"}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.metric_name() {
            f.write_str(name)?;
        }
        f.write_str("{")?;
        let mut first = true;
        for (k, v) in self.iter().filter(|(k, _)| *k != METRIC_NAME) {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={:?}", k, v)?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Labels::from_pairs(iter)
    }
}

/// Mutable staging area for a new label set.
#[derive(Debug, Clone, Default)]
pub struct LabelsBuilder {
    map: BTreeMap<String, String>,
}

impl LabelsBuilder {
    pub fn add<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.map.insert(name.into(), value.into());
        self
    }

    pub fn add_range<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.map.extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.map.remove(name);
        self
    }

    pub fn remove_range<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            self.map.remove(name.as_ref());
        }
        self
    }

    pub fn build(self) -> Labels {
        Labels { map: self.map }
    }
}
