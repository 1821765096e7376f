//! Label matchers used to select series.

use crate::core::{LanternError, Result};
use crate::metrics::labels::{Labels, METRIC_NAME};
use regex::Regex;
use std::fmt;

/// How a matcher compares the label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNotMatch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::RegexMatch => "=~",
            MatchType::RegexNotMatch => "!~",
        }
    }
}

/// Predicate over one label of a series.
///
/// A missing label is treated as the empty string, so `job=""` selects series
/// with no `job` label as well as series whose `job` is empty.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    name: String,
    match_type: MatchType,
    value: String,
    // Compiled once, anchored on both ends.
    regex: Option<Regex>,
}

impl LabelMatcher {
    pub fn new<N: Into<String>, V: Into<String>>(
        match_type: MatchType,
        name: N,
        value: V,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let regex = match match_type {
            MatchType::RegexMatch | MatchType::RegexNotMatch => {
                Some(Regex::new(&format!("^(?:{})$", value)).map_err(|e| {
                    LanternError::validation(format!("invalid regex for label {}: {}", name, e))
                })?)
            },
            MatchType::Equal | MatchType::NotEqual => None,
        };

        Ok(Self {
            name,
            match_type,
            value,
            regex,
        })
    }

    /// `name="value"`; never fails.
    pub fn equal<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            match_type: MatchType::Equal,
            value: value.into(),
            regex: None,
        }
    }

    /// Matcher selecting a metric by name.
    pub fn metric_name<V: Into<String>>(value: V) -> Self {
        Self::equal(METRIC_NAME, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Matches a single (possibly absent) label value.
    pub fn matches_value(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match self.match_type {
            MatchType::Equal => value == self.value,
            MatchType::NotEqual => value != self.value,
            MatchType::RegexMatch => self.regex.as_ref().map_or(false, |re| re.is_match(value)),
            MatchType::RegexNotMatch => self.regex.as_ref().map_or(true, |re| !re.is_match(value)),
        }
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_value(labels.get(&self.name))
    }

    /// True if the matcher accepts the empty string, meaning it would also
    /// select series that lack the label entirely.
    pub fn matches_empty(&self) -> bool {
        self.matches_value(None)
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.match_type == other.match_type && self.value == other.value
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type.as_str(), self.value)
    }
}

/// True if every matcher accepts the labels.
pub fn matches_all(matchers: &[LabelMatcher], labels: &Labels) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}
