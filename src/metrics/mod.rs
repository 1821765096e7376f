//! Metric model: label sets, matchers, series and window extraction.

pub mod enumerator;
pub mod labels;
pub mod matcher;
pub mod types;

pub use enumerator::MatrixEnumerator;
pub use labels::{is_label_name_valid, sanitize_label_name, Labels, LabelsBuilder, METRIC_NAME};
pub use matcher::{matches_all, LabelMatcher, MatchType};
pub use types::{MetricMetadata, MetricType, Sample, TimeSeries};
