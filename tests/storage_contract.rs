//! The same contract suite run against every storage backend.

mod common;

use common::*;
use lantern_lib::core::{LanternError, SpanId, SpanKind, TraceId};
use lantern_lib::metrics::{LabelMatcher, MatchType, MetricType};
use lantern_lib::storage::{
    DocumentStorage, JaegerTraceQueryParameters, LabelNamesQueryParameters,
    LabelValuesQueryParameters, MemoryStorage, MetricMetadataQueryParameters,
    OperationQueryParameters, Storage, TimeSeriesQueryParameters,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn seeded(storage: Storage) -> Storage {
    let cancel = CancellationToken::new();
    storage.span_writer.write(&sample_spans(), &cancel).await.unwrap();
    storage.series_writer.write(&sample_series(), &cancel).await.unwrap();
    storage
        .metadata_writer
        .write(
            &[
                metadata("http_requests_total", "api", MetricType::Counter, "Requests served"),
                metadata("queue_depth", "worker", MetricType::Gauge, "Jobs waiting"),
            ],
            &cancel,
        )
        .await
        .unwrap();
    storage
}

fn ids(ids: &[TraceId]) -> Vec<&str> {
    ids.iter().map(TraceId::as_str).collect()
}

fn name_matcher(name: &str) -> Vec<LabelMatcher> {
    vec![LabelMatcher::metric_name(name)]
}

async fn trace_is_sorted_by_start(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();

    let spans = storage.span_reader.get_trace(&TraceId::new("t1"), &cancel).await.unwrap();
    let span_ids: Vec<&str> = spans.iter().map(|s| s.span_id.as_str()).collect();
    assert_eq!(span_ids, vec!["a", "b"]);

    let unknown = storage.span_reader.get_trace(&TraceId::new("nope"), &cancel).await;
    assert!(matches!(unknown, Err(LanternError::TraceNotFound(_))));
}

async fn get_span_by_id(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();

    let span = storage
        .span_reader
        .get_span(&TraceId::new("t1"), &SpanId::new("b"), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(span.name, "SELECT users");
    assert_eq!(span.parent_span_id.as_str(), "a");

    let missing = storage
        .span_reader
        .get_span(&TraceId::new("t2"), &SpanId::new("b"), &cancel)
        .await
        .unwrap();
    assert!(missing.is_none());
}

async fn services_and_operations(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();

    let services = storage.span_reader.get_services(&cancel).await.unwrap();
    assert_eq!(services, vec!["backend", "frontend"]);

    let all = storage
        .span_reader
        .get_operations(
            &OperationQueryParameters {
                service_name: "frontend".into(),
                span_kind: None,
            },
            &cancel,
        )
        .await
        .unwrap();
    let names: Vec<&str> = all.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["GET /", "POST /checkout"]);

    let clients = storage
        .span_reader
        .get_operations(
            &OperationQueryParameters {
                service_name: "frontend".into(),
                span_kind: Some(SpanKind::Client),
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(clients.is_empty());

    let unknown = storage
        .span_reader
        .get_operations(
            &OperationQueryParameters {
                service_name: "ghost".into(),
                span_kind: None,
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

async fn trace_search(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();
    let reader = &storage.span_reader;

    let everything = reader
        .find_trace_ids(&JaegerTraceQueryParameters::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(ids(&everything), vec!["t2", "t1"]);

    let limited = JaegerTraceQueryParameters {
        num_traces: 1,
        ..Default::default()
    };
    assert_eq!(ids(&reader.find_trace_ids(&limited, &cancel).await.unwrap()), vec!["t2"]);

    let by_service = JaegerTraceQueryParameters {
        service_name: Some("backend".into()),
        ..Default::default()
    };
    assert_eq!(ids(&reader.find_trace_ids(&by_service, &cancel).await.unwrap()), vec!["t1"]);

    let mut by_tag = JaegerTraceQueryParameters::default();
    by_tag.tags.insert("db.system".into(), "postgresql".into());
    assert_eq!(ids(&reader.find_trace_ids(&by_tag, &cancel).await.unwrap()), vec!["t1"]);

    let slow = JaegerTraceQueryParameters {
        duration_min: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    assert_eq!(ids(&reader.find_trace_ids(&slow, &cancel).await.unwrap()), vec!["t2"]);

    let early = JaegerTraceQueryParameters {
        start_time_max: Some(2_000 * MS),
        ..Default::default()
    };
    assert_eq!(ids(&reader.find_trace_ids(&early, &cancel).await.unwrap()), vec!["t1"]);

    let nothing = JaegerTraceQueryParameters {
        operation_name: Some("DELETE /".into()),
        ..Default::default()
    };
    assert!(reader.find_trace_ids(&nothing, &cancel).await.unwrap().is_empty());
}

async fn traces_by_id_keep_request_order(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();

    let requested = [TraceId::new("t1"), TraceId::new("missing"), TraceId::new("t2")];
    let traces = storage
        .span_reader
        .find_traces_by_id(&requested, None, None, &cancel)
        .await
        .unwrap();
    let found: Vec<&str> = traces.iter().map(|t| t.trace_id.as_str()).collect();
    assert_eq!(found, vec!["t1", "t2"]);
    assert_eq!(traces[0].spans.len(), 2);
    assert_eq!(traces[0].processes.len(), 2);

    let bounded = storage
        .span_reader
        .find_traces_by_id(&requested, Some(4_000 * MS), None, &cancel)
        .await
        .unwrap();
    assert_eq!(bounded.len(), 1);
    assert_eq!(bounded[0].trace_id, "t2");
}

async fn time_series_selection(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();
    let reader = &storage.metric_reader;

    let query = TimeSeriesQueryParameters::new(name_matcher("http_requests_total"), 15, 45);
    let series = reader.get_time_series(&query, &cancel).await.unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].labels.get("method"), Some("GET"));
    let times: Vec<i64> = series[0].samples.iter().map(|s| s.timestamp_unix_sec).collect();
    assert_eq!(times, vec![15, 30, 45]);

    let limited = query.clone().with_limit(1);
    assert_eq!(reader.get_time_series(&limited, &cancel).await.unwrap().len(), 1);

    let outside = TimeSeriesQueryParameters::new(name_matcher("queue_depth"), 0, 60);
    assert!(reader.get_time_series(&outside, &cancel).await.unwrap().is_empty());

    let regex = vec![
        LabelMatcher::metric_name("http_requests_total"),
        LabelMatcher::new(MatchType::RegexMatch, "method", "P.*").unwrap(),
    ];
    let posts = reader
        .get_time_series(&TimeSeriesQueryParameters::new(regex, 0, 60), &cancel)
        .await
        .unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].samples.len(), 5);
}

async fn repeated_writes_merge(storage: Storage) {
    let cancel = CancellationToken::new();
    let pairs = [("__name__", "temperature"), ("room", "lab")];
    storage
        .series_writer
        .write(&[series(&pairs, &[(10, 1.0), (30, 3.0)])], &cancel)
        .await
        .unwrap();
    storage
        .series_writer
        .write(&[series(&pairs, &[(20, 2.0), (30, 4.0)])], &cancel)
        .await
        .unwrap();

    let query = TimeSeriesQueryParameters::new(name_matcher("temperature"), 0, 100);
    let series = storage.metric_reader.get_time_series(&query, &cancel).await.unwrap();
    assert_eq!(series.len(), 1);
    let points: Vec<(i64, f64)> =
        series[0].samples.iter().map(|s| (s.timestamp_unix_sec, s.value)).collect();
    assert_eq!(points, vec![(10, 1.0), (20, 2.0), (30, 4.0)]);
}

async fn empty_name_matches_unnamed_series(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();
    storage
        .series_writer
        .write(&[series(&[("job", "api")], &[(10, 1.0)])], &cancel)
        .await
        .unwrap();

    let matchers = vec![LabelMatcher::metric_name(""), LabelMatcher::equal("job", "api")];
    let found = storage
        .metric_reader
        .get_time_series(&TimeSeriesQueryParameters::new(matchers.clone(), 0, 100), &cancel)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].labels, labels(&[("job", "api")]));

    let names = storage
        .metric_reader
        .get_label_names(
            &LabelNamesQueryParameters {
                matchers,
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(names, vec!["job"]);
}

async fn label_listings(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();
    let reader = &storage.metric_reader;

    let names = reader
        .get_label_names(&LabelNamesQueryParameters::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(names, vec!["__name__", "job", "method"]);

    let worker_names = reader
        .get_label_names(
            &LabelNamesQueryParameters {
                matchers: vec![LabelMatcher::equal("job", "worker")],
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(worker_names, vec!["__name__", "job"]);

    let jobs = reader
        .get_label_values(
            &LabelValuesQueryParameters {
                label_name: "job".into(),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(jobs, vec!["api", "worker"]);

    let recent_jobs = reader
        .get_label_values(
            &LabelValuesQueryParameters {
                label_name: "job".into(),
                start_sec: Some(90),
                limit: Some(5),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(recent_jobs, vec!["worker"]);

    let limited = reader
        .get_label_values(
            &LabelValuesQueryParameters {
                label_name: "__name__".into(),
                limit: Some(1),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(limited, vec!["http_requests_total"]);
}

async fn metadata_first_write_wins(storage: Storage) {
    let storage = seeded(storage).await;
    let cancel = CancellationToken::new();

    storage
        .metadata_writer
        .write(
            &[
                metadata("http_requests_total", "api", MetricType::Gauge, "rewritten"),
                metadata("http_requests_total", "gateway", MetricType::Counter, "Proxied"),
            ],
            &cancel,
        )
        .await
        .unwrap();

    let reader = &storage.metric_metadata_reader;
    let all = reader
        .get_metric_metadata(&MetricMetadataQueryParameters::default(), &cancel)
        .await
        .unwrap();
    let keys: Vec<(&str, &str)> = all
        .iter()
        .map(|m| (m.metric_name.as_str(), m.service_name.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("http_requests_total", "api"),
            ("http_requests_total", "gateway"),
            ("queue_depth", "worker"),
        ]
    );
    assert_eq!(all[0].help, "Requests served");
    assert_eq!(all[0].metric_type, MetricType::Counter);

    let limited = reader
        .get_metric_metadata(
            &MetricMetadataQueryParameters {
                metric_name: None,
                limit: Some(1),
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert!(limited.iter().all(|m| m.metric_name == "http_requests_total"));

    let one = reader
        .get_metric_metadata(
            &MetricMetadataQueryParameters {
                metric_name: Some("queue_depth".into()),
                limit: None,
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
}

async fn cancelled_calls_fail(storage: Storage) {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let write = storage.span_writer.write(&sample_spans(), &cancel).await;
    assert!(matches!(write, Err(LanternError::Cancelled)));

    let services = storage.span_reader.get_services(&cancel).await;
    assert!(matches!(services, Err(LanternError::Cancelled)));

    let series = storage
        .metric_reader
        .get_time_series(&TimeSeriesQueryParameters::new(name_matcher("x"), 0, 1), &cancel)
        .await;
    assert!(matches!(series, Err(LanternError::Cancelled)));
}

macro_rules! storage_contract {
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            fn storage() -> Storage {
                $make
            }

            #[tokio::test]
            async fn trace_is_sorted_by_start() {
                super::trace_is_sorted_by_start(storage()).await;
            }

            #[tokio::test]
            async fn get_span_by_id() {
                super::get_span_by_id(storage()).await;
            }

            #[tokio::test]
            async fn services_and_operations() {
                super::services_and_operations(storage()).await;
            }

            #[tokio::test]
            async fn trace_search() {
                super::trace_search(storage()).await;
            }

            #[tokio::test]
            async fn traces_by_id_keep_request_order() {
                super::traces_by_id_keep_request_order(storage()).await;
            }

            #[tokio::test]
            async fn time_series_selection() {
                super::time_series_selection(storage()).await;
            }

            #[tokio::test]
            async fn repeated_writes_merge() {
                super::repeated_writes_merge(storage()).await;
            }

            #[tokio::test]
            async fn empty_name_matches_unnamed_series() {
                super::empty_name_matches_unnamed_series(storage()).await;
            }

            #[tokio::test]
            async fn label_listings() {
                super::label_listings(storage()).await;
            }

            #[tokio::test]
            async fn metadata_first_write_wins() {
                super::metadata_first_write_wins(storage()).await;
            }

            #[tokio::test]
            async fn cancelled_calls_fail() {
                super::cancelled_calls_fail(storage()).await;
            }
        }
    };
}

storage_contract!(memory, Storage::from_backend(Arc::new(MemoryStorage::new())));
storage_contract!(document, Storage::from_backend(Arc::new(DocumentStorage::in_memory())));

#[tokio::test]
async fn document_segments_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = DocumentStorage::open(dir.path()).unwrap();
        seeded(Storage::from_backend(Arc::new(store))).await;
    }

    let reopened = Storage::from_backend(Arc::new(DocumentStorage::open(dir.path()).unwrap()));
    let cancel = CancellationToken::new();
    assert_eq!(
        reopened.span_reader.get_services(&cancel).await.unwrap(),
        vec!["backend", "frontend"]
    );
    let series = reopened
        .metric_reader
        .get_time_series(
            &TimeSeriesQueryParameters::new(name_matcher("http_requests_total"), 0, 60),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(series.len(), 2);

    // Replayed metadata keys still win over later writes.
    reopened
        .metadata_writer
        .write(
            &[metadata("queue_depth", "worker", MetricType::Counter, "changed")],
            &cancel,
        )
        .await
        .unwrap();
    let records = reopened
        .metric_metadata_reader
        .get_metric_metadata(
            &MetricMetadataQueryParameters {
                metric_name: Some("queue_depth".into()),
                limit: None,
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].help, "Jobs waiting");
}
