// tests/aggregate_combine.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use brand_data_hub::source::{FetchError, FetchPage, FetchParams, RecordSource};
use brand_data_hub::{combine, SortDirection, SortKey, SortSpec};
use common::MockSource;
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn run(
    sources: Vec<Arc<dyn RecordSource>>,
    key_field: &str,
    sort: SortSpec,
) -> brand_data_hub::Aggregation {
    combine(
        &sources,
        &FetchParams::new(),
        key_field,
        &sort,
        &CancellationToken::new(),
    )
    .await
}

#[tokio::test]
async fn records_without_key_never_form_entities() {
    let src = MockSource::ok(
        "metrics",
        vec![
            json!({"brand": "Azuki", "total_volume": 3}),
            json!({"total_volume": 99}),
            json!({"brand": ""}),
            json!("not an object"),
        ],
    )
    .arc();

    let agg = run(vec![src], "brand", SortSpec::by_name()).await;
    assert_eq!(agg.entities.len(), 1);
    assert_eq!(agg.entities[0].key.as_str(), "azuki");
    assert_eq!(agg.skipped, 3);
    assert!(agg.failures.is_empty());
}

#[tokio::test]
async fn keys_differing_in_case_and_whitespace_merge() {
    let a = MockSource::ok("metadata", vec![json!({"brand": "BrandX", "desc": "x"})]).arc();
    let b = MockSource::ok("metrics", vec![json!({"brand": "brandx ", "total_volume": 1})]).arc();

    let agg = run(vec![a, b], "brand", SortSpec::by_name()).await;
    assert_eq!(agg.entities.len(), 1);
    let e = &agg.entities[0];
    assert_eq!(e.key.as_str(), "brandx");
    assert_eq!(e.name, "BrandX");
    assert!(e.source("metadata").is_some());
    assert!(e.source("metrics").is_some());
}

#[tokio::test]
async fn id_join_scenario_yields_single_combined_entity() {
    let s1 = MockSource::ok("source1", vec![json!({"id": "A", "vol": 10})]).arc();
    let s2 = MockSource::ok("source2", vec![json!({"id": "a", "rev": 5})]).arc();

    let agg = run(vec![s1, s2], "id", SortSpec::by_name()).await;
    assert_eq!(agg.entities.len(), 1);
    let e = &agg.entities[0];
    assert_eq!(e.key.as_str(), "a");
    assert_eq!(e.sources.len(), 2);
    assert_eq!(e.sources["source1"].as_value(), &json!({"id": "A", "vol": 10}));
    assert_eq!(e.sources["source2"].as_value(), &json!({"id": "a", "rev": 5}));
}

#[tokio::test(start_paused = true)]
async fn result_is_independent_of_completion_order() {
    let recs1 = vec![json!({"brand": "a", "v": 1}), json!({"brand": "b", "v": 2})];
    let recs2 = vec![json!({"brand": "B", "w": 3}), json!({"brand": "c", "w": 4})];
    let sort = SortSpec::parse("v", "desc").unwrap();

    // first source slow
    let fast_second = run(
        vec![
            MockSource::ok("s1", recs1.clone()).delayed(Duration::from_millis(50)).arc(),
            MockSource::ok("s2", recs2.clone()).arc(),
        ],
        "brand",
        sort.clone(),
    )
    .await;

    // second source slow
    let fast_first = run(
        vec![
            MockSource::ok("s1", recs1).arc(),
            MockSource::ok("s2", recs2).delayed(Duration::from_millis(50)).arc(),
        ],
        "brand",
        sort,
    )
    .await;

    assert_eq!(fast_second.entities, fast_first.entities);
    let keys: Vec<&str> = fast_first.entities.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
}

#[tokio::test]
async fn failing_source_is_recorded_and_others_still_merge() {
    let ok = MockSource::ok("metrics", vec![json!({"brand": "Pudgy"})]).arc();
    let bad = MockSource::failing("profile").arc();

    let agg = run(vec![ok, bad], "brand", SortSpec::by_name()).await;
    assert_eq!(agg.succeeded, 1);
    assert_eq!(agg.failures.len(), 1);
    assert_eq!(agg.failures[0].source, "profile");
    assert!(!agg.all_failed());
    // partial entity: only one of two sources contributed
    assert_eq!(agg.entities.len(), 1);
    assert_eq!(agg.entities[0].sources.len(), 1);
}

#[tokio::test]
async fn duplicate_key_from_same_source_keeps_last_record() {
    let src = MockSource::ok(
        "metrics",
        vec![
            json!({"brand": "Doodles", "v": 1}),
            json!({"brand": "DOODLES", "v": 2}),
        ],
    )
    .arc();

    let agg = run(vec![src], "brand", SortSpec::by_name()).await;
    assert_eq!(agg.entities.len(), 1);
    let rec = agg.entities[0].source("metrics").unwrap();
    assert_eq!(rec.field("v"), Some(&json!(2)));
}

#[tokio::test]
async fn missing_numeric_field_sorts_as_zero() {
    let src = MockSource::ok(
        "m",
        vec![
            json!({"brand": "neg", "vol": -3}),
            json!({"brand": "missing"}),
            json!({"brand": "pos", "vol": 5}),
        ],
    )
    .arc();
    let sort = SortSpec::new(
        SortKey::Field {
            source: Some("m".into()),
            field: "vol".into(),
        },
        SortDirection::Desc,
    );

    let agg = run(vec![src], "brand", sort).await;
    let keys: Vec<&str> = agg.entities.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["pos", "missing", "neg"]);
}

struct Rejecting;

#[async_trait::async_trait]
impl RecordSource for Rejecting {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn fetch(
        &self,
        _params: &FetchParams,
        _cancel: &CancellationToken,
    ) -> Result<FetchPage, FetchError> {
        Err(FetchError::Transport("connection reset".into()))
    }
}

#[tokio::test]
async fn all_sources_failing_produces_no_entities() {
    let agg = run(
        vec![
            Arc::new(Rejecting) as Arc<dyn RecordSource>,
            MockSource::failing("other").arc(),
        ],
        "brand",
        SortSpec::by_name(),
    )
    .await;
    assert!(agg.entities.is_empty());
    assert!(agg.all_failed());
    assert_eq!(agg.failures[0].reason, "request failed: connection reset");
}
