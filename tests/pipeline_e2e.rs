mod common;

use std::sync::Arc;
use std::time::Duration;

use buysmart_pipeline::error::OverlayError;
use buysmart_pipeline::history::History;
use buysmart_pipeline::rank::{DisabledOverlay, MockOverlay};
use buysmart_pipeline::recommendation::{
    DataGrade, OverlayStatus, RankingGrade, RecommendationSet, TaskState,
};
use buysmart_pipeline::PipelineError;

use common::{shop_a, shop_b, HangingSource, LAPTOP_QUERY};

fn state_of(set: &RecommendationSet, id: &str) -> TaskState {
    set.quality
        .sources
        .iter()
        .find(|s| s.source_id == id)
        .unwrap()
        .state
}

#[tokio::test]
async fn laptop_example_ranks_six_offers_from_two_sources() {
    let p = common::pipeline(
        vec![shop_a(), shop_b()],
        Duration::from_secs(5),
        Arc::new(DisabledOverlay),
    );
    let set = p.recommend(LAPTOP_QUERY).await.unwrap();

    assert_eq!(set.recommendations.len(), 6);
    assert_eq!(state_of(&set, "shop-a"), TaskState::Succeeded);
    assert_eq!(state_of(&set, "shop-b"), TaskState::Succeeded);
    assert_eq!(set.quality.listings_seen, 8);
    assert_eq!(set.quality.excluded.len(), 2);

    let names: Vec<&str> = set
        .recommendations
        .iter()
        .map(|r| r.scored.offer.identity.name.as_str())
        .collect();
    assert!(!names.iter().any(|n| n.starts_with("HP Pavilion")));
    assert!(!names.iter().any(|n| n.starts_with("Samsung Galaxy")));
    assert!(set
        .recommendations
        .iter()
        .all(|r| r.scored.offer.price.amount < 900.0));

    assert_eq!(set.trace.overlay, OverlayStatus::Disabled);
    let grade = set.grade();
    assert_eq!(grade.data, DataGrade::Full);
    assert_eq!(grade.ranking, RankingGrade::DeterministicOnly);
    assert_eq!(set.best_overall.as_deref(), Some(set.offer_ids()[0]));
    assert!(set.best_value.is_some());
    assert!(set.summary_markdown.contains("Best value"));
}

#[tokio::test(start_paused = true)]
async fn hung_source_times_out_and_the_rest_is_ranked() {
    let p = common::pipeline(
        vec![shop_a(), Arc::new(HangingSource("slow"))],
        Duration::from_millis(300),
        Arc::new(DisabledOverlay),
    );
    let set = p.recommend(LAPTOP_QUERY).await.unwrap();

    assert_eq!(state_of(&set, "slow"), TaskState::TimedOut);
    assert_eq!(state_of(&set, "shop-a"), TaskState::Succeeded);
    assert!(set.quality.deadline_hit);
    assert_eq!(set.quality.incomplete_sources().len(), 1);
    assert_eq!(set.grade().data, DataGrade::Partial);
    assert_eq!(set.recommendations.len(), 4);
    assert!(set
        .recommendations
        .iter()
        .all(|r| r.scored.offer.provenance.source_id == "shop-a"));
    assert!(set.quality.caveats.iter().any(|c| c.contains("slow")));
}

#[tokio::test(start_paused = true)]
async fn zero_listings_is_no_data_available() {
    let p = common::pipeline(
        vec![Arc::new(HangingSource("a")), Arc::new(HangingSource("b"))],
        Duration::from_millis(200),
        Arc::new(DisabledOverlay),
    );
    match p.recommend(LAPTOP_QUERY).await {
        Err(PipelineError::NoDataAvailable { sources }) => {
            assert_eq!(sources.len(), 2);
            assert!(sources.iter().all(|s| s.state == TaskState::TimedOut));
        }
        other => panic!("expected NoDataAvailable, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn slow_overlay_leaves_baseline_untouched() {
    let p = common::pipeline(
        vec![shop_a(), shop_b()],
        Duration::from_secs(5),
        Arc::new(MockOverlay::Delayed(Duration::from_secs(30))),
    );
    let set = p.recommend(LAPTOP_QUERY).await.unwrap();
    let order: Vec<String> = set.offer_ids().into_iter().map(str::to_string).collect();
    assert_eq!(order, set.trace.baseline_order);
    assert!(matches!(set.trace.overlay, OverlayStatus::Unavailable { .. }));
    assert_eq!(set.grade().ranking, RankingGrade::DeterministicOnly);
    assert!(set.recommendations.iter().all(|r| r.justification.is_none()));
}

#[tokio::test]
async fn failing_overlay_is_recorded_with_its_reason() {
    let p = common::pipeline(
        vec![shop_a(), shop_b()],
        Duration::from_secs(5),
        Arc::new(MockOverlay::Fixed(Err(OverlayError::ProviderUnavailable(
            "quota".into(),
        )))),
    );
    let set = p.recommend(LAPTOP_QUERY).await.unwrap();
    match &set.trace.overlay {
        OverlayStatus::Unavailable { reason } => assert!(reason.contains("quota")),
        other => panic!("unexpected overlay status {other:?}"),
    }
    let order: Vec<String> = set.offer_ids().into_iter().map(str::to_string).collect();
    assert_eq!(order, set.trace.baseline_order);
}

#[tokio::test]
async fn applied_overlay_grades_reasoned_and_run_is_stored() {
    let history = Arc::new(History::with_capacity(10));
    let p = common::pipeline(
        vec![shop_a(), shop_b()],
        Duration::from_secs(5),
        Arc::new(MockOverlay::Echo),
    )
    .with_store(history.clone());
    let set = p.recommend(LAPTOP_QUERY).await.unwrap();

    assert_eq!(set.trace.overlay, OverlayStatus::Applied);
    assert_eq!(set.grade().ranking, RankingGrade::Reasoned);
    assert!(set.recommendations.iter().all(|r| r.justification.is_some()));

    let runs = history.snapshot_last_n(5);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, set.run_id);
    assert_eq!(runs[0].offers, 6);
}

#[tokio::test]
async fn recommendation_set_survives_json_round_trip() {
    let p = common::pipeline(
        vec![shop_a(), shop_b()],
        Duration::from_secs(5),
        Arc::new(MockOverlay::Echo),
    );
    let set = p.recommend(LAPTOP_QUERY).await.unwrap();
    let json = serde_json::to_string(&set).unwrap();
    let back: RecommendationSet = serde_json::from_str(&json).unwrap();
    assert_eq!(back, set);
}

#[tokio::test]
async fn unusable_queries_and_empty_results_are_typed_errors() {
    let p = common::pipeline(
        vec![shop_a(), shop_b()],
        Duration::from_secs(5),
        Arc::new(DisabledOverlay),
    );

    let err = p.recommend("   ").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_intent");

    match p.recommend("laptop under $100").await {
        Err(PipelineError::NoEligibleOffers { considered, excluded }) => {
            assert_eq!(considered, 8);
            assert_eq!(excluded, 8);
        }
        other => panic!("expected NoEligibleOffers, got {other:?}"),
    }
}
