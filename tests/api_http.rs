mod common;

use std::sync::Arc;
use std::time::Duration;

use http::{Request, StatusCode};
use shuttle_axum::axum::{body::Body, Router};
use tower::ServiceExt;

use buysmart_pipeline::history::History;
use buysmart_pipeline::rank::DisabledOverlay;
use buysmart_pipeline::{create_router, AppState};

use common::{shop_a, shop_b, HangingSource};

fn app(sources: Vec<Arc<dyn buysmart_pipeline::sources::SourceAdapter>>) -> Router {
    let history = Arc::new(History::with_capacity(20));
    let pipeline = common::pipeline(sources, Duration::from_millis(300), Arc::new(DisabledOverlay))
        .with_store(history.clone());
    create_router(AppState::new(Arc::new(pipeline), history), None)
}

async fn body_json(resp: shuttle_axum::axum::response::Response) -> serde_json::Value {
    let bytes = shuttle_axum::axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn recommend_request(query: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/recommend")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "query": query }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let resp = app(vec![shop_a()])
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn recommend_returns_the_set_and_history_lists_it() {
    let app = app(vec![shop_a(), shop_b()]);

    let resp = app
        .clone()
        .oneshot(recommend_request(common::LAPTOP_QUERY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["recommendations"].as_array().unwrap().len(), 6);
    assert_eq!(v["recommendations"][0]["rank"], 1);
    assert_eq!(v["trace"]["overlay"]["status"], "disabled");
    assert!(v["quality"]["sources"].as_array().unwrap().len() == 2);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/history?limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let h = body_json(resp).await;
    assert_eq!(h.as_array().unwrap().len(), 1);
    assert_eq!(h[0]["run_id"], v["run_id"]);
    assert_eq!(h[0]["data_grade"], "full");
}

#[tokio::test]
async fn invalid_intent_is_422() {
    let resp = app(vec![shop_a()])
        .oneshot(recommend_request("what is the weather tomorrow"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = body_json(resp).await;
    assert_eq!(v["error"], "invalid_intent");
    assert!(v["message"].as_str().unwrap().starts_with("invalid intent"));
}

#[tokio::test(start_paused = true)]
async fn no_data_is_503_with_source_reports() {
    let resp = app(vec![Arc::new(HangingSource("down"))])
        .oneshot(recommend_request(common::LAPTOP_QUERY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let v = body_json(resp).await;
    assert_eq!(v["error"], "no_data_available");
    assert_eq!(v["sources"][0]["source_id"], "down");
    assert_eq!(v["sources"][0]["state"], "timed_out");
}

#[tokio::test]
async fn no_eligible_offers_is_422() {
    let resp = app(vec![shop_a(), shop_b()])
        .oneshot(recommend_request("laptop under $100"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["error"], "no_eligible_offers");
}

#[tokio::test]
async fn debug_sources_lists_configured_adapters() {
    let resp = app(vec![shop_a(), shop_b()])
        .oneshot(
            Request::builder()
                .uri("/debug/sources")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["sources"], serde_json::json!(["shop-a", "shop-b"]));
    assert_eq!(v["overlay"], "disabled");
    assert_eq!(v["runs_recorded"], 0);
}
