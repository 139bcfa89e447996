use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::intent::Intent;
use crate::sources::types::{FetchLimits, ListingSchema, RawListing, SourceAdapter};
use crate::sources::{check_status, classify_reqwest, matches_intent_category};

/// JSON search API: one request per search query, results merged by product key.
pub struct JsonCatalogAdapter {
    id: String,
    mode: Mode,
    currency: Option<String>,
}

enum Mode {
    Fixture(String),
    Http {
        endpoint: String,
        query_param: String,
        client: reqwest::Client,
    },
}

impl JsonCatalogAdapter {
    pub fn from_fixture_str(id: &str, json: &str, currency: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Fixture(json.to_string()),
            currency,
        }
    }

    pub fn from_url(
        id: &str,
        endpoint: &str,
        query_param: &str,
        client: reqwest::Client,
        currency: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Http {
                endpoint: endpoint.to_string(),
                query_param: query_param.to_string(),
                client,
            },
            currency,
        }
    }

    async fn search(
        &self,
        endpoint: &str,
        query_param: &str,
        client: &reqwest::Client,
        query: &str,
        limits: &FetchLimits,
        deadline: Instant,
    ) -> Result<Vec<Value>, SourceError> {
        let _slot = limits.pacer.acquire(deadline).await?;
        let resp = client
            .get(endpoint)
            .query(&[(query_param, query)])
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;
        let body: Value = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::unavailable(format!("malformed catalog response: {e}")))?;
        extract_items(body)
    }

    fn into_listings(&self, items: Vec<Value>, intent: &Intent, max: usize) -> Vec<RawListing> {
        let fetched_at = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for item in items {
            if out.len() >= max {
                break;
            }
            if !item.is_object() {
                // still forwarded: the normalizer counts it as malformed
                out.push(self.listing(item, fetched_at));
                continue;
            }
            if !matches_intent_category(intent, &category_text(&item)) {
                continue;
            }
            if !seen.insert(product_key(&item)) {
                continue;
            }
            out.push(self.listing(item, fetched_at));
        }
        out
    }

    fn listing(&self, payload: Value, fetched_at: chrono::DateTime<Utc>) -> RawListing {
        RawListing {
            source_id: self.id.clone(),
            schema: ListingSchema::JsonCatalog,
            payload,
            fetched_at,
            currency_hint: self.currency.clone(),
        }
    }
}

/// Accepts `{"results": [...]}`, `{"products": [...]}` or a bare array.
fn extract_items(body: Value) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["results", "products", "items"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            Err(SourceError::unavailable("catalog response has no result list"))
        }
        _ => Err(SourceError::unavailable("catalog response is not JSON object or array")),
    }
}

fn category_text(item: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    for key in ["category", "name", "title"] {
        if let Some(s) = item.get(key).and_then(Value::as_str) {
            parts.push(s.to_string());
        }
    }
    if let Some(Value::Array(crumbs)) = item.get("breadcrumbs") {
        parts.extend(crumbs.iter().filter_map(Value::as_str).map(str::to_string));
    }
    parts.join(" ")
}

fn product_key(item: &Value) -> String {
    for key in ["id", "sku", "url"] {
        match item.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return format!("{key}:{s}"),
            Some(Value::Number(n)) => return format!("{key}:{n}"),
            _ => {}
        }
    }
    format!(
        "name:{}|{}",
        item.get("name").unwrap_or(&Value::Null),
        item.get("price").unwrap_or(&Value::Null)
    )
}

#[async_trait]
impl SourceAdapter for JsonCatalogAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn schema(&self) -> ListingSchema {
        ListingSchema::JsonCatalog
    }

    async fn fetch(
        &self,
        intent: &Intent,
        limits: &FetchLimits,
        deadline: Instant,
    ) -> Result<Vec<RawListing>, SourceError> {
        match &self.mode {
            Mode::Fixture(s) => {
                let _slot = limits.pacer.acquire(deadline).await?;
                let body: Value = serde_json::from_str(s).map_err(|e| {
                    SourceError::unavailable(format!("malformed catalog response: {e}"))
                })?;
                let items = extract_items(body)?;
                Ok(self.into_listings(items, intent, limits.max_listings))
            }
            Mode::Http {
                endpoint,
                query_param,
                client,
            } => {
                // the pacer bounds how many of these are in flight
                let searches = intent
                    .search_queries
                    .iter()
                    .take(limits.max_queries.max(1))
                    .map(|q| self.search(endpoint, query_param, client, q, limits, deadline));
                let results: Vec<Result<Vec<Value>, SourceError>> = join_all(searches).await;

                let mut items = Vec::new();
                let mut first_err: Option<SourceError> = None;
                let mut ok_queries = 0usize;
                for r in results {
                    match r {
                        Ok(mut v) => {
                            ok_queries += 1;
                            items.append(&mut v);
                        }
                        Err(e) => {
                            tracing::warn!(target: "crawl", source = %self.id, error = %e, "catalog query failed");
                            counter!("source_query_errors_total", "source" => self.id.clone())
                                .increment(1);
                            // a rate limit outranks other failures so the retry honours it
                            if first_err.is_none() || matches!(e, SourceError::RateLimited { .. }) {
                                first_err = Some(e);
                            }
                        }
                    }
                }
                if ok_queries == 0 {
                    return Err(first_err.unwrap_or_else(|| {
                        SourceError::unavailable("intent has no search queries")
                    }));
                }
                Ok(self.into_listings(items, intent, limits.max_listings))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::intent::parse_intent;
    use crate::sources::pacer::Pacer;

    fn limits(max: usize) -> FetchLimits {
        FetchLimits {
            max_listings: max,
            max_queries: 3,
            pacer: Arc::new(Pacer::new(2, Duration::ZERO)),
        }
    }

    #[tokio::test]
    async fn fixture_results_are_deduplicated_and_capped() {
        let body = r#"{"results": [
            {"id": "a1", "name": "Zen Laptop 14", "price": 820.0, "category": "Laptops"},
            {"id": "a1", "name": "Zen Laptop 14", "price": 820.0, "category": "Laptops"},
            {"id": "a2", "name": "Zen Laptop 16", "price": 890.0},
            {"id": "a3", "name": "Zen Phone", "price": 300.0, "category": "Smartphones"},
            {"id": "a4", "name": "Zen Laptop 13", "price": 610.0}
        ]}"#;
        let a = JsonCatalogAdapter::from_fixture_str("cat", body, None);
        let intent = parse_intent("laptop").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);

        let out = a.fetch(&intent, &limits(10), deadline).await.unwrap();
        let ids: Vec<_> = out.iter().map(|l| l.payload["id"].clone()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a4"]);

        let capped = a.fetch(&intent, &limits(2), deadline).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert!(capped.iter().all(|l| l.schema == ListingSchema::JsonCatalog));
    }

    /// Local catalog answering per query: `ok` lists two laptops, `limited` is a 429 with
    /// `Retry-After: 7`, `broken` is a 200 with a non-JSON body, anything else a 500.
    async fn catalog_server() -> String {
        use std::collections::HashMap;

        use axum::{
            extract::Query,
            http::{header, StatusCode},
            response::{IntoResponse, Response},
            routing::get,
            Router,
        };

        async fn search(Query(p): Query<HashMap<String, String>>) -> Response {
            match p.get("q").map(String::as_str) {
                Some("ok") => axum::Json(serde_json::json!({"results": [
                    {"id": "h1", "name": "Zen Laptop 14", "price": 820.0},
                    {"id": "h2", "name": "Zen Laptop 16", "price": 890.0}
                ]}))
                .into_response(),
                Some("limited") => {
                    (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "7")], "slow down")
                        .into_response()
                }
                Some("broken") => (StatusCode::OK, "<html>oops</html>").into_response(),
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/search", get(search));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/search")
    }

    async fn fetch_queries(queries: &[&str]) -> Result<Vec<RawListing>, SourceError> {
        let endpoint = catalog_server().await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let a = JsonCatalogAdapter::from_url("live", &endpoint, "q", client, None);
        let mut intent = parse_intent("laptop").unwrap();
        intent.search_queries = queries.iter().map(|q| q.to_string()).collect();
        let deadline = Instant::now() + Duration::from_secs(5);
        a.fetch(&intent, &limits(10), deadline).await
    }

    #[tokio::test]
    async fn http_fetch_keeps_results_when_some_queries_fail() {
        let out = fetch_queries(&["ok", "limited", "broken"]).await.unwrap();
        let ids: Vec<_> = out.iter().map(|l| l.payload["id"].clone()).collect();
        assert_eq!(ids, vec!["h1", "h2"]);
        assert!(out.iter().all(|l| l.source_id == "live"));
    }

    #[tokio::test]
    async fn http_rate_limit_outranks_other_failures() {
        let err = fetch_queries(&["broken", "limited", "down"]).await.unwrap_err();
        assert_eq!(
            err,
            SourceError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn http_malformed_body_and_server_error_are_unavailable() {
        match fetch_queries(&["broken"]).await.unwrap_err() {
            SourceError::Unavailable { reason } => assert!(reason.contains("malformed"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
        match fetch_queries(&["down"]).await.unwrap_err() {
            SourceError::Unavailable { reason } => assert!(reason.contains("500"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_object_items_respect_the_listing_cap() {
        let body = r#"[{"id": "a1", "name": "Zen Laptop 14", "price": 820.0}, 1, 2, 3]"#;
        let a = JsonCatalogAdapter::from_fixture_str("cat", body, None);
        let intent = parse_intent("laptop").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let out = a.fetch(&intent, &limits(2), deadline).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn accepts_bare_arrays_and_rejects_scalars() {
        assert_eq!(extract_items(serde_json::json!([1, 2])).unwrap().len(), 2);
        assert!(extract_items(serde_json::json!({"total": 0})).is_err());
        assert!(extract_items(serde_json::json!("nope")).is_err());
    }
}
