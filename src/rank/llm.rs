//! Language-model overlay: provider abstraction + file cache + daily limit.
//!
//! [`LlmOverlay`] renders the overlay request as a prompt, sends it through a
//! [`CachingClient`] and parses whatever text comes back with
//! [`parse_overlay_text`]. Validation of the proposed order happens in the engine.

use std::fs;
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::overlay::{
    parse_overlay_text, DisabledOverlay, MockOverlay, OverlayRequest, OverlayResponse,
    ReasoningOverlay,
};
use crate::config::OverlayConfig;
use crate::error::OverlayError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You review a ranked list of product offers for a shopper. \
You may reorder offers, but no offer may move more than max_rank_shift positions. \
Reply with JSON only: {\"order\": [offer ids], \"justifications\": {id: reason}, \
\"tradeoffs\": [{\"offers\": [ids], \"note\": text}], \"summary\": text}.";

pub type DynOverlay = Arc<dyn ReasoningOverlay>;

/// Factory: build the overlay according to config and environment.
///
/// * `AI_TEST_MODE=mock` → deterministic echo overlay.
/// * `enabled = false` → disabled overlay.
/// * `provider = "mock"` → echo overlay; `"openai"` → cached chat-completions overlay.
pub fn build_overlay(cfg: &OverlayConfig) -> anyhow::Result<DynOverlay> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockOverlay::Echo));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledOverlay));
    }
    match cfg.provider.as_str() {
        "mock" => Ok(Arc::new(MockOverlay::Echo)),
        "openai" => {
            let provider = OpenAiProvider::new(cfg)?;
            let client = CachingClient::new(provider, PathBuf::from(&cfg.cache_dir), cfg.daily_limit);
            Ok(Arc::new(LlmOverlay::new(client)))
        }
        other => anyhow::bail!("unsupported overlay provider: {other}"),
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: one remote completion for one prompt.
pub trait Provider: Send + Sync + 'static {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, OverlayError>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible chat completions.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(cfg: &OverlayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("buysmart-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("building overlay http client")?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            endpoint: cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
        })
    }
}

impl Provider for OpenAiProvider {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, OverlayError>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(OverlayError::ProviderUnavailable("missing api key".into()));
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: String,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    Msg {
                        role: "user",
                        content: prompt,
                    },
                ],
                temperature: 0.2,
                max_tokens: 900,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        OverlayError::Timeout
                    } else {
                        OverlayError::ProviderUnavailable(e.to_string())
                    }
                })?;

            if !resp.status().is_success() {
                return Err(OverlayError::ProviderUnavailable(format!(
                    "http status {}",
                    resp.status()
                )));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| OverlayError::MalformedResponse(e.to_string()))?;
            body.choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| OverlayError::MalformedResponse("empty completion".into()))
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Canned completion text; used to exercise parsing, caching and limits.
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: String,
}

impl Provider for MockProvider {
    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, OverlayError>> + Send + 'a>> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching client wrapper (file cache + daily limit)
// ------------------------------------------------------------

pub struct CachingClient<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> CachingClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            tracing::warn!(target: "overlay", dir = %cache_dir.display(), error = %e, "overlay cache dir unavailable");
        }
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&cache_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            counter,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.name()
    }

    /// Cache hits are free; only successful remote calls count against the limit.
    pub async fn complete(&self, prompt: &str) -> Result<String, OverlayError> {
        let key = cache_key(prompt);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            tracing::debug!(target: "overlay", key = %key, "overlay cache hit");
            return Ok(hit);
        }

        {
            let mut g = self
                .counter
                .lock()
                .map_err(|_| OverlayError::ProviderUnavailable("daily counter poisoned".into()))?;
            if g.is_expired() {
                g.reset_to_today();
                self.persist_counter(&g);
            }
            if g.count >= self.daily_limit_max {
                return Err(OverlayError::ProviderUnavailable(
                    "daily overlay limit reached".into(),
                ));
            }
        }

        let fresh = self.inner.complete(prompt).await?;
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &fresh) {
            tracing::warn!(target: "overlay", error = %e, "overlay cache write failed");
        }
        if let Ok(mut g) = self.counter.lock() {
            g.count = g.count.saturating_add(1);
            self.persist_counter(&g);
        }
        Ok(fresh)
    }

    fn persist_counter(&self, dc: &DailyCounter) {
        if let Err(e) = save_daily_counter(&self.cache_dir, dc) {
            tracing::warn!(target: "overlay", dir = %self.cache_dir.display(), error = %e, "overlay daily counter not saved");
        }
    }
}

/// Overlay backed by a (cached, rate-limited) language model provider.
pub struct LlmOverlay<P: Provider> {
    client: CachingClient<P>,
}

impl<P: Provider> LlmOverlay<P> {
    pub fn new(client: CachingClient<P>) -> Self {
        Self { client }
    }
}

pub fn render_prompt(request: &OverlayRequest) -> Result<String, OverlayError> {
    serde_json::to_string_pretty(request)
        .map_err(|e| OverlayError::MalformedResponse(format!("request encoding: {e}")))
}

#[async_trait]
impl<P: Provider> ReasoningOverlay for LlmOverlay<P> {
    fn name(&self) -> &str {
        self.client.provider_name()
    }

    async fn evaluate(
        &self,
        request: &OverlayRequest,
        deadline: Instant,
    ) -> Result<OverlayResponse, OverlayError> {
        let prompt = render_prompt(request)?;
        let text = tokio::time::timeout_at(deadline, self.client.complete(&prompt))
            .await
            .map_err(|_| OverlayError::Timeout)??;
        parse_overlay_text(&text)
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

fn cache_key(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    digest.iter().take(12).map(|b| format!("{b:02x}")).collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.txt"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<String> {
    let mut file = fs::File::open(cache_path(dir, key)).ok()?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    Some(buf)
}

fn write_cache_file(dir: &Path, key: &str, value: &str) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("txt.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(value.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }

    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::intent::parse_intent;

    struct Counting {
        calls: Arc<AtomicUsize>,
        text: String,
    }

    impl Provider for Counting {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, OverlayError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let out = self.text.clone();
            Box::pin(async move { Ok(out) })
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn request() -> OverlayRequest {
        let intent = parse_intent("laptop under $900").unwrap();
        OverlayRequest::new(&intent, &[], &BTreeMap::new(), 2)
    }

    #[tokio::test]
    async fn cache_hits_do_not_call_provider_again() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = CachingClient::new(
            Counting {
                calls: calls.clone(),
                text: "```json\n{\"order\": []}\n```".into(),
            },
            dir.path().to_path_buf(),
            5,
        );
        let overlay = LlmOverlay::new(client);
        let req = request();
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(overlay.evaluate(&req, deadline).await.unwrap().order.is_empty());
        assert!(overlay.evaluate(&req, deadline).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn daily_limit_blocks_remote_calls() {
        let dir = tempfile::tempdir().unwrap();
        let client = CachingClient::new(
            MockProvider {
                fixed: "{\"order\": []}".into(),
            },
            dir.path().to_path_buf(),
            1,
        );
        assert!(client.complete("first").await.is_ok());
        let err = client.complete("second").await.unwrap_err();
        assert!(matches!(err, OverlayError::ProviderUnavailable(_)));
        // cached prompts are still served
        assert!(client.complete("first").await.is_ok());
    }

    #[tokio::test]
    async fn unparseable_completion_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = LlmOverlay::new(CachingClient::new(
            MockProvider {
                fixed: "I'd rather not.".into(),
            },
            dir.path().to_path_buf(),
            5,
        ));
        let err = overlay
            .evaluate(&request(), Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::MalformedResponse(_)));
    }

    struct Hanging;

    impl Provider for Hanging {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, OverlayError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evaluate_gives_up_at_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = LlmOverlay::new(CachingClient::new(Hanging, dir.path().to_path_buf(), 5));
        let err = overlay
            .evaluate(&request(), Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::Timeout));
    }

    #[tokio::test]
    async fn unwritable_cache_dir_still_serves_and_counts() {
        // a plain file where the cache directory should be
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let client = CachingClient::new(
            MockProvider {
                fixed: "{\"order\": []}".into(),
            },
            blocker.path().to_path_buf(),
            1,
        );
        assert!(client.complete("first").await.is_ok());
        let err = client.complete("second").await.unwrap_err();
        assert!(matches!(err, OverlayError::ProviderUnavailable(_)));
    }

    #[serial_test::serial]
    #[test]
    fn factory_respects_enabled_and_test_mode() {
        std::env::remove_var("AI_TEST_MODE");
        let off = build_overlay(&OverlayConfig::default()).unwrap();
        assert!(!off.enabled());

        std::env::set_var("AI_TEST_MODE", "mock");
        let mock = build_overlay(&OverlayConfig::default()).unwrap();
        assert_eq!(mock.name(), "mock");
        std::env::remove_var("AI_TEST_MODE");
    }
}
