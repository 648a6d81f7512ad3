//! Allergen inference capability
//!
//! The engine treats inference as an opaque `(name, brand) -> codes` call.
//! Two implementations: an HTTP client for an external inference service,
//! and an offline keyword matcher used when no endpoint is configured.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("kitchen-allergens/", env!("CARGO_PKG_VERSION"));

/// Inference failures; always non-fatal to the caller of the resolver
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Inference service error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Inference unavailable: {0}")]
    Unavailable(String),
}

/// Guess an ingredient's allergen codes from its name and brand
///
/// Returned codes are raw and get consolidated by the caller.
#[async_trait]
pub trait AllergenInference: Send + Sync {
    async fn infer_allergens(&self, name: &str, brand: Option<&str>) -> Result<Vec<String>, InferenceError>;

    /// Short name for logs and the health endpoint
    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    brand: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    allergens: Vec<String>,
}

/// Client for an external inference service
///
/// POSTs `{name, brand}` and expects `{allergens: [..]}`. Outbound calls are
/// paced by a direct governor limiter.
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpInferenceClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::NetworkError(e.to_string()))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AllergenInference for HttpInferenceClient {
    async fn infer_allergens(&self, name: &str, brand: Option<&str>) -> Result<Vec<String>, InferenceError> {
        self.rate_limiter.until_ready().await;

        debug!(name, brand, endpoint = %self.endpoint, "Requesting allergen inference");

        let mut request = self.client.post(&self.endpoint).json(&InferenceRequest { name, brand });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InferenceError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(InferenceError::InvalidApiKey);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::ApiError(status.as_u16(), body));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::ParseError(e.to_string()))?;

        Ok(parsed.allergens)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Keyword table: (allergen code, keywords found in ingredient names)
const KEYWORDS: &[(&str, &[&str])] = &[
    ("gluten", &["wheat", "flour", "bread", "pasta", "barley", "rye", "semolina", "spelt", "couscous", "breadcrumb", "noodle"]),
    ("crustacean", &["shrimp", "prawn", "crab", "lobster", "crayfish", "langoustine"]),
    ("egg", &["egg", "mayonnaise", "meringue", "aioli"]),
    ("fish", &["fish", "salmon", "tuna", "cod", "anchovy", "sardine", "haddock", "mackerel"]),
    ("peanut", &["peanut", "groundnut"]),
    ("soy", &["soy", "soya", "tofu", "edamame", "miso", "tempeh"]),
    ("milk", &["milk", "butter", "cheese", "cream", "yogurt", "yoghurt", "whey", "ghee", "parmesan", "mozzarella"]),
    ("tree_nut", &["almond", "walnut", "cashew", "pecan", "hazelnut", "pistachio", "macadamia", "brazil nut"]),
    ("celery", &["celery", "celeriac"]),
    ("mustard", &["mustard"]),
    ("sesame", &["sesame", "tahini", "halva"]),
    ("sulphite", &["wine", "vinegar", "sulphite", "sulfite", "dried apricot"]),
    ("lupin", &["lupin"]),
    ("mollusc", &["mussel", "oyster", "clam", "squid", "octopus", "scallop", "snail"]),
];

/// Offline keyword matcher over the ingredient name and brand
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordInference;

impl KeywordInference {
    pub fn new() -> Self {
        Self
    }

    /// Match keywords synchronously
    pub fn detect(name: &str, brand: Option<&str>) -> Vec<String> {
        let haystack = match brand {
            Some(brand) => format!("{} {}", name, brand),
            None => name.to_string(),
        }
        .to_lowercase();

        KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| haystack.contains(w)))
            .map(|(code, _)| code.to_string())
            .collect()
    }
}

#[async_trait]
impl AllergenInference for KeywordInference {
    async fn infer_allergens(&self, name: &str, brand: Option<&str>) -> Result<Vec<String>, InferenceError> {
        Ok(Self::detect(name, brand))
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitchen_common::allergens::{consolidate, AllergenCode};

    #[test]
    fn test_keyword_detection() {
        let codes = consolidate(KeywordInference::detect("Salted Butter", None));
        assert!(codes.contains(&AllergenCode::Milk));

        let codes = consolidate(KeywordInference::detect("Tahini paste", None));
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![AllergenCode::Sesame]);

        assert!(KeywordInference::detect("Water", None).is_empty());
    }

    #[test]
    fn test_keyword_codes_are_all_canonical() {
        for (code, _) in KEYWORDS {
            assert!(code.parse::<AllergenCode>().is_ok(), "{} is not canonical", code);
        }
    }

    #[test]
    fn test_brand_participates_in_matching() {
        let codes = consolidate(KeywordInference::detect("Spread", Some("Peanut Co")));
        assert!(codes.contains(&AllergenCode::Peanut));
    }

    #[tokio::test]
    async fn test_keyword_inference_trait_object() {
        let inference: Box<dyn AllergenInference> = Box::new(KeywordInference::new());
        let codes = inference.infer_allergens("Egg noodles", None).await.unwrap();
        let codes = consolidate(codes);
        assert!(codes.contains(&AllergenCode::Egg));
        assert!(codes.contains(&AllergenCode::Gluten));
        assert_eq!(inference.name(), "keyword");
    }

    mod stub_service {
        use axum::http::{header, HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::{json, Value};

        pub const KEY: &str = "kitchen-test-key";

        async fn infer(headers: HeaderMap, Json(body): Json<Value>) -> Response {
            let expected = format!("Bearer {}", KEY);
            if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            let allergens = match (body["name"].as_str(), body["brand"].as_str()) {
                (Some("Custard"), Some("Acme")) => json!(["dairy", "eggs"]),
                (Some("Custard"), None) => json!(["milk"]),
                _ => json!([]),
            };
            Json(json!({ "allergens": allergens })).into_response()
        }

        /// Serve the stub on an ephemeral port and return its base URL
        pub async fn start() -> String {
            let app = Router::new()
                .route("/infer", post(infer))
                .route("/overloaded", post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }))
                .route("/garbled", post(|| async { "allergens: milk" }));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            format!("http://{}", addr)
        }
    }

    fn http_client(url: String, key: Option<&str>) -> HttpInferenceClient {
        HttpInferenceClient::new(url, key.map(str::to_string), Duration::from_secs(5), 50).unwrap()
    }

    #[tokio::test]
    async fn test_http_client_sends_name_brand_and_bearer_key() {
        let base = stub_service::start().await;
        let client = http_client(format!("{}/infer", base), Some(stub_service::KEY));

        let codes = client.infer_allergens("Custard", Some("Acme")).await.unwrap();
        assert_eq!(codes, vec!["dairy".to_string(), "eggs".to_string()]);

        let codes = client.infer_allergens("Custard", None).await.unwrap();
        assert_eq!(codes, vec!["milk".to_string()]);

        assert!(client.infer_allergens("Water", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_client_rejected_key() {
        let base = stub_service::start().await;

        let wrong = http_client(format!("{}/infer", base), Some("not-the-key"));
        assert!(matches!(
            wrong.infer_allergens("Custard", None).await,
            Err(InferenceError::InvalidApiKey)
        ));

        let missing = http_client(format!("{}/infer", base), None);
        assert!(matches!(
            missing.infer_allergens("Custard", None).await,
            Err(InferenceError::InvalidApiKey)
        ));
    }

    #[tokio::test]
    async fn test_http_client_server_error_keeps_status_and_body() {
        let base = stub_service::start().await;
        let client = http_client(format!("{}/overloaded", base), Some(stub_service::KEY));

        match client.infer_allergens("Custard", None).await {
            Err(InferenceError::ApiError(status, body)) => {
                assert_eq!(status, 503);
                assert_eq!(body, "try later");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_client_malformed_body_is_parse_error() {
        let base = stub_service::start().await;
        let client = http_client(format!("{}/garbled", base), Some(stub_service::KEY));

        assert!(matches!(
            client.infer_allergens("Custard", None).await,
            Err(InferenceError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_http_client_unreachable_is_network_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = http_client(format!("http://{}/infer", addr), None);

        assert!(matches!(
            client.infer_allergens("Custard", None).await,
            Err(InferenceError::NetworkError(_))
        ));
    }

    #[test]
    fn test_http_client_creation() {
        let client = HttpInferenceClient::new(
            "http://127.0.0.1:9/infer",
            Some("  ".to_string()),
            Duration::from_secs(1),
            0,
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/infer");
        assert!(client.api_key.is_none());
    }
}
