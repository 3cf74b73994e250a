//! Rate-limited request handling and response shaping.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::metrics::{MetricsSink, REQUESTS_EXCEEDED, REQUESTS_TOTAL};
use crate::provider::DataProvider;
use crate::ratelimit::{QuotaDecision, RateLimiter, RateSpec, DEFAULT_GROUP};

pub const X_ERROR: &str = "x-error";
pub const X_RATE_LIMIT_RAW: &str = "x-rate-limit-raw";
pub const X_RATE_LIMIT_GROUP: &str = "x-rate-limit-group";
pub const X_RATE_LIMIT_KEY: &str = "x-rate-limit-key";
pub const X_RATE_LIMIT_QUOTA_TOTAL: &str = "x-rate-limit-quota-total";
pub const X_RATE_LIMIT_QUOTA_CURR: &str = "x-rate-limit-quota-curr";
pub const X_RATE_LIMIT_QUOTA_REMAINING: &str = "x-rate-limit-quota-remaining";
pub const X_RATE_LIMIT_RESETS_AT: &str = "x-rate-limit-resets-at";
pub const X_RATE_LIMIT_WAIT_UNTIL: &str = "x-rate-limit-wait-until";
pub const X_RATE_LIMIT_WAIT_MS: &str = "x-rate-limit-wait-ms";

/// Rendered in the wait headers when the request was not limited.
const NOT_WAITING: i64 = -1;

const RATE_LIMIT_PARAM: &str = "rateLimit";
const RATE_LIMIT_GROUP_PARAM: &str = "rateLimitGroup";

/// Query parameters understood by the handler.
#[derive(Debug, Clone, Default)]
pub struct RateLimitParams {
    pub rate_limit: Option<String>,
    pub rate_limit_group: Option<String>,
}

impl RateLimitParams {
    /// Collect parameters from decoded query pairs; the first occurrence of a
    /// repeated key wins and unknown keys are ignored.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params = Self::default();
        for (name, value) in pairs {
            let slot = match name.as_str() {
                RATE_LIMIT_PARAM => &mut params.rate_limit,
                RATE_LIMIT_GROUP_PARAM => &mut params.rate_limit_group,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }
}

/// Problems with the request itself; always answered with a 4xx.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("unsupported resource: {0}")]
    UnsupportedPath(String),

    #[error("missing `rateLimit` query parameter")]
    MissingRateLimit,

    #[error("invalid `rateLimit` query parameter: {0}")]
    InvalidRateLimit(String),

    #[error("invalid `rateLimitGroup` query parameter")]
    InvalidGroup,

    #[error("invalid query string: {0}")]
    InvalidQuery(String),
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        match self {
            ClientError::UnsupportedPath(_) => StatusCode::NOT_FOUND.into_response(),
            other => {
                let mut headers = HeaderMap::new();
                insert_header(&mut headers, X_ERROR, &other.to_string());
                (StatusCode::BAD_REQUEST, headers).into_response()
            }
        }
    }
}

/// Shared state behind every rate-limited route.
#[derive(Clone)]
pub struct RequestHandler {
    limiter: RateLimiter,
    provider: Arc<dyn DataProvider>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    default_group: String,
}

impl RequestHandler {
    /// Create a handler reading time from the system clock.
    pub fn new(
        limiter: RateLimiter,
        provider: Arc<dyn DataProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            limiter,
            provider,
            metrics,
            clock: Arc::new(SystemClock),
            default_group: DEFAULT_GROUP.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = group.into();
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Validate, count and answer one request.
    #[instrument(
        skip(self, params),
        fields(request_id = %Uuid::new_v4(), rate_limit = ?params.rate_limit)
    )]
    pub async fn handle(&self, path: &str, params: &RateLimitParams) -> Response {
        let (raw, spec, group) = match self.validate(path, params) {
            Ok(validated) => validated,
            Err(err) => {
                debug!(error = %err, "Rejected request");
                return err.into_response();
            }
        };

        self.metrics.increment(REQUESTS_TOTAL);
        let now_ms = self.clock.now_millis();

        let decision = match self.limiter.check(path, group, spec, now_ms) {
            Ok(decision) => decision,
            Err(err) => {
                error!(error = %err, "Quota store failed");
                return internal_error("quota store unavailable");
            }
        };

        let mut headers = quota_headers(raw, group, &decision);

        if decision.exceeded {
            self.metrics.increment(REQUESTS_EXCEEDED);
            insert_header(&mut headers, X_ERROR, "quota exceeded");
            return (StatusCode::TOO_MANY_REQUESTS, headers).into_response();
        }

        match self.provider.fetch(path).await {
            Ok(body) => (StatusCode::OK, headers, Json(body)).into_response(),
            Err(err) => {
                error!(error = %err, "Data provider failed");
                internal_error("data provider failed")
            }
        }
    }

    /// Answer a request whose query string could not be decoded.
    pub fn reject_query(&self, path: &str, rejection: &QueryRejection) -> Response {
        let err = if self.provider.supports(path) {
            ClientError::InvalidQuery(rejection.body_text())
        } else {
            ClientError::UnsupportedPath(path.to_string())
        };
        debug!(error = %err, "Rejected request");
        err.into_response()
    }

    fn validate<'a>(
        &'a self,
        path: &str,
        params: &'a RateLimitParams,
    ) -> Result<(&'a str, RateSpec, &'a str), ClientError> {
        if !self.provider.supports(path) {
            return Err(ClientError::UnsupportedPath(path.to_string()));
        }

        let raw = params
            .rate_limit
            .as_deref()
            .ok_or(ClientError::MissingRateLimit)?;
        let spec =
            RateSpec::parse(raw).map_err(|_| ClientError::InvalidRateLimit(raw.to_string()))?;

        let group = params
            .rate_limit_group
            .as_deref()
            .unwrap_or(&self.default_group);
        if HeaderValue::from_str(group).is_err() {
            return Err(ClientError::InvalidGroup);
        }

        Ok((raw, spec, group))
    }
}

/// Axum entry point: every GET path lands here.
pub async fn rate_limited(
    State(handler): State<RequestHandler>,
    uri: Uri,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(pairs)) => {
            let params = RateLimitParams::from_pairs(pairs);
            handler.handle(uri.path(), &params).await
        }
        Err(rejection) => handler.reject_query(uri.path(), &rejection),
    }
}

/// Headers describing the quota state after a counted request.
pub fn quota_headers(raw: &str, group: &str, decision: &QuotaDecision) -> HeaderMap {
    let wait_until = decision
        .wait_until_ms
        .map_or(NOT_WAITING, |ms| i64::try_from(ms).unwrap_or(i64::MAX));
    let wait_ms = decision
        .wait_ms
        .map_or(NOT_WAITING, |ms| i64::try_from(ms).unwrap_or(i64::MAX));

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, X_RATE_LIMIT_RAW, raw);
    insert_header(&mut headers, X_RATE_LIMIT_GROUP, group);
    insert_header(&mut headers, X_RATE_LIMIT_KEY, &decision.key.to_string_key());
    insert_header(&mut headers, X_RATE_LIMIT_QUOTA_TOTAL, &decision.quota.to_string());
    insert_header(&mut headers, X_RATE_LIMIT_QUOTA_CURR, &decision.used.to_string());
    insert_header(&mut headers, X_RATE_LIMIT_QUOTA_REMAINING, &decision.remaining.to_string());
    insert_header(&mut headers, X_RATE_LIMIT_RESETS_AT, &decision.reset_at_ms.to_string());
    insert_header(&mut headers, X_RATE_LIMIT_WAIT_UNTIL, &wait_until.to_string());
    insert_header(&mut headers, X_RATE_LIMIT_WAIT_MS, &wait_ms.to_string());
    headers
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    // Values are validated before they get here; anything else is dropped.
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn internal_error(reason: &str) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, X_ERROR, reason);
    (StatusCode::INTERNAL_SERVER_ERROR, headers).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{QuotaMockError, Result};
    use crate::metrics::InMemoryMetrics;
    use crate::provider::FakeDataProvider;
    use crate::ratelimit::{BucketKey, QuotaStore, QuotaStores, StoreError};
    use async_trait::async_trait;
    use serde_json::Value;

    const NOW: u64 = 1_700_000_000_250;

    struct Fixture {
        handler: RequestHandler,
        metrics: Arc<InMemoryMetrics>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(InMemoryMetrics::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let handler = RequestHandler::new(
            RateLimiter::new(),
            Arc::new(FakeDataProvider),
            metrics.clone(),
        )
        .with_clock(clock.clone());
        Fixture { handler, metrics, clock }
    }

    fn params(rate_limit: Option<&str>, group: Option<&str>) -> RateLimitParams {
        RateLimitParams {
            rate_limit: rate_limit.map(str::to_string),
            rate_limit_group: group.map(str::to_string),
        }
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[test]
    fn test_first_occurrence_of_repeated_param_wins() {
        let pairs = [
            ("rateLimit", "3/s"),
            ("other", "x"),
            ("rateLimit", "5/s"),
            ("rateLimitGroup", "alpha"),
            ("rateLimitGroup", "beta"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));

        let params = RateLimitParams::from_pairs(pairs);
        assert_eq!(params.rate_limit.as_deref(), Some("3/s"));
        assert_eq!(params.rate_limit_group.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_allowed_request_has_quota_headers() {
        let fx = fixture();
        let response = fx.handler.handle("/users", &params(Some("3/s"), None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, X_RATE_LIMIT_RAW), "3/s");
        assert_eq!(header(&response, X_RATE_LIMIT_GROUP), "global");
        assert_eq!(header(&response, X_RATE_LIMIT_KEY), "1700000000##/users##global");
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_TOTAL), "3");
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_CURR), "1");
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_REMAINING), "2");
        assert_eq!(header(&response, X_RATE_LIMIT_RESETS_AT), "1700000001000");
        assert_eq!(header(&response, X_RATE_LIMIT_WAIT_UNTIL), "-1");
        assert_eq!(header(&response, X_RATE_LIMIT_WAIT_MS), "-1");
        assert!(response.headers().get(X_ERROR).is_none());
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(fx.metrics.get(REQUESTS_TOTAL), 1);
        assert_eq!(fx.metrics.get(REQUESTS_EXCEEDED), 0);
    }

    #[tokio::test]
    async fn test_exceeded_request_is_429_without_body() {
        let fx = fixture();
        let params = params(Some("3/s"), None);
        for _ in 0..3 {
            let response = fx.handler.handle("/users", &params).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = fx.handler.handle("/users", &params).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, X_ERROR), "quota exceeded");
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_CURR), "4");
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_REMAINING), "-1");
        assert_eq!(header(&response, X_RATE_LIMIT_WAIT_UNTIL), "1700000001000");
        assert_eq!(header(&response, X_RATE_LIMIT_WAIT_MS), "750");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(fx.metrics.get(REQUESTS_TOTAL), 4);
        assert_eq!(fx.metrics.get(REQUESTS_EXCEEDED), 1);
    }

    #[tokio::test]
    async fn test_next_window_starts_fresh() {
        let fx = fixture();
        let params = params(Some("1/s"), Some("team"));

        fx.handler.handle("/posts", &params).await;
        let limited = fx.handler.handle("/posts", &params).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        fx.clock.advance(1_000);
        let response = fx.handler.handle("/posts", &params).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_CURR), "1");
        assert_eq!(header(&response, X_RATE_LIMIT_KEY), "1700000001##/posts##team");
    }

    #[tokio::test]
    async fn test_unsupported_path_is_404_and_uncounted() {
        let fx = fixture();
        let response = fx.handler.handle("/unknown", &params(Some("3/s"), None)).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(X_RATE_LIMIT_KEY).is_none());
        assert_eq!(fx.metrics.get(REQUESTS_TOTAL), 0);

        let stores = fx.handler.limiter().stores();
        let key = BucketKey::new(NOW / 1_000, "/unknown", "global");
        assert_eq!(stores.second.increment_and_get(&key, NOW).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_rate_limit_is_400() {
        let fx = fixture();
        let response = fx.handler.handle("/users", &params(None, None)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header(&response, X_ERROR), "missing `rateLimit` query parameter");
        assert_eq!(fx.metrics.get(REQUESTS_TOTAL), 0);
    }

    #[tokio::test]
    async fn test_malformed_rate_limit_is_400_naming_value() {
        let fx = fixture();
        let response = fx.handler.handle("/users", &params(Some("abc"), None)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header(&response, X_ERROR), "invalid `rateLimit` query parameter: abc");
        assert_eq!(fx.metrics.get(REQUESTS_TOTAL), 0);

        // Nothing was counted: a valid request in the same window starts at one.
        let response = fx.handler.handle("/users", &params(Some("3/s"), None)).await;
        assert_eq!(header(&response, X_RATE_LIMIT_QUOTA_CURR), "1");
    }

    #[tokio::test]
    async fn test_group_that_cannot_be_echoed_is_400() {
        let fx = fixture();
        let response = fx.handler.handle("/users", &params(Some("3/s"), Some("a\nb"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fx.metrics.get(REQUESTS_TOTAL), 0);
    }

    #[tokio::test]
    async fn test_configured_default_group() {
        let fx = fixture();
        let handler = fx.handler.with_default_group("shared");
        let response = handler.handle("/comments", &params(Some("3/m"), None)).await;
        assert_eq!(header(&response, X_RATE_LIMIT_GROUP), "shared");
    }

    struct FailingStore;

    impl QuotaStore for FailingStore {
        fn increment_and_get(&self, _key: &BucketKey, _now_ms: u64) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_fault_fails_closed() {
        let failing: Arc<dyn QuotaStore> = Arc::new(FailingStore);
        let limiter = RateLimiter::with_stores(QuotaStores {
            second: failing.clone(),
            minute: failing.clone(),
            hour: failing,
        });
        let metrics = Arc::new(InMemoryMetrics::new());
        let handler = RequestHandler::new(limiter, Arc::new(FakeDataProvider), metrics);

        let response = handler.handle("/users", &params(Some("3/s"), None)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, X_ERROR), "quota store unavailable");
        assert!(response.headers().get(X_RATE_LIMIT_QUOTA_CURR).is_none());
    }

    struct BrokenProvider;

    #[async_trait]
    impl DataProvider for BrokenProvider {
        fn supports(&self, _path: &str) -> bool {
            true
        }

        async fn fetch(&self, _path: &str) -> Result<Value> {
            Err(QuotaMockError::Provider("generator crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_provider_failure_is_500() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let handler = RequestHandler::new(RateLimiter::new(), Arc::new(BrokenProvider), metrics);

        let response = handler.handle("/users", &params(Some("3/s"), None)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, X_ERROR), "data provider failed");
    }
}
