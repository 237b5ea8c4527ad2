//! Axum middleware that observes an agent's responses on selected routes and
//! scores the answers without changing what the client receives.
//!
//! Matched routes are fully buffered in both directions, so streaming
//! responses on those routes are delivered in one piece. Only use it on
//! JSON request/response endpoints.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::pipeline::ScoringPipeline;
use crate::sink::MetricsSink;
use crate::types::Observation;

/// Paths to intercept. `*` matches exactly one path segment.
#[derive(Debug, Clone)]
pub struct RoutePatterns {
    patterns: Vec<Regex>,
}

impl RoutePatterns {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| compile_route(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }
}

fn compile_route(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('/')
        .map(|segment| if segment == "*" { "[^/]+".to_string() } else { regex::escape(segment) })
        .collect::<Vec<_>>()
        .join("/");
    Regex::new(&format!("^{body}$"))
}

/// When the captured answer is scored relative to the client response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Score on a spawned task; the response is returned immediately.
    #[default]
    Detached,
    /// Score before returning the response. Adds latency, never alters it.
    Inline,
}

/// One captured round trip. Lives only for the duration of the middleware call.
#[derive(Debug)]
pub struct InterceptedExchange {
    pub route: String,
    pub request_body: Bytes,
    pub response_body: Bytes,
    pub content_type: Option<String>,
}

impl InterceptedExchange {
    /// The agent's answer, if the response is a JSON object with a string
    /// `response` field. Anything else yields `None`.
    pub fn answer(&self) -> Option<String> {
        let content_type = self.content_type.as_deref()?;
        if !is_json(content_type) {
            return None;
        }
        match serde_json::from_slice::<Value>(&self.response_body).ok()? {
            Value::Object(mut fields) => match fields.remove("response")? {
                Value::String(answer) => Some(answer),
                _ => None,
            },
            _ => None,
        }
    }
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// Upper bound on one retrieve-attribute-metrics pass for an intercepted answer.
pub const DEFAULT_SCORE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct InterceptState {
    routes: Arc<RoutePatterns>,
    pipeline: Arc<ScoringPipeline>,
    sink: Arc<dyn MetricsSink>,
    mode: ScoringMode,
    score_timeout: Duration,
    sequence: Arc<AtomicU64>,
}

impl InterceptState {
    pub fn new(routes: RoutePatterns, pipeline: Arc<ScoringPipeline>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            routes: Arc::new(routes),
            pipeline,
            sink,
            mode: ScoringMode::default(),
            score_timeout: DEFAULT_SCORE_TIMEOUT,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mode(mut self, mode: ScoringMode) -> Self {
        self.mode = mode;
        self
    }

    /// Give up on scoring after `limit`; the exchange is recorded as failed.
    /// In inline mode this also caps the latency scoring adds to a response.
    pub fn score_timeout(mut self, limit: Duration) -> Self {
        self.score_timeout = limit;
        self
    }

    /// Install the interception middleware on every route of `router`.
    pub fn attach<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, intercept))
    }

    async fn observe(&self, exchange: InterceptedExchange) {
        let Some(answer) = exchange.answer() else {
            debug!(
                route = %exchange.route,
                content_type = exchange.content_type.as_deref().unwrap_or("-"),
                "response carries no scorable answer"
            );
            return;
        };
        debug!(
            route = %exchange.route,
            request_bytes = exchange.request_body.len(),
            response_bytes = exchange.response_body.len(),
            "scoring intercepted answer"
        );

        let key = format!("exchange-{}", self.sequence.fetch_add(1, Ordering::Relaxed));
        let state = self.clone();
        let route = exchange.route;
        let job = async move { state.score_and_record(key, route, answer).await };

        match self.mode {
            ScoringMode::Detached => {
                tokio::spawn(job);
            }
            ScoringMode::Inline => job.await,
        }
    }

    /// Every scorable exchange ends in exactly one observation, whether the
    /// pipeline succeeds, fails, times out or panics.
    async fn score_and_record(&self, key: String, route: String, answer: String) {
        let scoring = AssertUnwindSafe(tokio::time::timeout(self.score_timeout, self.pipeline.evaluate(&answer)));
        let observation = match scoring.catch_unwind().await {
            Ok(Ok(Ok(evaluation))) => Observation::scored(key, evaluation),
            Ok(Ok(Err(err))) => {
                warn!(%route, error = %err, "scoring failed");
                Observation::failed(key, err.to_string())
            }
            Ok(Err(_)) => {
                warn!(%route, limit = ?self.score_timeout, "scoring timed out");
                Observation::failed(key, format!("scoring timed out after {:?}", self.score_timeout))
            }
            Err(_) => {
                warn!(%route, "scoring panicked, response relayed unchanged");
                Observation::failed(key, "scoring panicked")
            }
        };
        self.sink.record(observation.route(route)).await;
    }
}

/// Middleware body; install with [`InterceptState::attach`] or
/// `axum::middleware::from_fn_with_state`.
pub async fn intercept(State(state): State<InterceptState>, request: Request, next: Next) -> Response {
    if !state.routes.matches(request.uri().path()) {
        return next.run(request).await;
    }

    let route = request.uri().path().to_string();
    let (parts, body) = request.into_parts();
    let request_body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%route, error = %err, "failed to buffer request body");
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };

    let response = next
        .run(Request::from_parts(parts, Body::from(request_body.clone())))
        .await;

    let (parts, body) = response.into_parts();
    let response_body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%route, error = %err, "failed to buffer response body");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    state
        .observe(InterceptedExchange {
            route,
            request_body,
            response_body: response_body.clone(),
            content_type,
        })
        .await;

    Response::from_parts(parts, Body::from(response_body))
}
