use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;
use trustcraft_core::testing::{LookupEmbedder, ScriptedGenerator, StaticRetriever};
use trustcraft_core::{
    AttributionEngine, ChannelSink, EmbeddingScorer, InterceptState, Observation, ObservationOutcome, ProviderError,
    Retriever, RoutePatterns, ScoringMode, ScoringPipeline, ScoringProvider, SupportScorer,
};

struct Harness {
    app: Router,
    generator: Arc<ScriptedGenerator>,
    retriever: Arc<StaticRetriever>,
    observations: UnboundedReceiver<Observation>,
}

fn agent_routes() -> Router {
    Router::new()
        .route(
            "/chatbot",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "response": "yes", "echo": body["input"] }))
            }),
        )
        .route("/plain", post(|| async { "yes" }))
        .route(
            "/text",
            post(|| async { ([(header::CONTENT_TYPE, "text/plain")], r#"{"response": "yes"}"#).into_response() }),
        )
        .route(
            "/broken",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" }))) }),
        )
}

fn harness(mode: ScoringMode) -> Harness {
    let generator = Arc::new(ScriptedGenerator::new("no").rule("supports yes", "yes"));
    let embedder = Arc::new(
        LookupEmbedder::new(vec![0.5, 0.5])
            .entry("yes", vec![1.0, 0.0])
            .entry("no", vec![0.0, 1.0]),
    );
    let retriever = Arc::new(StaticRetriever::new(["supports yes", "irrelevant"]));
    let scorer = EmbeddingScorer::new(ScoringProvider::new(generator.clone(), embedder));
    let pipeline = ScoringPipeline::new(retriever.clone(), AttributionEngine::new(Arc::new(scorer)));

    let (sink, observations) = ChannelSink::new();
    let routes = RoutePatterns::new(["/chatbot", "/text", "/broken"]).unwrap();
    let app = InterceptState::new(routes, Arc::new(pipeline), Arc::new(sink))
        .mode(mode)
        .attach(agent_routes());

    Harness {
        app,
        generator,
        retriever,
        observations,
    }
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn unmonitored_route_is_untouched() {
    let mut h = harness(ScoringMode::Inline);
    let response = h.app.clone().oneshot(json_post("/plain", json!({}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"yes");
    assert_eq!(h.retriever.calls(), 0);
    assert_eq!(h.generator.calls(), 0);
    assert!(h.observations.try_recv().is_err());
}

#[tokio::test]
async fn monitored_json_answer_is_scored_and_relayed() {
    let mut h = harness(ScoringMode::Inline);
    let response = h
        .app
        .clone()
        .oneshot(json_post("/chatbot", json!({ "input": "is it supported?" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, json!({ "response": "yes", "echo": "is it supported?" }));

    assert_eq!(h.retriever.calls(), 1);
    // baseline + one call per chunk
    assert_eq!(h.generator.calls(), 3);

    let observation = h.observations.try_recv().unwrap();
    assert_eq!(observation.key, "exchange-0");
    assert_eq!(observation.route.as_deref(), Some("/chatbot"));
    let metrics = observation.metrics().unwrap();
    assert!((metrics.faithfulness - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn non_json_response_is_not_scored() {
    let mut h = harness(ScoringMode::Inline);
    let response = h.app.clone().oneshot(json_post("/text", json!({}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, br#"{"response": "yes"}"#);
    assert_eq!(h.retriever.calls(), 0);
    assert_eq!(h.generator.calls(), 0);
    assert!(h.observations.try_recv().is_err());
}

#[tokio::test]
async fn downstream_errors_pass_through() {
    let mut h = harness(ScoringMode::Inline);
    let response = h.app.clone().oneshot(json_post("/broken", json!({}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, json!({ "error": "boom" }));
    assert!(h.observations.try_recv().is_err());
}

#[tokio::test]
async fn detached_scoring_reaches_the_sink() {
    let mut h = harness(ScoringMode::Detached);
    let response = h
        .app
        .clone()
        .oneshot(json_post("/chatbot", json!({ "input": "q" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let observation = h.observations.recv().await.unwrap();
    assert!(matches!(observation.outcome, ObservationOutcome::Scored { .. }));
    assert_eq!(h.generator.calls(), 3);
}

#[tokio::test]
async fn sequence_numbers_increase() {
    let mut h = harness(ScoringMode::Inline);
    for _ in 0..2 {
        h.app
            .clone()
            .oneshot(json_post("/chatbot", json!({ "input": "q" })))
            .await
            .unwrap();
    }
    assert_eq!(h.observations.try_recv().unwrap().key, "exchange-0");
    assert_eq!(h.observations.try_recv().unwrap().key, "exchange-1");
}

struct PanickingScorer;

#[async_trait]
impl SupportScorer for PanickingScorer {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn score(&self, _evidence: &[String], _answer: &str) -> Result<f64, ProviderError> {
        panic!("scorer bug");
    }
}

async fn panicking_app(mode: ScoringMode) -> (axum::response::Response, UnboundedReceiver<Observation>) {
    let pipeline = ScoringPipeline::new(
        Arc::new(StaticRetriever::new(["chunk"])),
        AttributionEngine::new(Arc::new(PanickingScorer)),
    );
    let (sink, rx) = ChannelSink::new();
    let app = InterceptState::new(RoutePatterns::new(["/chatbot"]).unwrap(), Arc::new(pipeline), Arc::new(sink))
        .mode(mode)
        .attach(agent_routes());
    let response = app.oneshot(json_post("/chatbot", json!({ "input": "q" }))).await.unwrap();
    (response, rx)
}

fn assert_failed(observation: &Observation, needle: &str) {
    assert_eq!(observation.route.as_deref(), Some("/chatbot"));
    match &observation.outcome {
        ObservationOutcome::Failed { error } => assert!(error.contains(needle), "{error}"),
        other => panic!("expected a failed observation, got {other:?}"),
    }
}

#[tokio::test]
async fn inline_scorer_panic_is_recorded_as_failure() {
    let (response, mut rx) = panicking_app(ScoringMode::Inline).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["response"], "yes");

    assert_failed(&rx.try_recv().unwrap(), "panicked");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn detached_scorer_panic_is_recorded_as_failure() {
    let (response, mut rx) = panicking_app(ScoringMode::Detached).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["response"], "yes");

    assert_failed(&rx.recv().await.unwrap(), "panicked");
}

/// Retrieval service that accepts the call and never answers.
struct StalledRetriever;

#[async_trait]
impl Retriever for StalledRetriever {
    async fn retrieve_chunks(&self, _answer: &str) -> Result<Vec<String>, ProviderError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn inline_scoring_is_bounded_by_score_timeout() {
    let generator = Arc::new(ScriptedGenerator::new("no"));
    let embedder = Arc::new(LookupEmbedder::new(vec![0.5, 0.5]));
    let scorer = EmbeddingScorer::new(ScoringProvider::new(generator.clone(), embedder));
    let pipeline = ScoringPipeline::new(Arc::new(StalledRetriever), AttributionEngine::new(Arc::new(scorer)));
    let (sink, mut rx) = ChannelSink::new();
    let app = InterceptState::new(RoutePatterns::new(["/chatbot"]).unwrap(), Arc::new(pipeline), Arc::new(sink))
        .mode(ScoringMode::Inline)
        .score_timeout(Duration::from_millis(50))
        .attach(agent_routes());

    let response = app.oneshot(json_post("/chatbot", json!({ "input": "q" }))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["response"], "yes");

    assert_failed(&rx.try_recv().unwrap(), "timed out");
    assert_eq!(generator.calls(), 0);
}
