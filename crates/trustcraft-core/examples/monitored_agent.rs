//! An axum agent with scoring attached to its `/chatbot` route. Requests are
//! driven in-process; point a real client at the router to do the same over
//! the network.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;
use trustcraft_core::testing::{LookupEmbedder, ScriptedGenerator, StaticRetriever};
use trustcraft_core::{
    AttributionEngine, ChannelSink, EmbeddingScorer, InterceptState, RoutePatterns, ScoringMode, ScoringPipeline,
    ScoringProvider,
};

async fn chatbot(Json(body): Json<Value>) -> Json<Value> {
    let question = body["input"].as_str().unwrap_or_default();
    let answer = if question.contains("refund") { "yes" } else { "no" };
    Json(json!({ "response": answer }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let generator = Arc::new(ScriptedGenerator::new("no").rule("refunds are issued within 30 days", "yes"));
    let embedder = Arc::new(
        LookupEmbedder::new(vec![0.5, 0.5])
            .entry("yes", vec![1.0, 0.0])
            .entry("no", vec![0.0, 1.0]),
    );
    let retriever = Arc::new(StaticRetriever::new([
        "refunds are issued within 30 days",
        "support is open on weekdays",
    ]));
    let engine = AttributionEngine::new(Arc::new(EmbeddingScorer::new(ScoringProvider::new(generator, embedder))));
    let pipeline = Arc::new(ScoringPipeline::new(retriever, engine));

    let (sink, mut observations) = ChannelSink::new();
    let state = InterceptState::new(RoutePatterns::new(["/chatbot"])?, pipeline, Arc::new(sink))
        .mode(ScoringMode::Detached);

    let app = state.attach(
        Router::new()
            .route("/chatbot", post(chatbot))
            .route("/health", get(|| async { "ok" })),
    );

    for question in ["Can I get a refund?", "Where is the office?"] {
        let request = Request::post("/chatbot")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "input": question }).to_string()))?;
        let response = app.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let observation = observations
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("sink closed"))?;
        println!("{question}\n{}\n", serde_json::to_string_pretty(&observation)?);
    }

    // Not monitored: relayed without scoring.
    let response = app.oneshot(Request::get("/health").body(Body::empty())?).await?;
    println!("/health -> {}", response.status());

    Ok(())
}
