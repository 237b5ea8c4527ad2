use std::sync::Arc;

use serde_json::json;
use trustcraft_core::testing::{LookupEmbedder, ScriptedGenerator, StaticRetriever};
use trustcraft_core::{
    from_async_fn, AttributionEngine, EmbeddingScorer, Eval, EvalConfig, EvalPrompt, JsonlDataSource, ScoringPipeline,
    ScoringProvider, VecDataSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Example 1: offline, with scripted providers. The regenerated answer is
    // "yes" only when the supporting chunk is in the evidence.
    let generator = Arc::new(ScriptedGenerator::new("no").rule("ticket AC2022-34567 is resolved", "yes"));
    let embedder = Arc::new(
        LookupEmbedder::new(vec![0.5, 0.5])
            .entry("yes", vec![1.0, 0.0])
            .entry("no", vec![0.0, 1.0]),
    );
    let retriever = Arc::new(StaticRetriever::new([
        "ticket AC2022-34567 is resolved",
        "the cafeteria opens at 8am",
        "FM2023-78451 has two warnings",
    ]));
    let engine = AttributionEngine::new(Arc::new(EmbeddingScorer::new(ScoringProvider::new(generator, embedder))));
    let pipeline = Arc::new(ScoringPipeline::new(retriever, engine));

    let prompts = vec![
        EvalPrompt::with_id("0", "Is AC2022-34567 resolved?").dimension("accuracy"),
        EvalPrompt::with_id("1", "Is AC2022-34567 still open?").dimension("robustness"),
    ];

    // Agent: always answers "yes"
    let agent = from_async_fn(|_input| async move { Ok(json!({ "response": "yes" })) });

    let eval = Eval::builder()
        .data_source(Arc::new(VecDataSource::new(prompts)))
        .agent(agent)
        .pipeline(pipeline)
        .concurrency(4)
        .build()?;

    let result = eval.run().await?;
    println!("{}", result.summary_table());

    // Example 2: real providers from a config file, prompts from JSONL
    // (cargo run --example simple -- eval.yaml prompts.jsonl)
    let mut args = std::env::args().skip(1);
    if let (Some(config), Some(prompts)) = (args.next(), args.next()) {
        let config = EvalConfig::load(config).await?;
        let eval = Eval::builder()
            .data_source(Arc::new(JsonlDataSource::new(prompts)))
            .agent(from_async_fn(|_input| async move { Ok(json!("yes")) }))
            .pipeline(Arc::new(config.build_pipeline()?))
            .build()?;
        let result = eval.run().await?;
        println!("{}", result.summary_table());
    }

    Ok(())
}
