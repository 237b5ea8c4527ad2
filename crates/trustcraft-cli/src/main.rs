use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use clap::{Parser, Subcommand};
use trustcraft_core::config::AgentConfig;
use trustcraft_core::{
	report, EvalConfig, Eval, FanoutSink, HttpAgent, InterceptState, JsonlDataSource, MetricsSink, RoutePatterns,
	StoreSink, TracingSink,
};
use trustcraft_store::Store;

#[derive(Debug, Parser)]
#[command(name = "trustcraft", about = "Score agent answers without ground truth")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Send every prompt of a JSONL file to the agent and score the answers
	Run(RunArgs),
	/// Score a single answer and print the evaluation as JSON
	Score(ScoreArgs),
	/// Reverse proxy in front of an agent, scoring answers on monitored routes
	Proxy(ProxyArgs),
}

#[derive(Debug, Clone, Parser)]
struct CommonArgs {
	/// YAML configuration file
	#[arg(long, short)]
	config: PathBuf,

	/// Provider API key; overrides the variable named by `provider.api_key_env`
	#[arg(long, env = "TRUSTCRAFT_API_KEY", hide_env_values = true)]
	api_key: Option<String>,
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	#[command(flatten)]
	common: CommonArgs,

	/// JSONL prompt file: { "id"?: string, "prompt": string, "dimension"?: string } or bare strings
	#[arg(long)]
	data: Option<PathBuf>,

	/// Agent endpoint (POST). Sends { "input": <prompt> } and reads the answer field of the reply.
	#[arg(long)]
	agent_url: Option<String>,

	/// Prompts in flight
	#[arg(long)]
	concurrency: Option<usize>,

	/// Output JSON result to a file
	#[arg(long)]
	json_out: Option<PathBuf>,

	/// Output an HTML report to a file
	#[arg(long)]
	html_out: Option<PathBuf>,

	/// SQLite file to record the run in
	#[arg(long)]
	store: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct ScoreArgs {
	#[command(flatten)]
	common: CommonArgs,

	/// Answer text to score
	#[arg(long)]
	answer: String,
}

#[derive(Debug, Clone, Parser)]
struct ProxyArgs {
	#[command(flatten)]
	common: CommonArgs,

	/// Address to listen on
	#[arg(long)]
	listen: Option<String>,

	/// Agent base URL every request is forwarded to
	#[arg(long)]
	upstream: Option<String>,

	/// SQLite file to record observations in
	#[arg(long)]
	store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
		)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Score(args) => score(args).await?,
		Commands::Proxy(args) => proxy(args).await?,
	}
	Ok(())
}

async fn load_config(common: &CommonArgs) -> Result<EvalConfig> {
	let mut config = EvalConfig::load(&common.config).await?;
	if common.api_key.is_some() {
		config.provider.api_key = common.api_key.clone();
	}
	Ok(config)
}

fn open_store(path: Option<PathBuf>) -> Result<Option<Arc<Store>>> {
	path.map(|p| Store::open(&p).with_context(|| format!("Failed to open store {:?}", p)).map(Arc::new))
		.transpose()
}

fn sink_for(store: Option<&Arc<Store>>) -> Arc<dyn MetricsSink> {
	let sink = FanoutSink::new().with(Arc::new(TracingSink));
	match store {
		Some(store) => Arc::new(sink.with(Arc::new(StoreSink::new(store.clone())))),
		None => Arc::new(sink),
	}
}

async fn run(args: RunArgs) -> Result<()> {
	let config = load_config(&args.common).await?;

	let data = args
		.data
		.or_else(|| config.data.as_ref().map(|d| d.path.clone()))
		.context("No prompt file: pass --data or set data.path")?;

	let (url, method, answer_field) = match (args.agent_url, &config.agent) {
		(Some(url), Some(AgentConfig::Http { method, answer_field, .. })) => (url, method.clone(), answer_field.clone()),
		(Some(url), None) => (url, "POST".to_string(), trustcraft_core::runner::DEFAULT_ANSWER_FIELD.to_string()),
		(None, Some(AgentConfig::Http { url, method, answer_field })) => {
			(url.clone(), method.clone(), answer_field.clone())
		}
		(None, None) => anyhow::bail!("No agent: pass --agent-url or set agent.url"),
	};

	let store = open_store(args.store.or(config.store_path.clone()))?;

	let eval = Eval::builder()
		.data_source(Arc::new(JsonlDataSource::new(&data)))
		.agent(Arc::new(HttpAgent::new(&url, method)))
		.pipeline(Arc::new(config.build_pipeline()?))
		.sink(sink_for(store.as_ref()))
		.answer_field(answer_field)
		.concurrency(args.concurrency.unwrap_or(config.concurrency))
		.build()?;

	let result = eval.run().await?;
	println!("{}", result.summary_table());

	if let Some(store) = &store {
		let run_id = store.create_run(Some(serde_json::json!({ "agent": url, "data": data })))?;
		let eval_id = store.save_eval(run_id, "run", &result)?;
		tracing::info!(run_id, eval_id, "saved evaluation");
	}

	if let Some(path) = args.json_out {
		let json = serde_json::to_string_pretty(&result)?;
		tokio::fs::write(path, json).await?;
	}

	if let Some(path) = args.html_out {
		tokio::fs::write(path, report::generate_html_report(&result)).await?;
	}

	Ok(())
}

async fn score(args: ScoreArgs) -> Result<()> {
	let config = load_config(&args.common).await?;
	let pipeline = config.build_pipeline()?;
	let evaluation = pipeline.evaluate(&args.answer).await?;
	println!("{}", serde_json::to_string_pretty(&evaluation)?);
	Ok(())
}

#[derive(Clone)]
struct Upstream {
	client: reqwest::Client,
	base_url: Arc<str>,
}

async fn proxy(args: ProxyArgs) -> Result<()> {
	let config = load_config(&args.common).await?;
	let listen = args.listen.unwrap_or_else(|| config.intercept.listen.clone());
	let upstream = args
		.upstream
		.or_else(|| config.intercept.upstream.clone())
		.context("No upstream: pass --upstream or set intercept.upstream")?;

	let store = open_store(args.store.or(config.store_path.clone()))?;
	let routes = RoutePatterns::new(&config.intercept.routes).context("Invalid intercept route")?;
	let state = InterceptState::new(routes, Arc::new(config.build_pipeline()?), sink_for(store.as_ref()))
		.mode(config.intercept.mode)
		.score_timeout(Duration::from_millis(config.intercept.score_timeout_ms));

	let app = state.attach(Router::new().fallback(forward).with_state(Upstream {
		client: reqwest::Client::new(),
		base_url: Arc::from(upstream.trim_end_matches('/')),
	}));

	let listener = tokio::net::TcpListener::bind(&listen).await?;
	tracing::info!(%listen, %upstream, routes = ?config.intercept.routes, "proxy listening");
	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
		})
		.await?;
	Ok(())
}

const HOP_BY_HOP: [header::HeaderName; 4] =
	[header::HOST, header::CONNECTION, header::TRANSFER_ENCODING, header::CONTENT_LENGTH];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
	for name in HOP_BY_HOP {
		headers.remove(name);
	}
}

async fn forward(State(upstream): State<Upstream>, request: Request) -> Response {
	let (mut parts, body) = request.into_parts();
	let body = match to_bytes(body, usize::MAX).await {
		Ok(bytes) => bytes,
		Err(_) => return (StatusCode::BAD_REQUEST, "unreadable request body").into_response(),
	};
	let path = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
	let url = format!("{}{}", upstream.base_url, path);
	strip_hop_by_hop(&mut parts.headers);

	let reply = upstream
		.client
		.request(parts.method, &url)
		.headers(parts.headers)
		.body(body)
		.send()
		.await;
	let reply = match reply {
		Ok(reply) => reply,
		Err(err) => {
			tracing::warn!(%url, error = %err, "upstream unreachable");
			return StatusCode::BAD_GATEWAY.into_response();
		}
	};

	let status = reply.status();
	let mut headers = reply.headers().clone();
	strip_hop_by_hop(&mut headers);
	let bytes = match reply.bytes().await {
		Ok(bytes) => bytes,
		Err(err) => {
			tracing::warn!(%url, error = %err, "upstream body failed");
			return StatusCode::BAD_GATEWAY.into_response();
		}
	};

	let mut response = Response::new(Body::from(bytes));
	*response.status_mut() = status;
	*response.headers_mut() = headers;
	response
}
