use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// The agent under evaluation: prompt in, response out.
#[async_trait]
pub trait Task: Send + Sync {
	async fn run(&self, input: &Value) -> Result<Value>;
}

/// Wrap an async closure as a `Task`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Task>
where
	F: Send + Sync + 'static + Fn(&Value) -> Fut,
	Fut: Future<Output = Result<Value>> + Send + 'static,
{
	struct ClosureTask<F, Fut>
	where
		F: Send + Sync + 'static + Fn(&serde_json::Value) -> Fut,
		Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
	{
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Task for ClosureTask<F, Fut>
	where
		F: Send + Sync + 'static + Fn(&serde_json::Value) -> Fut,
		Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
	{
		async fn run(&self, input: &Value) -> Result<Value> {
			(self.f)(input).await
		}
	}

	Arc::new(ClosureTask { f })
}

/// Agent reached over HTTP. POST sends `{"input": <prompt>}`; GET sends
/// `?input=<prompt>`. The JSON reply is returned as-is.
pub struct HttpAgent {
	client: Client,
	url: String,
	method: String,
}

impl HttpAgent {
	pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
		Self {
			client: Client::new(),
			url: url.into(),
			method: method.into().to_uppercase(),
		}
	}
}

#[async_trait]
impl Task for HttpAgent {
	async fn run(&self, input: &Value) -> Result<Value> {
		let resp = match self.method.as_str() {
			"GET" => {
				let prompt = match input {
					Value::String(s) => s.clone(),
					other => other.to_string(),
				};
				self.client.get(&self.url).query(&[("input", prompt)]).send().await?
			}
			_ => self.client.post(&self.url).json(&json!({ "input": input })).send().await?,
		};
		let status = resp.status();
		if !status.is_success() {
			// error bodies are often plain text or HTML
			let body = resp.text().await.unwrap_or_default();
			anyhow::bail!("HTTP {}: {}", status.as_u16(), body);
		}
		Ok(resp.json::<Value>().await?)
	}
}
