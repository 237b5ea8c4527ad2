use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::{Embedder, Generator};

/// Chat-completion and embedding client for OpenAI-compatible endpoints
/// (OpenAI, Azure deployments behind a gateway, llama.cpp, vLLM, ...).
#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    dimensions: Option<usize>,
    temperature: f32,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
            dimensions: None,
            temperature: 0.0,
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Requests embeddings of this size and rejects responses of any other.
    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Transport-level timeout, applied in addition to the per-call bound of
    /// [`crate::provider::ScoringProvider`].
    pub fn request_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(self)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("HTTP {}: {}", status.as_u16(), text)));
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Generator for OpenAiCompatClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: self.temperature,
        };
        let resp: ChatResponse = self.post("/chat/completions", &request).await?;
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse("completion has no content".into()))
    }
}

#[async_trait]
impl Embedder for OpenAiCompatClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
            dimensions: self.dimensions,
        };
        let resp: EmbeddingResponse = self.post("/embeddings", &request).await?;
        let embedding = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::MalformedResponse("embedding response is empty".into()))?;

        match self.dimensions {
            Some(expected) if embedding.len() != expected => Err(ProviderError::MalformedResponse(
                format!("expected {expected}-dimensional embedding, got {}", embedding.len()),
            )),
            _ => Ok(embedding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: [
                ChatMessage { role: "system", content: "evidence" },
                ChatMessage { role: "user", content: "answer" },
            ],
            temperature: 0.0,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "answer");
    }

    #[test]
    fn embedding_request_omits_unset_dimensions() {
        let request = EmbeddingRequest { model: "m", input: "x", dimensions: None };
        let v = serde_json::to_value(&request).unwrap();
        assert!(v.get("dimensions").is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiCompatClient::new("http://localhost:8080/v1/", "chat", "embed");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        // Port 9 (discard) is closed on test machines.
        let client = OpenAiCompatClient::new("http://127.0.0.1:9", "chat", "embed");
        let err = client.embed("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_) | ProviderError::Timeout(_)));
    }
}
