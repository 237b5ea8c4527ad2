use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProviderError;

/// Turns an answer into the ranked knowledge-base chunks it should be judged
/// against. An empty result is valid.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve_chunks(&self, answer: &str) -> Result<Vec<String>, ProviderError>;
}

/// Retrieval service reached over HTTP.
///
/// Sends `{"input": <answer>}` and expects `{"response": [<chunk>, ...]}`.
pub struct HttpRetriever {
    client: Client,
    url: String,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    /// Fail any retrieval call that takes longer than `timeout`.
    pub fn request_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(self)
    }
}

#[derive(Deserialize)]
struct RetrievalReply {
    response: Vec<String>,
}

/// The reply must be an object; serde would otherwise accept `[[...]]` as a
/// positional `RetrievalReply`.
fn decode_reply(bytes: &[u8]) -> Result<Vec<String>, ProviderError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    if !value.is_object() {
        return Err(ProviderError::MalformedResponse("retrieval reply is not a JSON object".to_string()));
    }
    let reply: RetrievalReply =
        serde_json::from_value(value).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    Ok(reply.response)
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve_chunks(&self, answer: &str) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({ "input": answer }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("retrieval returned HTTP {}", status.as_u16())));
        }
        decode_reply(&resp.bytes().await?)
    }
}

/// Returns the same chunks for every answer.
pub struct StaticRetriever {
    chunks: Vec<String>,
    calls: AtomicUsize,
}

impl StaticRetriever {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve_chunks(&self, _answer: &str) -> Result<Vec<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chunks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_requires_object_with_string_list() {
        assert_eq!(decode_reply(br#"{"response": ["a", "b"]}"#).unwrap(), vec!["a", "b"]);
        assert!(decode_reply(br#"{"response": []}"#).unwrap().is_empty());
        assert!(matches!(decode_reply(br#"{"response": "a"}"#), Err(ProviderError::MalformedResponse(_))));
        assert!(matches!(decode_reply(br#"{"chunks": []}"#), Err(ProviderError::MalformedResponse(_))));
        assert!(matches!(decode_reply(br#"[["a", "b"]]"#), Err(ProviderError::MalformedResponse(_))));
        assert!(matches!(decode_reply(b"not json"), Err(ProviderError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn slow_retrieval_times_out() {
        use axum::routing::post;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/retrieve_chunks",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                axum::Json(json!({ "response": ["late"] }))
            }),
        );
        tokio::spawn(async move { axum::serve(listener, app).await });

        let retriever = HttpRetriever::new(format!("http://{addr}/retrieve_chunks"))
            .request_timeout(Duration::from_millis(100))
            .unwrap();
        let err = retriever.retrieve_chunks("answer").await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn static_retriever_counts_calls() {
        let r = StaticRetriever::new(["one", "two"]);
        assert_eq!(r.retrieve_chunks("x").await.unwrap(), vec!["one", "two"]);
        assert_eq!(r.calls(), 1);
    }
}
