use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Single-shot text generation. No conversation state is kept between calls.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError>;
}

/// Text embedding with a dimension fixed by the provider's configuration.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, ProviderError>> + Send + 'a>>;

/// Wrap an async closure as a `Generator`.
pub fn generator_from_fn<F>(f: F) -> Arc<dyn Generator>
where
    F: for<'a> Fn(&'a str, &'a str) -> GenerateFuture<'a> + Send + Sync + 'static,
{
    struct FnGenerator<F>(F);

    #[async_trait]
    impl<F> Generator for FnGenerator<F>
    where
        F: for<'a> Fn(&'a str, &'a str) -> GenerateFuture<'a> + Send + Sync + 'static,
    {
        async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError> {
            (self.0)(system, user).await
        }
    }

    Arc::new(FnGenerator(f))
}

/// Wrap an async closure as an `Embedder`.
pub fn embedder_from_fn<F>(f: F) -> Arc<dyn Embedder>
where
    F: for<'a> Fn(&'a str) -> EmbedFuture<'a> + Send + Sync + 'static,
{
    struct FnEmbedder<F>(F);

    #[async_trait]
    impl<F> Embedder for FnEmbedder<F>
    where
        F: for<'a> Fn(&'a str) -> EmbedFuture<'a> + Send + Sync + 'static,
    {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            (self.0)(text).await
        }
    }

    Arc::new(FnEmbedder(f))
}

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// The generation and embedding capabilities used for scoring, with a bound
/// on every call. Calls are not retried here.
///
/// Cheap to clone and safe to share between concurrent requests.
#[derive(Clone)]
pub struct ScoringProvider {
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn Embedder>,
    call_timeout: Duration,
}

impl ScoringProvider {
    pub fn new(generator: Arc<dyn Generator>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            generator,
            embedder,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        bounded(self.call_timeout, self.generator.generate(system, user)).await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        bounded(self.call_timeout, self.embedder.embed(text)).await
    }
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(|err| match err {
            ProviderError::Timeout(d) if d.is_zero() => ProviderError::Timeout(limit),
            other => other,
        }),
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_generator() -> Arc<dyn Generator> {
        generator_from_fn(|_system, user| {
            let user = user.to_owned();
            Box::pin(async move { Ok(user) })
        })
    }

    #[tokio::test]
    async fn closure_adapters_forward_calls() {
        let embedder = embedder_from_fn(|text| {
            let len = text.len() as f32;
            Box::pin(async move { Ok(vec![len, 1.0]) })
        });
        let provider = ScoringProvider::new(echo_generator(), embedder);

        assert_eq!(provider.generate("sys", "hello").await.unwrap(), "hello");
        assert_eq!(provider.embed("abc").await.unwrap(), vec![3.0, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let embedder = embedder_from_fn(|_text| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![1.0])
            })
        });
        let provider = ScoringProvider::new(echo_generator(), embedder)
            .with_timeout(Duration::from_millis(50));

        let err = provider.embed("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(50)));
    }
}
