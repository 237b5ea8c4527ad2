use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::types::EvalPrompt;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Vec<EvalPrompt>>;
}

pub struct VecDataSource {
    prompts: Vec<EvalPrompt>,
}

impl VecDataSource {
    pub fn new(prompts: Vec<EvalPrompt>) -> Self {
        Self { prompts }
    }
}

#[async_trait]
impl DataSource for VecDataSource {
    async fn load(&self) -> Result<Vec<EvalPrompt>> {
        Ok(self.prompts.clone())
    }
}

/// Read JSONL where each line is either:
/// - {"id": "...", "prompt": "...", "dimension": "robustness"}
/// - {"prompt": "..."}
/// - "..." (a bare prompt string)
pub struct JsonlDataSource {
    path: PathBuf,
}

impl JsonlDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for JsonlDataSource {
    async fn load(&self) -> Result<Vec<EvalPrompt>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        parse_jsonl(&content)
    }
}

fn parse_jsonl(content: &str) -> Result<Vec<EvalPrompt>> {
    let mut prompts = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {}", idx + 1))?;
        if let Value::String(prompt) = value {
            prompts.push(EvalPrompt::new(prompt));
            continue;
        }
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("Line {}: expected object or string", idx + 1))?;
        let prompt = obj
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Line {}: missing string 'prompt'", idx + 1))?;
        let id = obj.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let dimension = obj
            .get("dimension")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        prompts.push(EvalPrompt {
            id,
            prompt: prompt.to_string(),
            dimension,
        });
    }
    Ok(prompts)
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow!(e))??;
    Ok(content)
}
