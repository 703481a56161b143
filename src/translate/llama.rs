//! llama.cpp server backend
//!
//! Serves the GGUF file from a `llama-server` child process bound to a free
//! loopback port. The child lives as long as the model handle and is killed
//! when it is dropped.

use std::net::TcpListener;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::model::{CompletionModel, LoadParams, ModelError, ModelLoader, SamplingParams};
use crate::sse::{self, TokenEvent, TokenStream};

/// How long to wait for the server to report healthy
const STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Starts `llama-server` for a model file
pub struct LlamaServerLoader {
    binary: String,
    client: reqwest::Client,
}

impl LlamaServerLoader {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelLoader for LlamaServerLoader {
    fn name(&self) -> &'static str {
        "llama"
    }

    async fn load(
        &self,
        path: &Path,
        params: &LoadParams,
    ) -> Result<Arc<dyn CompletionModel>, ModelError> {
        let port = free_port()?;
        tracing::info!(
            "Starting {} for {} on port {} (ctx={}, threads={}, batch={})",
            self.binary,
            path.display(),
            port,
            params.n_ctx,
            params.n_threads,
            params.n_batch
        );

        let mut child = Command::new(&self.binary)
            .arg("-m")
            .arg(path)
            .arg("-c")
            .arg(params.n_ctx.to_string())
            .arg("-t")
            .arg(params.n_threads.to_string())
            .arg("-b")
            .arg(params.n_batch.to_string())
            .args(["-ngl", "0", "--parallel", "1", "--host", "127.0.0.1"])
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModelError::Spawn(format!("{}: {}", self.binary, e)))?;

        let base_url = format!("http://127.0.0.1:{}", port);
        wait_until_healthy(&self.client, &base_url, &mut child).await?;
        tracing::info!("llama-server ready at {}", base_url);

        Ok(Arc::new(LlamaServerModel {
            client: self.client.clone(),
            base_url,
            _child: Mutex::new(child),
        }))
    }
}

/// Ask the OS for an unused loopback port
fn free_port() -> Result<u16, ModelError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

async fn wait_until_healthy(
    client: &reqwest::Client,
    base_url: &str,
    child: &mut Child,
) -> Result<(), ModelError> {
    let started = Instant::now();
    let url = format!("{}/health", base_url);
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(ModelError::NotReady(format!(
                "llama-server exited with {}",
                status
            )));
        }
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            // 503 while the model is still loading
            Ok(_) | Err(_) => {}
        }
        if started.elapsed() > STARTUP_TIMEOUT {
            return Err(ModelError::NotReady(format!(
                "no healthy response after {}s",
                STARTUP_TIMEOUT.as_secs()
            )));
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
}

/// A model served by a running `llama-server`
struct LlamaServerModel {
    client: reqwest::Client,
    base_url: String,
    _child: Mutex<Child>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

impl LlamaServerModel {
    fn request_body(prompt: &str, params: &SamplingParams, stream: bool) -> serde_json::Value {
        json!({
            "prompt": prompt,
            "n_predict": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "top_k": params.top_k,
            "repeat_penalty": params.repeat_penalty,
            "stream": stream,
            "cache_prompt": true,
        })
    }

    async fn post(
        &self,
        prompt: &str,
        params: &SamplingParams,
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&Self::request_body(prompt, params, stream))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Request(format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionModel for LlamaServerModel {
    async fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<String, ModelError> {
        let response = self.post(prompt, params, false).await?;
        let chunk: CompletionChunk = response
            .json()
            .await
            .map_err(|e| ModelError::Protocol(e.to_string()))?;
        Ok(chunk.content.trim().to_string())
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<TokenStream, ModelError> {
        let response = self.post(prompt, params, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();
        Ok(sse::token_stream(bytes, parse_completion_frame))
    }
}

/// Map one llama-server `data:` payload to token events
fn parse_completion_frame(payload: &str) -> Vec<TokenEvent> {
    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => {
            let mut events = Vec::with_capacity(2);
            if !chunk.content.is_empty() {
                events.push(TokenEvent::Token(chunk.content));
            }
            if chunk.stop {
                events.push(TokenEvent::Done);
            }
            events
        }
        Err(e) => {
            tracing::debug!("Skipping malformed completion frame: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&str]) -> sse::ByteStream {
        let owned: Vec<Result<Vec<u8>, String>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned).boxed()
    }

    #[tokio::test]
    async fn test_decode_tokens_until_stop() {
        let events: Vec<_> = sse::token_stream(
            chunks(&[
                "data: {\"content\":\"Bon\",\"stop\":false}\n\n",
                "data: {\"content\":\"jour\",\"st",
                "op\":false}\n\ndata: {\"content\":\"\",\"stop\":true}\n\n",
                "data: {\"content\":\"ignored\",\"stop\":false}\n\n",
            ]),
            parse_completion_frame,
        )
        .collect()
        .await;

        assert_eq!(
            events,
            vec![
                TokenEvent::Token("Bon".into()),
                TokenEvent::Token("jour".into()),
                TokenEvent::Done
            ]
        );
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        assert!(parse_completion_frame("not json").is_empty());
        assert_eq!(
            parse_completion_frame("{\"content\":\"x\",\"stop\":true}"),
            vec![TokenEvent::Token("x".into()), TokenEvent::Done]
        );
    }

    #[test]
    fn test_request_body_carries_sampling() {
        let body = LlamaServerModel::request_body("hi", &SamplingParams::default(), true);
        assert_eq!(body["n_predict"], 256);
        assert_eq!(body["top_k"], 20);
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let loader = LlamaServerLoader::new("rsta-no-such-llama-server");
        let result = loader
            .load(Path::new("/nonexistent.gguf"), &LoadParams::default())
            .await;
        assert!(matches!(result, Err(ModelError::Spawn(_))));
    }
}
