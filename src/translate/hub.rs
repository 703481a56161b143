//! Hugging Face model hub client
//!
//! Lists repository files and downloads a single file into a local
//! directory, reporting byte progress. Partial downloads go to a `.part`
//! file that is renamed on completion.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hub errors
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Hub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Hub returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to write model file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

/// Client for a Hugging Face compatible endpoint
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HubClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// File names in a model repository
    pub async fn list_files(&self, repo_id: &str) -> Result<Vec<String>, HubError> {
        let url = format!("{}/api/models/{}", self.endpoint, repo_id);
        let response = self.get(&url).timeout(LIST_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(HubError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        let info: RepoInfo = response.json().await?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// Download `file_name` from `repo_id` into `dest_dir`
    ///
    /// `on_progress` receives (bytes written, total bytes if known) after
    /// every chunk. Returns the final path.
    pub async fn download<F>(
        &self,
        repo_id: &str,
        file_name: &str,
        dest_dir: &Path,
        mut on_progress: F,
    ) -> Result<PathBuf, HubError>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let url = format!("{}/{}/resolve/main/{}", self.endpoint, repo_id, file_name);
        let dest = dest_dir.join(file_name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!("Downloading {} to {}", url, dest.display());
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(HubError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let total = response.content_length();
        let partial = dest.with_extension("gguf.part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_progress(written, total);
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, &dest).await?;
        tracing::info!("Downloaded {} ({} bytes)", file_name, written);
        Ok(dest)
    }
}
