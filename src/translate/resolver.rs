//! Translation model file resolution
//!
//! Order: explicit `MODEL_FILE`, then a local `*.gguf` search under the
//! model directory, then the remote repository listing (only when remote
//! access is allowed). Candidates are filtered by quantization tag and the
//! shortest file name wins, ties broken lexicographically.

use std::fs;
use std::path::{Path, PathBuf};

use super::hub::HubClient;
use super::TranslateError;
use crate::config::TranslateSettings;

/// A model file ready to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub path: PathBuf,
    pub file_name: String,
}

impl ResolvedModel {
    fn from_path(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, file_name }
    }
}

/// Finds (and if permitted downloads) the GGUF file to serve
pub struct ModelResolver {
    repo_id: String,
    quant: String,
    model_dir: PathBuf,
    model_file: Option<String>,
    allow_remote: bool,
    hub: HubClient,
}

impl ModelResolver {
    pub fn from_settings(settings: &TranslateSettings) -> Self {
        Self {
            repo_id: settings.repo_id.clone(),
            quant: settings.quant.clone(),
            model_dir: settings.model_dir.clone(),
            model_file: settings.model_file.clone(),
            allow_remote: settings.allow_remote,
            hub: HubClient::new(settings.hub_endpoint.clone()),
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn quant(&self) -> &str {
        &self.quant
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Resolve the model file, downloading it if allowed
    ///
    /// `Ok(None)` means no file could be found; errors are reserved for
    /// failures while fetching a file that was found.
    pub async fn resolve(&self) -> Result<Option<ResolvedModel>, TranslateError> {
        if let Some(file) = &self.model_file {
            return self.resolve_explicit(file).await;
        }

        if let Some(path) = self.find_local() {
            tracing::info!("Using local translation model {}", path.display());
            return Ok(Some(ResolvedModel::from_path(path)));
        }

        if !self.allow_remote {
            tracing::warn!(
                "No local GGUF model matching {} under {}, remote download disabled",
                self.quant,
                self.model_dir.display()
            );
            return Ok(None);
        }

        let file_name = match self.select_remote().await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("Could not resolve a remote translation model: {}", e);
                return Ok(None);
            }
        };
        self.fetch(&file_name, |_, _| {}).await.map(Some)
    }

    async fn resolve_explicit(&self, file: &str) -> Result<Option<ResolvedModel>, TranslateError> {
        let candidate = PathBuf::from(file);
        if candidate.is_file() {
            return Ok(Some(ResolvedModel::from_path(candidate)));
        }
        if candidate.is_absolute() {
            tracing::warn!("MODEL_FILE {} does not exist", candidate.display());
            return Ok(None);
        }
        let local = self.model_dir.join(&candidate);
        if local.is_file() {
            return Ok(Some(ResolvedModel::from_path(local)));
        }
        if !self.allow_remote {
            tracing::warn!("MODEL_FILE {} not found under {}", file, self.model_dir.display());
            return Ok(None);
        }
        self.fetch(file, |_, _| {}).await.map(Some)
    }

    /// Local GGUF file to use, if any
    pub fn find_local(&self) -> Option<PathBuf> {
        let candidates = list_gguf(&self.model_dir);
        if candidates.len() == 1 {
            return candidates.into_iter().next();
        }
        let names: Vec<(String, PathBuf)> = candidates
            .into_iter()
            .filter_map(|p| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                Some((name, p))
            })
            .collect();
        let chosen = pick_by_quant(names.iter().map(|(n, _)| n.as_str()), &self.quant)?;
        names
            .iter()
            .find(|(n, _)| n == chosen)
            .map(|(_, p)| p.clone())
    }

    /// Any GGUF file present, for status reporting
    pub fn any_local(&self) -> Option<PathBuf> {
        list_gguf(&self.model_dir).into_iter().next()
    }

    /// Pick the repository file matching the quantization tag
    pub async fn select_remote(&self) -> Result<String, TranslateError> {
        let files = self.hub.list_files(&self.repo_id).await?;
        let gguf: Vec<&str> = files
            .iter()
            .map(String::as_str)
            .filter(|f| f.to_lowercase().ends_with(".gguf"))
            .collect();
        if gguf.is_empty() {
            return Err(TranslateError::NoRemoteMatch(format!(
                "repository {} has no GGUF files",
                self.repo_id
            )));
        }
        pick_by_quant(gguf, &self.quant)
            .map(str::to_string)
            .ok_or_else(|| {
                TranslateError::NoRemoteMatch(format!(
                    "no GGUF file in {} matches quantization {}",
                    self.repo_id, self.quant
                ))
            })
    }

    /// Download a repository file into the model directory
    ///
    /// An existing local copy is returned without downloading.
    pub async fn fetch<F>(&self, file_name: &str, on_progress: F) -> Result<ResolvedModel, TranslateError>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let local = self.model_dir.join(file_name);
        if local.is_file() {
            return Ok(ResolvedModel::from_path(local));
        }
        let path = self
            .hub
            .download(&self.repo_id, file_name, &self.model_dir, on_progress)
            .await?;
        Ok(ResolvedModel::from_path(path))
    }
}

/// Shortest name containing the quantization tag (case-insensitive)
pub fn pick_by_quant<'a, I>(names: I, quant: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let quant = quant.to_lowercase();
    names
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&quant))
        .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
}

/// All `*.gguf` files under `dir`, recursively, sorted by path
fn list_gguf(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("gguf"))
                .unwrap_or(false)
            {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(dir: &Path, model_file: Option<&str>) -> ModelResolver {
        ModelResolver {
            repo_id: "tencent/HY-MT1.5-1.8B-GGUF".to_string(),
            quant: "Q6_K".to_string(),
            model_dir: dir.to_path_buf(),
            model_file: model_file.map(str::to_string),
            allow_remote: false,
            hub: HubClient::new("http://127.0.0.1:9"),
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"gguf").unwrap();
    }

    #[test]
    fn test_pick_shortest_then_lexicographic() {
        let names = ["model-Q6_K-extra.gguf", "b-q6_k.gguf", "a-Q6_K.gguf", "m-Q4_K.gguf"];
        assert_eq!(pick_by_quant(names, "Q6_K"), Some("a-Q6_K.gguf"));
        assert_eq!(pick_by_quant(names, "Q8_0"), None);
    }

    #[test]
    fn test_single_local_file_wins_regardless_of_quant() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("nested/only-Q4_K_M.gguf"));
        let found = resolver(dir.path(), None).find_local().unwrap();
        assert!(found.ends_with("nested/only-Q4_K_M.gguf"));
    }

    #[test]
    fn test_local_quant_filter() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("HY-MT1.5-1.8B-Q4_K_M.gguf"));
        touch(&dir.path().join("HY-MT1.5-1.8B-Q6_K.gguf"));
        touch(&dir.path().join("sub/HY-MT1.5-1.8B-Q6_K-imatrix.gguf"));

        let found = resolver(dir.path(), None).find_local().unwrap();
        assert!(found.ends_with("HY-MT1.5-1.8B-Q6_K.gguf"));
    }

    #[tokio::test]
    async fn test_unresolvable_without_remote_is_none() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a-Q4_K.gguf"));
        touch(&dir.path().join("b-Q8_0.gguf"));
        assert_eq!(resolver(dir.path(), None).resolve().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_explicit_file_relative_to_model_dir() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("custom.gguf"));
        touch(&dir.path().join("other-Q6_K.gguf"));

        let resolved = resolver(dir.path(), Some("custom.gguf"))
            .resolve()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.file_name, "custom.gguf");
    }

    #[tokio::test]
    async fn test_missing_absolute_override_is_none() {
        let dir = TempDir::new().unwrap();
        let resolved = resolver(dir.path(), Some("/nonexistent/model.gguf"))
            .resolve()
            .await
            .unwrap();
        assert!(resolved.is_none());
    }
}
