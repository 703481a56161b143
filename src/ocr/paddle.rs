//! PaddleOCR CLI backend
//!
//! Drives the PaddleOCR 3.x `paddleocr ocr` pipeline. Weights are looked up
//! (and, when allowed, downloaded) under `PADDLE_PDX_CACHE_HOME`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::backend::{
    ConstructError, EngineOptions, EngineSpec, OcrBackend, OcrEngine, OptionKey, ScratchDir,
};
use super::types::{BackendKind, OcrError, TextRegion};
use crate::lang;

const SUPPORTED_OPTIONS: &[OptionKey] = &[
    OptionKey::Lang,
    OptionKey::Device,
    OptionKey::DetectionModel,
    OptionKey::RecognitionModel,
    OptionKey::TextlineOrientation,
    OptionKey::RecScoreThresh,
    OptionKey::BoxThresh,
    OptionKey::UnclipRatio,
    OptionKey::CpuThreads,
];

/// Keys that hold recognized text in a result document
const TEXT_KEYS: &[&str] = &[
    "rec_texts",
    "rec_text",
    "text",
    "label",
    "transcription",
    "content",
];

/// Builds engines backed by the `paddleocr` executable
pub struct PaddleCliBackend {
    binary: String,
    paddlex_home: PathBuf,
}

impl PaddleCliBackend {
    pub fn new(binary: impl Into<String>, paddlex_home: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            paddlex_home: paddlex_home.into(),
        }
    }

    async fn is_available(&self) -> bool {
        let result = Command::new(&self.binary)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        matches!(result, Ok(status) if status.success())
    }
}

#[async_trait]
impl OcrBackend for PaddleCliBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PaddleOcr
    }

    fn supported_options(&self) -> &'static [OptionKey] {
        SUPPORTED_OPTIONS
    }

    fn requires_weights(&self) -> bool {
        true
    }

    async fn construct(&self, spec: &EngineSpec) -> Result<Arc<dyn OcrEngine>, ConstructError> {
        if !self.is_available().await {
            return Err(ConstructError::Unavailable(format!(
                "'{}' is not installed",
                self.binary
            )));
        }

        Ok(Arc::new(PaddleCliEngine {
            binary: self.binary.clone(),
            paddlex_home: self.paddlex_home.clone(),
            args: cli_args(&spec.options, &spec.key.lang),
        }))
    }
}

/// Render options as `paddleocr ocr` flags
fn cli_args(options: &EngineOptions, default_lang: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(options.len() * 2 + 2);
    let tag = options.get(OptionKey::Lang).unwrap_or(default_lang);
    args.push("--lang".to_string());
    args.push(lang::paddle_code(tag).to_string());

    for (key, value) in options.iter() {
        let value = match key {
            OptionKey::Lang => continue,
            OptionKey::TextlineOrientation => python_bool(value),
            _ => value.to_string(),
        };
        args.push(format!("--{}", key));
        args.push(value);
    }

    args.extend(
        ["--use_doc_orientation_classify", "False", "--use_doc_unwarping", "False"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

fn python_bool(value: &str) -> String {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => "True".to_string(),
        _ => "False".to_string(),
    }
}

struct PaddleCliEngine {
    binary: String,
    paddlex_home: PathBuf,
    args: Vec<String>,
}

#[async_trait]
impl OcrEngine for PaddleCliEngine {
    fn backend(&self) -> BackendKind {
        BackendKind::PaddleOcr
    }

    async fn recognize(&self, png: &[u8]) -> Result<Vec<TextRegion>, OcrError> {
        let scratch = ScratchDir::create("rsta_paddle").await?;
        let input = scratch.path().join("input.png");
        let save_dir = scratch.path().join("out");
        tokio::fs::write(&input, png).await?;

        let output = Command::new(&self.binary)
            .arg("ocr")
            .arg("-i")
            .arg(&input)
            .arg("--save_path")
            .arg(&save_dir)
            .args(&self.args)
            .env("PADDLE_PDX_CACHE_HOME", &self.paddlex_home)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::Recognition(format!("Failed to run paddleocr: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(OcrError::Recognition(format!("PaddleOCR failed: {}", tail)));
        }

        let mut regions = Vec::new();
        for path in result_files(&save_dir)? {
            let raw = tokio::fs::read_to_string(&path).await?;
            let document: Value = serde_json::from_str(&raw).map_err(|e| {
                OcrError::Recognition(format!("Malformed result {}: {}", path.display(), e))
            })?;
            regions.extend(extract_texts(&document).into_iter().map(TextRegion::new));
        }
        Ok(regions)
    }
}

/// `*_res.json` files under the save directory, sorted by name
fn result_files(dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_res.json"))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Collect recognized strings from a PaddleOCR result document
fn extract_texts(value: &Value) -> Vec<String> {
    let mut texts = Vec::new();
    collect_texts(value, &mut texts);
    texts.retain(|t| !t.trim().is_empty());
    texts
}

fn collect_texts(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_texts(item, out);
            }
        }
        Value::Object(map) => {
            for key in TEXT_KEYS {
                match map.get(*key) {
                    Some(Value::String(s)) => out.push(s.clone()),
                    Some(Value::Array(items)) => {
                        for item in items {
                            match item {
                                Value::String(s) => out.push(s.clone()),
                                other => collect_texts(other, out),
                            }
                        }
                    }
                    _ => {}
                }
            }
            if let Some(res) = map.get("res") {
                collect_texts(res, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_rec_texts() {
        let doc = json!({
            "res": {
                "input_path": "input.png",
                "rec_texts": ["Hello", "", "world"],
                "rec_scores": [0.99, 0.1, 0.97]
            }
        });
        assert_eq!(extract_texts(&doc), vec!["Hello", "world"]);
    }

    #[test]
    fn test_extract_nested_and_alternate_keys() {
        let doc = json!([
            {"transcription": "line one"},
            {"res": [{"text": "line two"}, {"label": ["line three"]}]}
        ]);
        assert_eq!(
            extract_texts(&doc),
            vec!["line one", "line two", "line three"]
        );
    }

    #[test]
    fn test_cli_args_map_language_and_bools() {
        let options = EngineOptions::new()
            .with(OptionKey::Lang, "ja")
            .with(OptionKey::TextlineOrientation, true)
            .with(OptionKey::Device, "cpu");
        let args = cli_args(&options, "en");

        assert_eq!(&args[..2], &["--lang", "japan"]);
        let joined = args.join(" ");
        assert!(joined.contains("--device cpu"));
        assert!(joined.contains("--use_textline_orientation True"));
    }

    #[test]
    fn test_result_files_finds_nested() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/input_res.json"), "{}").unwrap();
        std::fs::write(dir.path().join("input_ocr_res_img.png"), "").unwrap();

        let files = result_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("sub/input_res.json"));
    }
}
