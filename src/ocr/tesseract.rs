//! Tesseract CLI backend
//!
//! Requires `tesseract` on PATH with traineddata for the requested language.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use super::backend::{ConstructError, EngineSpec, OcrBackend, OcrEngine, OptionKey, ScratchDir};
use super::types::{BackendKind, OcrError, TextRegion};
use crate::lang;

const SUPPORTED_OPTIONS: &[OptionKey] = &[OptionKey::Lang, OptionKey::CpuThreads];

/// Builds engines backed by the `tesseract` executable
pub struct TesseractBackend {
    binary: String,
}

impl TesseractBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Installed traineddata names, or `None` if tesseract cannot run
    async fn installed_languages(&self) -> Option<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        // First line is a header ("List of available languages ...")
        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(
            stdout
                .lines()
                .skip(1)
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        )
    }

    async fn is_available(&self) -> bool {
        let result = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        matches!(result, Ok(status) if status.success())
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tesseract
    }

    fn supported_options(&self) -> &'static [OptionKey] {
        SUPPORTED_OPTIONS
    }

    async fn construct(&self, spec: &EngineSpec) -> Result<Arc<dyn OcrEngine>, ConstructError> {
        if !self.is_available().await {
            return Err(ConstructError::Unavailable(format!(
                "'{}' is not installed",
                self.binary
            )));
        }

        let tag = spec.options.get(OptionKey::Lang).unwrap_or(spec.key.lang.as_str());
        let code = lang::tesseract_code(tag);
        if let Some(installed) = self.installed_languages().await {
            if !installed.iter().any(|l| l == code) {
                return Err(ConstructError::Unavailable(format!(
                    "tesseract language '{}' is not installed",
                    code
                )));
            }
        }

        let threads = spec
            .options
            .get(OptionKey::CpuThreads)
            .map(str::to_string);

        Ok(Arc::new(TesseractEngine {
            binary: self.binary.clone(),
            lang: code.to_string(),
            threads,
        }))
    }
}

struct TesseractEngine {
    binary: String,
    lang: String,
    threads: Option<String>,
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn backend(&self) -> BackendKind {
        BackendKind::Tesseract
    }

    async fn recognize(&self, png: &[u8]) -> Result<Vec<TextRegion>, OcrError> {
        let scratch = ScratchDir::create("rsta_tesseract").await?;
        let input = scratch.path().join("input.png");
        let output_base = scratch.path().join("out");
        tokio::fs::write(&input, png).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg(&input)
            .arg(&output_base)
            .args(["-l", self.lang.as_str(), "--psm", "6"])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(threads) = &self.threads {
            command.env("OMP_THREAD_LIMIT", threads);
        }

        let output = command
            .output()
            .await
            .map_err(|e| OcrError::Recognition(format!("Failed to run tesseract: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Recognition(format!(
                "Tesseract failed: {}",
                stderr.trim()
            )));
        }

        let text = tokio::fs::read_to_string(scratch.path().join("out.txt")).await?;
        Ok(parse_lines(&text))
    }
}

/// One region per non-empty line
fn parse_lines(text: &str) -> Vec<TextRegion> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TextRegion::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{EngineKey, EngineOptions, ModelVariant};

    #[test]
    fn test_parse_lines_skips_blank() {
        let regions = parse_lines("Hello world\n\n  second line \n\u{c}\n");
        let texts: Vec<_> = regions.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello world", "second line"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let backend = TesseractBackend::new("rsta-no-such-tesseract");
        let spec = EngineSpec {
            key: EngineKey::new(ModelVariant::Mobile, "en"),
            options: EngineOptions::new(),
        };
        assert!(matches!(
            backend.construct(&spec).await,
            Err(ConstructError::Unavailable(_))
        ));
    }
}
