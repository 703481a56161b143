//! RSTA Server Library
//!
//! Local inference service for the screen translation overlay: OCR on
//! captured regions, translation with a local GGUF model, and text analysis
//! through a configured LLM backend. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `ocr`: engine registry and the command-line OCR backends
//! - `translate`: model resolution and the single-slot translation model
//! - `routes`: the HTTP surface

pub mod config;
pub mod error;
pub mod lang;
pub mod llm;
pub mod logging;
pub mod ocr;
pub mod preload;
pub mod routes;
pub mod sse;
pub mod state;
pub mod status;
pub mod translate;

#[cfg(test)]
mod testing;
