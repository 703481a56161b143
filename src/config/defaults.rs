//! Built-in configuration defaults
//!
//! Shared with the desktop overlay, which owns most of the non-service keys
//! (hotkeys, UI). They are kept here so a fresh install gets a complete file.

use serde_json::{json, Value};

/// The default configuration document
pub fn default_document() -> Value {
    json!({
        "hotkey": "Ctrl+Alt+Q",
        "swap_hotkey": "Ctrl+Alt+A",
        "close_overlay_hotkey": "Escape",
        "ocr_lang": "eng",
        "ocr_engine": "paddleocr",
        "source_lang": "en",
        "target_lang": "zh",
        "translator": "unified",
        "libretranslate": {
            "url": "http://localhost:5000/translate",
            "api_key": "",
            "stream": true
        },
        "model_dir": "models",
        "paddleocr": {
            "lang": "en",
            "ocr_version": "PP-OCRv5",
            "model_type": "mobile",
            "use_textline_orientation": true,
            "use_gpu": false,
            "auto_download": false,
            "debug": false,
            "text_rec_score_thresh": 0.3,
            "box_thresh": 0.3,
            "unclip_ratio": 1.6,
            "max_side": 1800,
            "min_side_for_upscale": 100
        },
        "local_service": {
            "host": "127.0.0.1",
            "port": 8092,
            "model_repo": "tencent/HY-MT1.5-1.8B-GGUF",
            "quant": "Q6_K",
            "allow_remote": true
        },
        "unified_service": {
            "host": "127.0.0.1",
            "port": 8092,
            "timeout": 30,
            "ocr_model_type": "mobile",
            "preload_ocr": [],
            "ocr_backends": ["tesseract", "paddleocr"]
        },
        "startup": {
            "auto_load_ocr": false,
            "auto_load_translator": false
        },
        "ui": {
            "overlay_max_width": 300
        },
        "llm": {
            "api_key": "",
            "base_url": "",
            "model": "",
            "max_tokens": 2048,
            "temperature": 0.7
        }
    })
}
