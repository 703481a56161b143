//! Language tags and prompt construction
//!
//! The overlay sends short ISO-style tags (`en`, `zh-hant`, `ja`, ...). Each
//! consumer needs a different spelling: OCR engines want their own language
//! codes, the translation model wants an English language name, and the
//! analysis prompt wants a localized name.

/// Normalize a language tag for use in cache keys
pub fn normalize_tag(lang: &str) -> String {
    let tag = lang.trim().to_lowercase();
    if tag.is_empty() {
        "en".to_string()
    } else {
        tag
    }
}

/// Human-readable language name used in translation prompts
pub fn display_name(lang: &str) -> String {
    let name = match normalize_tag(lang).as_str() {
        "en" => "English",
        "zh" | "zh-cn" | "zh-hans" => "Chinese",
        "zh-hant" => "Traditional Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "pt" => "Portuguese",
        "it" => "Italian",
        "vi" => "Vietnamese",
        _ => return lang.to_string(),
    };
    name.to_string()
}

/// Whether a language (tag or display name) is a Chinese variant
pub fn is_chinese(lang: &str) -> bool {
    matches!(
        lang.trim().to_lowercase().as_str(),
        "chinese" | "traditional chinese" | "zh" | "zh-cn" | "zh-hans" | "zh-hant"
    )
}

/// PaddleOCR language code
pub fn paddle_code(lang: &str) -> &'static str {
    match normalize_tag(lang).as_str() {
        "zh" | "zh-cn" | "zh-hans" => "ch",
        "zh-hant" => "chinese_cht",
        "ja" => "japan",
        "ko" => "korean",
        "fr" => "fr",
        "de" => "german",
        "es" => "es",
        "ru" => "ru",
        "pt" => "pt",
        "it" => "it",
        "vi" => "vi",
        _ => "en",
    }
}

/// Tesseract traineddata name
pub fn tesseract_code(lang: &str) -> &'static str {
    match normalize_tag(lang).as_str() {
        "zh" | "zh-cn" | "zh-hans" => "chi_sim",
        "zh-hant" => "chi_tra",
        "ja" => "jpn",
        "ko" => "kor",
        "fr" => "fra",
        "de" => "deu",
        "es" => "spa",
        "ru" => "rus",
        "pt" => "por",
        "it" => "ita",
        "vi" => "vie",
        _ => "eng",
    }
}

/// Language name as shown inside the analysis prompt
pub fn llm_name(lang: &str) -> String {
    let name = match normalize_tag(lang).as_str() {
        "en" => "英语",
        "zh" => "中文",
        "ja" => "日语",
        "ko" => "韩语",
        "fr" => "法语",
        "de" => "德语",
        "es" => "西班牙语",
        "ru" => "俄语",
        _ => return lang.to_string(),
    };
    name.to_string()
}

/// Build the completion prompt for the translation model
///
/// The model was tuned with a Chinese instruction whenever either side of
/// the pair is Chinese, and an English one otherwise.
pub fn build_translate_prompt(source: &str, target: &str, text: &str) -> String {
    let source = display_name(source);
    let target = display_name(target);
    if is_chinese(&source) || is_chinese(&target) {
        format!(
            "将以下文本翻译为{},注意只需要输出翻译后的结果,不要额外解释:\n\n{}",
            target, text
        )
    } else {
        format!(
            "Translate the following segment into {}, without additional explanation.\n\n{}",
            target, text
        )
    }
}

/// Build the grammar/vocabulary analysis prompt sent to the LLM backend
pub fn build_analyze_prompt(text: &str, source: &str, target: &str) -> String {
    format!(
        "请分析以下{source}文本的语法结构和重点词汇,用{target}解释:\n\n\
         原文:{text}\n\n\
         请按以下格式输出:\n\n\
         【语法分析】\n分析句子的语法结构,包括主谓宾、从句、时态等。\n\n\
         【重点词汇】\n列出重要的单词或短语,给出释义和用法说明。\n\n\
         【学习要点】\n总结这段文本中值得学习的语言点。\n",
        source = llm_name(source),
        target = llm_name(target),
        text = text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  ZH-Hant "), "zh-hant");
        assert_eq!(normalize_tag(""), "en");
    }

    #[test]
    fn test_engine_codes() {
        assert_eq!(paddle_code("zh"), "ch");
        assert_eq!(paddle_code("xx"), "en");
        assert_eq!(tesseract_code("ja"), "jpn");
        assert_eq!(tesseract_code("unknown"), "eng");
    }

    #[test]
    fn test_prompt_language_switch() {
        let zh = build_translate_prompt("en", "zh", "hello");
        assert!(zh.starts_with("将以下文本翻译为Chinese"));
        assert!(zh.ends_with("hello"));

        let fr = build_translate_prompt("en", "fr", "hello");
        assert!(fr.starts_with("Translate the following segment into French"));
    }

    #[test]
    fn test_unknown_language_passes_through() {
        assert_eq!(display_name("tlh"), "tlh");
        assert_eq!(llm_name("tlh"), "tlh");
    }
}
