//! Best-effort language classification for transcript annotation.
//!
//! This is deliberately a heuristic: Devanagari codepoints mean Nepali,
//! mostly-Latin text means English, anything else is Other. It annotates
//! UI snapshots only and must never drive a state-machine branch. Swap the
//! body for a real detector without touching callers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Detected language of a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedLanguage {
    /// English (Latin script)
    En,
    /// Nepali (Devanagari script)
    Ne,
    /// Unknown or mixed
    Other,
}

impl DetectedLanguage {
    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            DetectedLanguage::En => "en",
            DetectedLanguage::Ne => "ne",
            DetectedLanguage::Other => "other",
        }
    }
}

static DEVANAGARI: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ऀ-ॿ]").expect("valid regex"));
static LATIN_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]{2,}").expect("valid regex"));

/// Classify a transcript fragment by script.
pub fn classify_language(text: &str) -> DetectedLanguage {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DetectedLanguage::Other;
    }
    if DEVANAGARI.is_match(trimmed) {
        return DetectedLanguage::Ne;
    }
    if LATIN_WORD.is_match(trimmed) {
        return DetectedLanguage::En;
    }
    DetectedLanguage::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english() {
        assert_eq!(classify_language("hello world"), DetectedLanguage::En);
    }

    #[test]
    fn test_nepali() {
        assert_eq!(classify_language("नमस्ते संसार"), DetectedLanguage::Ne);
    }

    #[test]
    fn test_mixed_prefers_devanagari() {
        assert_eq!(classify_language("hello नमस्ते"), DetectedLanguage::Ne);
    }

    #[test]
    fn test_other() {
        assert_eq!(classify_language("123 !?"), DetectedLanguage::Other);
        assert_eq!(classify_language(""), DetectedLanguage::Other);
        assert_eq!(classify_language("   "), DetectedLanguage::Other);
    }

    #[test]
    fn test_codes() {
        assert_eq!(DetectedLanguage::En.code(), "en");
        assert_eq!(DetectedLanguage::Ne.code(), "ne");
        assert_eq!(DetectedLanguage::Other.code(), "other");
    }
}
