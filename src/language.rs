//! The two languages bridged by a guild, and translation direction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of the bridge.
///
/// `Chinese` is the CJK-script side, `English` the Latin-script side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Chinese,
    English,
}

impl Language {
    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::Chinese => "zh",
            Language::English => "en",
        }
    }

    /// Name used in prompts to the translation model.
    pub fn prompt_name(&self) -> &'static str {
        match self {
            Language::Chinese => "Chinese (Simplified)",
            Language::English => "English",
        }
    }

    pub fn other(&self) -> Language {
        match self {
            Language::Chinese => Language::English,
            Language::English => Language::Chinese,
        }
    }

    /// Sentence-terminal question mark in this language's script.
    pub fn question_mark(&self) -> char {
        match self {
            Language::Chinese => '？',
            Language::English => '?',
        }
    }

    /// Parse a code or name as typed by a guild admin ("zh", "中文", "english", ...).
    pub fn parse(input: &str) -> Option<Language> {
        match input.trim().to_lowercase().as_str() {
            "zh" | "cn" | "chinese" | "中文" | "汉语" => Some(Language::Chinese),
            "en" | "english" | "英文" | "英语" => Some(Language::English),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Direction of one translation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ZhToEn,
    EnToZh,
}

impl Direction {
    pub fn source(&self) -> Language {
        match self {
            Direction::ZhToEn => Language::Chinese,
            Direction::EnToZh => Language::English,
        }
    }

    pub fn target(&self) -> Language {
        self.source().other()
    }

    /// Direction that translates text written in `source`.
    pub fn from_source(source: Language) -> Direction {
        match source {
            Language::Chinese => Direction::ZhToEn,
            Language::English => Direction::EnToZh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::Chinese.code(), "zh");
        assert_eq!(Language::English.code(), "en");
    }

    #[test]
    fn test_language_other() {
        assert_eq!(Language::Chinese.other(), Language::English);
        assert_eq!(Language::English.other(), Language::Chinese);
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("zh"), Some(Language::Chinese));
        assert_eq!(Language::parse(" 中文 "), Some(Language::Chinese));
        assert_eq!(Language::parse("English"), Some(Language::English));
        assert_eq!(Language::parse("英文"), Some(Language::English));
        assert_eq!(Language::parse("fr"), None);
        assert_eq!(Language::parse(""), None);
    }

    #[test]
    fn test_direction_languages() {
        assert_eq!(Direction::ZhToEn.source(), Language::Chinese);
        assert_eq!(Direction::ZhToEn.target(), Language::English);
        assert_eq!(Direction::EnToZh.source(), Language::English);
        assert_eq!(Direction::EnToZh.target(), Language::Chinese);
        assert_eq!(Direction::from_source(Language::English), Direction::EnToZh);
    }

    #[test]
    fn test_language_serde() {
        let json = serde_json::to_string(&Language::Chinese).expect("serialize");
        assert_eq!(json, "\"chinese\"");
        let lang: Language = serde_json::from_str("\"english\"").expect("deserialize");
        assert_eq!(lang, Language::English);
    }
}
