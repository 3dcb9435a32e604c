use async_trait::async_trait;

use crate::domain::{CodeChunk, IndexError, Language, ParseQuality, SymbolRef};

/// Everything a parser extracted from one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub chunks: Vec<CodeChunk>,
    pub references: Vec<SymbolRef>,
    pub parse_quality: ParseQuality,
}

impl ParsedFile {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            references: Vec::new(),
            parse_quality: ParseQuality::Full,
        }
    }
}

/// Parses source text into semantic chunks plus unresolved symbol
/// references. Implementations are re-entrant and hold no state across
/// calls.
#[async_trait]
pub trait ParserService: Send + Sync {
    async fn parse_file(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
    ) -> Result<ParsedFile, IndexError>;

    fn supported_languages(&self) -> Vec<Language>;

    fn supports_language(&self, language: Language) -> bool {
        self.supported_languages().contains(&language)
    }
}
