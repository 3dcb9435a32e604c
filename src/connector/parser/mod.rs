//! Parser registry: extension-selected, per-language chunking strategies.

mod declaration;
pub mod quality;
mod structural;
mod text;

pub use declaration::DeclarationParser;
pub use structural::{StructuralOutput, StructuralParser};
pub use text::TextParser;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::{ParsedFile, ParserService};
use crate::domain::{
    ChunkKind, CodeChunk, Grade, IndexConfig, IndexError, Language, ParseQuality, QualityMetrics,
};

/// Dispatches each file to its language's chunking strategy and applies the
/// root-chunk policy.
pub struct ParserRegistry {
    config: Arc<IndexConfig>,
    structural: StructuralParser,
    declaration: DeclarationParser,
    text: TextParser,
}

impl ParserRegistry {
    pub fn new(config: Arc<IndexConfig>) -> Self {
        Self {
            config,
            structural: StructuralParser::new(),
            declaration: DeclarationParser::new(),
            text: TextParser::new(),
        }
    }

    fn root_chunk(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
        parse_quality: ParseQuality,
    ) -> CodeChunk {
        let end_line = (content.lines().count() as u32).max(1);
        let body = truncate_to_size(content, self.config.max_chunk_size).to_string();
        let lines_of_code = body.lines().filter(|l| !l.trim().is_empty()).count() as u32;

        CodeChunk::new(
            file_path.to_string(),
            body,
            1,
            end_line,
            ChunkKind::File,
            language,
        )
        .with_quality(QualityMetrics::new(
            1,
            0,
            0,
            0,
            lines_of_code,
            0,
            Vec::new(),
            Grade::A,
        ))
        .with_parse_quality(parse_quality)
    }
}

#[async_trait]
impl ParserService for ParserRegistry {
    async fn parse_file(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
    ) -> Result<ParsedFile, IndexError> {
        if content.trim().is_empty() {
            return Ok(ParsedFile {
                chunks: vec![self.root_chunk("", file_path, language, ParseQuality::Full)],
                references: Vec::new(),
                parse_quality: ParseQuality::Full,
            });
        }

        if language.is_text_kind() {
            let root = self.root_chunk(content, file_path, language, ParseQuality::Full);
            let sections = self
                .text
                .parse(
                    content,
                    file_path,
                    language,
                    self.config.chunk_size,
                    self.config.chunk_overlap,
                )
                .into_iter()
                .map(|chunk| chunk.with_parent_id(root.id().to_string()))
                .collect::<Vec<_>>();

            let mut chunks = vec![root];
            chunks.extend(sections);
            return Ok(ParsedFile {
                chunks,
                references: Vec::new(),
                parse_quality: ParseQuality::Full,
            });
        }

        if StructuralParser::supports(language) {
            match self
                .structural
                .parse(content, file_path, language, self.config.max_chunk_size)
            {
                Ok(output) if output.invalid => {
                    debug!("{} has syntax errors, keeping raw root chunk", file_path);
                    return Ok(ParsedFile {
                        chunks: vec![self.root_chunk(
                            content,
                            file_path,
                            language,
                            ParseQuality::Invalid,
                        )],
                        references: Vec::new(),
                        parse_quality: ParseQuality::Invalid,
                    });
                }
                Ok(output) => {
                    let chunks = if output.chunks.is_empty() {
                        vec![self.root_chunk(content, file_path, language, ParseQuality::Full)]
                    } else {
                        output.chunks
                    };
                    return Ok(ParsedFile {
                        chunks,
                        references: output.references,
                        parse_quality: ParseQuality::Full,
                    });
                }
                Err(e) => {
                    debug!(
                        "Structural parse of {} failed ({}), falling back to declarations",
                        file_path, e
                    );
                    let (mut chunks, references) = self.declaration.parse(
                        content,
                        file_path,
                        language,
                        self.config.max_chunk_size,
                    );
                    for chunk in &mut chunks {
                        *chunk = chunk.clone().with_parse_quality(ParseQuality::Fallback);
                    }
                    if chunks.is_empty() {
                        chunks = vec![self.root_chunk(
                            content,
                            file_path,
                            language,
                            ParseQuality::Fallback,
                        )];
                    }
                    return Ok(ParsedFile {
                        chunks,
                        references,
                        parse_quality: ParseQuality::Fallback,
                    });
                }
            }
        }

        // Dart and Ruby: the declaration chunker is the primary strategy.
        let (chunks, references) =
            self.declaration
                .parse(content, file_path, language, self.config.max_chunk_size);
        let chunks = if chunks.is_empty() {
            vec![self.root_chunk(content, file_path, language, ParseQuality::Full)]
        } else {
            chunks
        };

        Ok(ParsedFile {
            chunks,
            references,
            parse_quality: ParseQuality::Full,
        })
    }

    fn supported_languages(&self) -> Vec<Language> {
        Language::all_supported()
    }
}

/// Strip surrounding quote or bracket delimiters from an import path.
pub(crate) fn normalize_import_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() < 2 {
        return trimmed.to_string();
    }

    if (trimmed.starts_with('"') && trimmed.ends_with('"'))
        || (trimmed.starts_with('\'') && trimmed.ends_with('\''))
    {
        return trimmed[1..trimmed.len() - 1].to_string();
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        return trimmed[1..trimmed.len() - 1].to_string();
    }

    trimmed.to_string()
}

/// Truncate to at most `max_bytes`, respecting char boundaries.
pub(crate) fn truncate_to_size(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Python docstring: the first triple-quoted string in the declaration body.
pub(crate) fn extract_docstring(body: &str, language: Language) -> Option<String> {
    if language != Language::Python {
        return None;
    }

    let mut lines = body.lines();
    let signature = lines.next()?;
    if !signature.trim_end().ends_with(':') {
        return None;
    }

    let rest: Vec<&str> = lines.collect();
    let first_code = rest.iter().position(|l| !l.trim().is_empty())?;
    let opener = rest[first_code].trim_start();

    let quote = if opener.starts_with("\"\"\"") {
        "\"\"\""
    } else if opener.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    let after_open = &opener[quote.len()..];
    if let Some(end) = after_open.find(quote) {
        let doc = after_open[..end].trim();
        return if doc.is_empty() {
            None
        } else {
            Some(doc.to_string())
        };
    }

    let mut collected = vec![after_open.trim_end().to_string()];
    for line in &rest[first_code + 1..] {
        if let Some(end) = line.find(quote) {
            collected.push(line[..end].trim().to_string());
            let doc = collected.join("\n").trim().to_string();
            return if doc.is_empty() { None } else { Some(doc) };
        }
        collected.push(line.trim().to_string());
    }

    None
}

/// Comment block directly above a declaration line (1-based).
pub(crate) fn extract_leading_comment(
    lines: &[&str],
    start_line: u32,
    language: Language,
) -> Option<String> {
    let markers: &[&str] = match language {
        Language::Python | Language::Ruby => &["#"],
        Language::Dart => &["///", "//"],
        _ => &["///", "//", "*", "/*"],
    };

    let mut collected: Vec<String> = Vec::new();
    let mut idx = start_line as usize;
    while idx >= 2 {
        let line = lines[idx - 2].trim_start();
        let marker = markers.iter().find(|m| line.starts_with(**m));
        match marker {
            Some(marker) => {
                let stripped = line
                    .trim_start_matches(*marker)
                    .trim_start_matches('*')
                    .trim()
                    .trim_end_matches("*/")
                    .trim();
                collected.push(stripped.to_string());
                idx -= 1;
            }
            None => break,
        }
    }

    if collected.is_empty() {
        return None;
    }
    collected.reverse();
    let comment = collected.join("\n").trim().to_string();
    if comment.is_empty() {
        None
    } else {
        Some(comment)
    }
}
