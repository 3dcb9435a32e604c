use serde::{Deserialize, Serialize};

use super::{Language, QualityMetrics};

/// Computes the 128-bit content digest of a chunk's text (deduplication key).
///
/// A pure function of `content`: chunks with equal digests are
/// interchangeable for embedding purposes.
pub fn content_hash(content: &str) -> String {
    format!(
        "{:032x}",
        xxhash_rust::xxh3::xxh3_128(content.as_bytes())
    )
}

/// Derives the stable chunk identifier from its location and kind.
pub fn chunk_id(file_path: &str, start_line: u32, end_line: u32, kind: ChunkKind) -> String {
    let key = format!("{}:{}:{}:{}", file_path, start_line, end_line, kind.as_str());
    format!("{:032x}", xxhash_rust::xxh3::xxh3_128(key.as_bytes()))
}

fn epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A contiguous region of a source artifact with semantic meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    id: String,
    file_path: String,
    start_line: u32,
    end_line: u32,
    kind: ChunkKind,
    name: Option<String>,
    language: Language,
    content: String,
    content_hash: String,
    docstring: Option<String>,
    leading_comment: Option<String>,
    parent_id: Option<String>,
    quality: QualityMetrics,
    parse_quality: ParseQuality,
    created_at: i64,
    updated_at: i64,
}

impl CodeChunk {
    pub fn new(
        file_path: String,
        content: String,
        start_line: u32,
        end_line: u32,
        kind: ChunkKind,
        language: Language,
    ) -> Self {
        let id = chunk_id(&file_path, start_line, end_line, kind);
        let digest = content_hash(&content);
        let now = epoch_seconds();

        Self {
            id,
            file_path,
            start_line,
            end_line,
            kind,
            name: None,
            language,
            content,
            content_hash: digest,
            docstring: None,
            leading_comment: None,
            parent_id: None,
            quality: QualityMetrics::default(),
            parse_quality: ParseQuality::Full,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstitutes from persisted data (used by storage adapters).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: String,
        file_path: String,
        start_line: u32,
        end_line: u32,
        kind: ChunkKind,
        name: Option<String>,
        language: Language,
        content: String,
        content_hash: String,
        docstring: Option<String>,
        leading_comment: Option<String>,
        parent_id: Option<String>,
        quality: QualityMetrics,
        parse_quality: ParseQuality,
        created_at: i64,
        updated_at: i64,
    ) -> Self {
        Self {
            id,
            file_path,
            start_line,
            end_line,
            kind,
            name,
            language,
            content,
            content_hash,
            docstring,
            leading_comment,
            parent_id,
            quality,
            parse_quality,
            created_at,
            updated_at,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    pub fn with_leading_comment(mut self, comment: impl Into<String>) -> Self {
        self.leading_comment = Some(comment.into());
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_quality(mut self, quality: QualityMetrics) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_parse_quality(mut self, parse_quality: ParseQuality) -> Self {
        self.parse_quality = parse_quality;
        self
    }

    /// Preserves the original creation timestamp when a chunk is rewritten
    /// in place (same id, changed content).
    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn docstring(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    pub fn leading_comment(&self) -> Option<&str> {
        self.leading_comment.as_deref()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn quality(&self) -> &QualityMetrics {
        &self.quality
    }

    pub fn parse_quality(&self) -> ParseQuality {
        self.parse_quality
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ChunkKind::Function | ChunkKind::Method)
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, ChunkKind::File)
    }

    pub fn preview(&self, max_lines: usize) -> String {
        self.content
            .lines()
            .take(max_lines)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The structural role of a chunk within its source artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    File,
    Class,
    Function,
    Method,
    Block,
    Section,
    Paragraph,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::File => "file",
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Block => "block",
            ChunkKind::Section => "section",
            ChunkKind::Paragraph => "paragraph",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "file" => ChunkKind::File,
            "class" => ChunkKind::Class,
            "function" => ChunkKind::Function,
            "method" => ChunkKind::Method,
            "section" => ChunkKind::Section,
            "paragraph" => ChunkKind::Paragraph,
            _ => ChunkKind::Block,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How faithfully the parser understood the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseQuality {
    /// The structural parser produced the chunks.
    Full,
    /// The regex declaration chunker produced the chunks.
    Fallback,
    /// The file was syntactically invalid; a single raw root chunk remains.
    Invalid,
}

impl ParseQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseQuality::Full => "full",
            ParseQuality::Fallback => "fallback",
            ParseQuality::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "fallback" => ParseQuality::Fallback,
            "invalid" => ParseQuality::Invalid,
            _ => ParseQuality::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        let a = chunk_id("src/app.py", 10, 20, ChunkKind::Function);
        let b = chunk_id("src/app.py", 10, 20, ChunkKind::Function);
        assert_eq!(a, b);

        let c = chunk_id("src/app.py", 10, 20, ChunkKind::Method);
        assert_ne!(a, c);
    }

    #[test]
    fn test_content_hash_is_pure() {
        let text = "def add(a, b):\n    return a + b\n";
        assert_eq!(content_hash(text), content_hash(text));
        assert_ne!(content_hash(text), content_hash("def sub(a, b): ..."));
        assert_eq!(content_hash(text).len(), 32);
    }

    #[test]
    fn test_chunk_creation() {
        let chunk = CodeChunk::new(
            "src/app.py".to_string(),
            "def add(a, b):\n    return a + b".to_string(),
            10,
            11,
            ChunkKind::Function,
            Language::Python,
        )
        .with_name("add");

        assert_eq!(chunk.file_path(), "src/app.py");
        assert_eq!(chunk.name(), Some("add"));
        assert_eq!(chunk.line_count(), 2);
        assert!(chunk.is_callable());
        assert!(!chunk.is_root());
        assert_eq!(chunk.content_hash(), content_hash(chunk.content()));
    }

    #[test]
    fn test_equal_content_shares_hash() {
        let body = "def run():\n    pass";
        let a = CodeChunk::new(
            "a.py".to_string(),
            body.to_string(),
            1,
            2,
            ChunkKind::Function,
            Language::Python,
        );
        let b = CodeChunk::new(
            "b.py".to_string(),
            body.to_string(),
            5,
            6,
            ChunkKind::Function,
            Language::Python,
        );

        assert_ne!(a.id(), b.id());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_location_format() {
        let chunk = CodeChunk::new(
            "lib/main.dart".to_string(),
            "void main() {}".to_string(),
            3,
            7,
            ChunkKind::Function,
            Language::Dart,
        );

        assert_eq!(chunk.location(), "lib/main.dart:3-7");
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ChunkKind::File,
            ChunkKind::Class,
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::Block,
            ChunkKind::Section,
            ChunkKind::Paragraph,
        ] {
            assert_eq!(ChunkKind::parse(kind.as_str()), kind);
        }
    }
}
