use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Dart,
    Php,
    Ruby,
    Html,
    Markdown,
    PlainText,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "dart" => Language::Dart,
            "php" => Language::Php,
            "rb" | "rake" => Language::Ruby,
            "html" | "htm" => Language::Html,
            "md" | "markdown" => Language::Markdown,
            "txt" | "text" | "rst" => Language::PlainText,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "python" => Language::Python,
            "javascript" => Language::JavaScript,
            "typescript" => Language::TypeScript,
            "dart" => Language::Dart,
            "php" => Language::Php,
            "ruby" => Language::Ruby,
            "html" => Language::Html,
            "markdown" => Language::Markdown,
            "plaintext" | "text" => Language::PlainText,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Dart => "dart",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Html => "html",
            Language::Markdown => "markdown",
            Language::PlainText => "plaintext",
            Language::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Language::Unknown)
    }

    /// Text-mode languages are chunked by section/paragraph instead of
    /// declarations, and always receive a file-level root chunk.
    pub fn is_text_kind(&self) -> bool {
        matches!(
            self,
            Language::Html | Language::Markdown | Language::PlainText
        )
    }

    /// Languages parsed by the structural (tree-sitter) strategy.
    pub fn has_structural_parser(&self) -> bool {
        matches!(
            self,
            Language::Python | Language::JavaScript | Language::TypeScript | Language::Php
        )
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py", "pyi"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::Dart => &["dart"],
            Language::Php => &["php"],
            Language::Ruby => &["rb", "rake"],
            Language::Html => &["html", "htm"],
            Language::Markdown => &["md", "markdown"],
            Language::PlainText => &["txt", "text", "rst"],
            Language::Unknown => &[],
        }
    }

    pub fn all_supported() -> Vec<Language> {
        vec![
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Dart,
            Language::Php,
            Language::Ruby,
            Language::Html,
            Language::Markdown,
            Language::PlainText,
        ]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("py"), Language::Python);
        assert_eq!(Language::from_extension("js"), Language::JavaScript);
        assert_eq!(Language::from_extension("tsx"), Language::TypeScript);
        assert_eq!(Language::from_extension("dart"), Language::Dart);
        assert_eq!(Language::from_extension("php"), Language::Php);
        assert_eq!(Language::from_extension("rb"), Language::Ruby);
        assert_eq!(Language::from_extension("md"), Language::Markdown);
        assert_eq!(Language::from_extension("exe"), Language::Unknown);
    }

    #[test]
    fn test_language_from_path() {
        assert_eq!(
            Language::from_path(Path::new("lib/app.dart")),
            Language::Dart
        );
        assert_eq!(
            Language::from_path(Path::new("docs/README.md")),
            Language::Markdown
        );
        assert_eq!(Language::from_path(Path::new("Makefile")), Language::Unknown);
    }

    #[test]
    fn test_text_kinds() {
        assert!(Language::Markdown.is_text_kind());
        assert!(Language::PlainText.is_text_kind());
        assert!(!Language::Python.is_text_kind());
    }

    #[test]
    fn test_structural_coverage() {
        assert!(Language::Python.has_structural_parser());
        assert!(Language::TypeScript.has_structural_parser());
        assert!(!Language::Dart.has_structural_parser());
        assert!(!Language::Markdown.has_structural_parser());
    }

    #[test]
    fn test_parse_roundtrip() {
        for language in Language::all_supported() {
            assert_eq!(Language::parse(language.as_str()), language);
        }
    }
}
