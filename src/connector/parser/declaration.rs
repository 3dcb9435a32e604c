use regex::Regex;
use tracing::debug;

use crate::domain::{ChunkKind, CodeChunk, Language, SymbolRef, SymbolRefKind};

use super::{extract_leading_comment, truncate_to_size};
use super::quality;

/// Regex-based top-level declaration chunker.
///
/// Primary strategy for Dart and Ruby, and the fallback when a structural
/// parser rejects its input. Declarations own a "territory" running from
/// their line to the next declaration at the same or shallower indentation.
pub struct DeclarationParser {
    rules: Vec<LanguageRules>,
}

struct LanguageRules {
    language: Language,
    class_pattern: Regex,
    function_pattern: Regex,
    import_pattern: Regex,
}

impl DeclarationParser {
    pub fn new() -> Self {
        let rules = vec![
            LanguageRules {
                language: Language::Dart,
                class_pattern: Regex::new(
                    r"^\s*(?:abstract\s+)?(?:class|mixin|enum|extension)\s+([A-Za-z_$]\w*)",
                )
                .expect("valid dart class pattern"),
                function_pattern: Regex::new(
                    r"^\s*(?:static\s+)?(?:Future<[^>]+>\s+|Stream<[^>]+>\s+|void\s+|int\s+|double\s+|String\s+|bool\s+|num\s+|dynamic\s+|[A-Z]\w*(?:<[^>]+>)?\s+)([a-z_]\w*)\s*\(",
                )
                .expect("valid dart function pattern"),
                import_pattern: Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]"#)
                    .expect("valid dart import pattern"),
            },
            LanguageRules {
                language: Language::Ruby,
                class_pattern: Regex::new(r"^\s*(?:class|module)\s+([A-Z]\w*)")
                    .expect("valid ruby class pattern"),
                function_pattern: Regex::new(r"^\s*def\s+(?:self\.)?([a-z_]\w*[?!=]?)")
                    .expect("valid ruby function pattern"),
                import_pattern: Regex::new(r#"^\s*require(?:_relative)?\s+['"]([^'"]+)['"]"#)
                    .expect("valid ruby import pattern"),
            },
            LanguageRules {
                language: Language::Python,
                class_pattern: Regex::new(r"^\s*class\s+([A-Za-z_]\w*)")
                    .expect("valid python class pattern"),
                function_pattern: Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)")
                    .expect("valid python function pattern"),
                import_pattern: Regex::new(r"^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))")
                    .expect("valid python import pattern"),
            },
            LanguageRules {
                language: Language::JavaScript,
                class_pattern: Regex::new(r"^\s*(?:export\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)")
                    .expect("valid js class pattern"),
                function_pattern: Regex::new(
                    r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)",
                )
                .expect("valid js function pattern"),
                import_pattern: Regex::new(r#"^\s*import\b.*?from\s+['"]([^'"]+)['"]"#)
                    .expect("valid js import pattern"),
            },
            LanguageRules {
                language: Language::Php,
                class_pattern: Regex::new(r"^\s*(?:abstract\s+|final\s+)?class\s+(\w+)")
                    .expect("valid php class pattern"),
                function_pattern: Regex::new(
                    r"^\s*(?:public\s+|private\s+|protected\s+|static\s+)*function\s+(\w+)",
                )
                .expect("valid php function pattern"),
                import_pattern: Regex::new(r"^\s*use\s+([\w\\]+)")
                    .expect("valid php use pattern"),
            },
        ];

        Self { rules }
    }

    fn rules_for(&self, language: Language) -> Option<&LanguageRules> {
        // TypeScript shares the JavaScript surface grammar at this level.
        let effective = if language == Language::TypeScript {
            Language::JavaScript
        } else {
            language
        };
        self.rules.iter().find(|r| r.language == effective)
    }

    pub fn supports(&self, language: Language) -> bool {
        self.rules_for(language).is_some()
    }

    pub fn parse(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
        max_chunk_size: usize,
    ) -> (Vec<CodeChunk>, Vec<SymbolRef>) {
        let rules = match self.rules_for(language) {
            Some(r) => r,
            None => return (Vec::new(), Vec::new()),
        };

        let lines: Vec<&str> = content.lines().collect();
        let mut declarations: Vec<Decl> = Vec::new();
        let mut references: Vec<SymbolRef> = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx as u32 + 1;
            if let Some(captures) = rules.class_pattern.captures(line) {
                if let Some(name) = captures.get(1) {
                    declarations.push(Decl {
                        line_idx: idx,
                        indent: indent_of(line),
                        name: name.as_str().to_string(),
                        is_class: true,
                    });
                    continue;
                }
            }
            if let Some(captures) = rules.function_pattern.captures(line) {
                if let Some(name) = captures.get(1) {
                    declarations.push(Decl {
                        line_idx: idx,
                        indent: indent_of(line),
                        name: name.as_str().to_string(),
                        is_class: false,
                    });
                    continue;
                }
            }
            if let Some(captures) = rules.import_pattern.captures(line) {
                let name = captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str().to_string());
                if let Some(name) = name {
                    references.push(SymbolRef::new(name, line_no, SymbolRefKind::Import));
                }
            }
        }

        let chunks = self.materialise(&lines, file_path, language, &declarations, max_chunk_size);
        debug!(
            "Declaration-chunked {}: {} chunks, {} imports",
            file_path,
            chunks.len(),
            references.len()
        );

        (chunks, references)
    }

    fn materialise(
        &self,
        lines: &[&str],
        file_path: &str,
        language: Language,
        declarations: &[Decl],
        max_chunk_size: usize,
    ) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();

        // Territory: up to the next declaration at the same or shallower
        // indentation.
        let ends: Vec<usize> = declarations
            .iter()
            .enumerate()
            .map(|(i, decl)| {
                declarations[i + 1..]
                    .iter()
                    .find(|next| next.indent <= decl.indent)
                    .map(|next| next.line_idx)
                    .unwrap_or(lines.len())
            })
            .collect();

        // Parent: nearest earlier declaration with shallower indentation
        // whose territory still covers this line.
        let parents: Vec<Option<usize>> = declarations
            .iter()
            .enumerate()
            .map(|(i, decl)| {
                (0..i)
                    .rev()
                    .find(|&j| declarations[j].indent < decl.indent && ends[j] > decl.line_idx)
            })
            .collect();

        for (i, decl) in declarations.iter().enumerate() {
            let start_line = decl.line_idx as u32 + 1;
            let mut end_idx = ends[i];
            while end_idx > decl.line_idx + 1 && lines[end_idx - 1].trim().is_empty() {
                end_idx -= 1;
            }
            let end_line = end_idx as u32;

            let body = lines[decl.line_idx..end_idx].join("\n");
            let body = truncate_to_size(&body, max_chunk_size).to_string();

            let kind = if decl.is_class {
                ChunkKind::Class
            } else if parents[i]
                .map(|p| declarations[p].is_class)
                .unwrap_or(false)
            {
                ChunkKind::Method
            } else {
                ChunkKind::Function
            };

            let mut chunk = CodeChunk::new(
                file_path.to_string(),
                body.clone(),
                start_line,
                end_line,
                kind,
                language,
            )
            .with_name(decl.name.clone());

            if seen_ids.contains(chunk.id()) {
                continue;
            }
            seen_ids.insert(chunk.id().to_string());

            if let Some(parent_index) = parents[i] {
                let parent = &declarations[parent_index];
                let parent_kind = if parent.is_class {
                    ChunkKind::Class
                } else if parents[parent_index]
                    .map(|p| declarations[p].is_class)
                    .unwrap_or(false)
                {
                    ChunkKind::Method
                } else {
                    ChunkKind::Function
                };
                let mut parent_end = ends[parent_index];
                while parent_end > parent.line_idx + 1 && lines[parent_end - 1].trim().is_empty() {
                    parent_end -= 1;
                }
                chunk = chunk.with_parent_id(crate::domain::chunk_id(
                    file_path,
                    parent.line_idx as u32 + 1,
                    parent_end as u32,
                    parent_kind,
                ));
            }

            if let Some(comment) = extract_leading_comment(lines, start_line, language) {
                chunk = chunk.with_leading_comment(comment);
            }

            let parameter_count = if decl.is_class {
                0
            } else {
                quality::count_parameters(lines[decl.line_idx])
            };
            let method_count = declarations
                .iter()
                .enumerate()
                .filter(|(j, _)| parents[*j] == Some(i))
                .count() as u32;

            let metrics = quality::analyze(&body, language, kind, parameter_count, method_count);
            chunks.push(chunk.with_quality(metrics));
        }

        chunks
    }
}

impl Default for DeclarationParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Decl {
    line_idx: usize,
    indent: usize,
    name: String,
    is_class: bool,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str, path: &str, language: Language) -> (Vec<CodeChunk>, Vec<SymbolRef>) {
        DeclarationParser::new().parse(content, path, language, 64 * 1024)
    }

    #[test]
    fn test_ruby_classes_and_methods() {
        let code = r#"
require 'json'

class Parser
  def parse(input)
    JSON.parse(input)
  end

  def valid?(input)
    !input.nil?
  end
end

def standalone
  42
end
"#;
        let (chunks, references) = parse(code, "parser.rb", Language::Ruby);

        let class_chunk = chunks.iter().find(|c| c.kind() == ChunkKind::Class).unwrap();
        assert_eq!(class_chunk.name(), Some("Parser"));

        let methods: Vec<_> = chunks
            .iter()
            .filter(|c| c.kind() == ChunkKind::Method)
            .collect();
        assert_eq!(methods.len(), 2);
        for method in &methods {
            assert_eq!(method.parent_id(), Some(class_chunk.id()));
        }

        assert!(chunks
            .iter()
            .any(|c| c.kind() == ChunkKind::Function && c.name() == Some("standalone")));
        assert!(references
            .iter()
            .any(|r| r.kind() == SymbolRefKind::Import && r.name() == "json"));
    }

    #[test]
    fn test_dart_class_and_function() {
        let code = r#"
import 'dart:async';

class Counter {
  int value = 0;

  void increment() {
    value += 1;
  }
}

Future<int> fetchCount() async {
  return 1;
}
"#;
        let (chunks, references) = parse(code, "counter.dart", Language::Dart);

        assert!(chunks
            .iter()
            .any(|c| c.kind() == ChunkKind::Class && c.name() == Some("Counter")));
        assert!(chunks
            .iter()
            .any(|c| c.kind() == ChunkKind::Method && c.name() == Some("increment")));
        assert!(chunks
            .iter()
            .any(|c| c.kind() == ChunkKind::Function && c.name() == Some("fetchCount")));
        assert!(references
            .iter()
            .any(|r| r.name() == "dart:async"));
    }

    #[test]
    fn test_python_fallback_patterns() {
        let code = "import os\n\nclass Thing:\n    def act(self):\n        pass\n\ndef free():\n    pass\n";
        let (chunks, references) = parse(code, "thing.py", Language::Python);

        assert!(chunks.iter().any(|c| c.kind() == ChunkKind::Class));
        assert!(chunks.iter().any(|c| c.kind() == ChunkKind::Method));
        assert!(chunks.iter().any(|c| c.kind() == ChunkKind::Function));
        assert!(references.iter().any(|r| r.name() == "os"));
    }

    #[test]
    fn test_territory_ends_at_sibling() {
        let code = "def first\n  1\nend\n\ndef second\n  2\nend\n";
        let (chunks, _) = parse(code, "two.rb", Language::Ruby);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content().contains("1"));
        assert!(!chunks[0].content().contains("2"));
    }

    #[test]
    fn test_unsupported_language_yields_nothing() {
        let (chunks, references) = parse("# heading\n", "doc.md", Language::Markdown);
        assert!(chunks.is_empty());
        assert!(references.is_empty());
    }
}
