use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Parser, Query, QueryCursor};

use crate::domain::{
    ChunkKind, CodeChunk, IndexError, Language, SymbolRef, SymbolRefKind,
};

use super::{
    extract_docstring, extract_leading_comment, normalize_import_path, truncate_to_size,
};
use super::quality;

/// Raw output of the structural strategy, before the registry applies the
/// root-chunk policy.
#[derive(Debug, Default)]
pub struct StructuralOutput {
    pub chunks: Vec<CodeChunk>,
    pub references: Vec<SymbolRef>,
    /// Set when the file has syntax errors; the registry emits a single raw
    /// root chunk instead of the partial parse.
    pub invalid: bool,
}

/// Tree-sitter parser covering the structurally-chunked languages.
///
/// Re-entrant: a fresh `Parser` is created per call, no state is retained.
pub struct StructuralParser;

impl StructuralParser {
    pub fn new() -> Self {
        Self
    }

    pub fn supports(language: Language) -> bool {
        language.has_structural_parser()
    }

    fn get_ts_language(language: Language) -> Option<tree_sitter::Language> {
        match language {
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            _ => None,
        }
    }

    fn chunk_query_patterns(language: Language) -> &'static str {
        match language {
            Language::Python => {
                r#"
                (function_definition name: (identifier) @name) @function
                (class_definition name: (identifier) @name) @class
                "#
            }
            Language::JavaScript => {
                r#"
                (function_declaration name: (identifier) @name) @function
                (class_declaration name: (identifier) @name) @class
                (method_definition name: (property_identifier) @name) @method
                "#
            }
            Language::TypeScript => {
                r#"
                (function_declaration name: (identifier) @name) @function
                (class_declaration name: (type_identifier) @name) @class
                (method_definition name: (property_identifier) @name) @method
                "#
            }
            Language::Php => {
                r#"
                (function_definition name: (name) @name) @function
                (method_declaration name: (name) @name) @method
                (class_declaration name: (name) @name) @class
                "#
            }
            _ => "",
        }
    }

    fn reference_query_patterns(language: Language) -> &'static str {
        match language {
            Language::Python => {
                r#"
                (call
                    function: (identifier) @callee) @call

                (call
                    function: (attribute
                        attribute: (identifier) @callee)) @call

                (import_statement
                    name: (dotted_name
                        (identifier) @callee)) @import
                (import_from_statement
                    module_name: (dotted_name
                        (identifier) @callee)) @import
                "#
            }
            Language::JavaScript => {
                r#"
                (call_expression
                    function: (identifier) @callee) @call

                (call_expression
                    function: (member_expression
                        property: (property_identifier) @callee)) @call

                (new_expression
                    constructor: (identifier) @callee) @call

                (import_statement
                    source: (string (string_fragment) @callee)) @import
                "#
            }
            Language::TypeScript => {
                r#"
                (call_expression
                    function: (identifier) @callee) @call

                (call_expression
                    function: (member_expression
                        property: (property_identifier) @callee)) @call

                (new_expression
                    constructor: (identifier) @callee) @call

                (import_statement
                    source: (string (string_fragment) @callee)) @import
                "#
            }
            Language::Php => {
                r#"
                (function_call_expression
                    function: (name) @callee) @call

                (member_call_expression
                    name: (name) @callee) @call

                (scoped_call_expression
                    name: (name) @callee) @call

                (object_creation_expression
                    (name) @callee) @call

                (namespace_use_clause
                    (qualified_name) @callee) @import
                "#
            }
            _ => "",
        }
    }

    /// Names skipped during reference extraction: keywords and builtins that
    /// would only produce noise edges.
    fn is_noise_name(name: &str) -> bool {
        name.len() < 2
            || matches!(
                name,
                "if" | "else"
                    | "for"
                    | "while"
                    | "return"
                    | "true"
                    | "false"
                    | "null"
                    | "None"
                    | "self"
                    | "this"
                    | "super"
                    | "print"
                    | "len"
                    | "str"
                    | "int"
                    | "echo"
                    | "require"
                    | "console"
                    | "log"
            )
    }

    pub fn parse(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
        max_chunk_size: usize,
    ) -> Result<StructuralOutput, IndexError> {
        let ts_language = Self::get_ts_language(language)
            .ok_or_else(|| IndexError::parse(format!("no structural grammar for {}", language)))?;

        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| IndexError::parse(format!("failed to set language: {}", e)))?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| IndexError::parse("tree-sitter returned no tree"))?;

        if tree.root_node().has_error() {
            return Ok(StructuralOutput {
                invalid: true,
                ..Default::default()
            });
        }

        let declarations = self.collect_declarations(content, &tree, language, &ts_language)?;
        let chunks = build_chunks(content, file_path, language, declarations, max_chunk_size);
        let references = self.collect_references(content, &tree, language, &ts_language)?;

        debug!(
            "Structurally parsed {}: {} chunks, {} references",
            file_path,
            chunks.len(),
            references.len()
        );

        Ok(StructuralOutput {
            chunks,
            references,
            invalid: false,
        })
    }

    fn collect_declarations(
        &self,
        content: &str,
        tree: &tree_sitter::Tree,
        language: Language,
        ts_language: &tree_sitter::Language,
    ) -> Result<Vec<Declaration>, IndexError> {
        let query_source = Self::chunk_query_patterns(language);
        let query = Query::new(ts_language, query_source)
            .map_err(|e| IndexError::parse(format!("failed to create chunk query: {}", e)))?;

        let mut cursor = QueryCursor::new();
        let text_bytes = content.as_bytes();
        let capture_names: Vec<&str> = query.capture_names().to_vec();

        let mut declarations = Vec::new();
        let mut matches_iter = cursor.matches(&query, tree.root_node(), text_bytes);

        while let Some(query_match) = matches_iter.next() {
            let mut name: Option<String> = None;
            let mut main_node = None;
            let mut kind = ChunkKind::Block;

            for capture in query_match.captures {
                let capture_name = capture_names
                    .get(capture.index as usize)
                    .copied()
                    .unwrap_or("");

                if capture_name == "name" {
                    name = Some(content[capture.node.byte_range()].to_string());
                } else {
                    main_node = Some(capture.node);
                    kind = match capture_name {
                        "class" => ChunkKind::Class,
                        "method" => ChunkKind::Method,
                        _ => ChunkKind::Function,
                    };
                }
            }

            if let (Some(node), Some(name)) = (main_node, name) {
                declarations.push(Declaration {
                    name,
                    kind,
                    start_line: node.start_position().row as u32 + 1,
                    end_line: node.end_position().row as u32 + 1,
                    start_byte: node.byte_range().start,
                    end_byte: node.byte_range().end,
                });
            }
        }

        declarations.sort_by_key(|d| (d.start_line, d.end_line));
        Ok(declarations)
    }

    fn collect_references(
        &self,
        content: &str,
        tree: &tree_sitter::Tree,
        language: Language,
        ts_language: &tree_sitter::Language,
    ) -> Result<Vec<SymbolRef>, IndexError> {
        let query_source = Self::reference_query_patterns(language);
        if query_source.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::new(ts_language, query_source)
            .map_err(|e| IndexError::parse(format!("failed to create reference query: {}", e)))?;

        let mut cursor = QueryCursor::new();
        let text_bytes = content.as_bytes();
        let capture_names: Vec<&str> = query.capture_names().to_vec();

        let mut references = Vec::new();
        let mut matches_iter = cursor.matches(&query, tree.root_node(), text_bytes);

        while let Some(query_match) = matches_iter.next() {
            let mut callee: Option<(String, u32)> = None;
            let mut kind = SymbolRefKind::Call;

            for capture in query_match.captures {
                let capture_name = capture_names
                    .get(capture.index as usize)
                    .copied()
                    .unwrap_or("");

                match capture_name {
                    "callee" => {
                        let name = content[capture.node.byte_range()].to_string();
                        let line = capture.node.start_position().row as u32 + 1;
                        callee = Some((name, line));
                    }
                    "import" => kind = SymbolRefKind::Import,
                    _ => {}
                }
            }

            if let Some((mut name, line)) = callee {
                if kind == SymbolRefKind::Import {
                    name = normalize_import_path(&name);
                } else if Self::is_noise_name(&name) {
                    continue;
                }
                if name.is_empty() {
                    continue;
                }
                references.push(SymbolRef::new(name, line, kind));
            }
        }

        Ok(references)
    }
}

impl Default for StructuralParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Declaration {
    name: String,
    kind: ChunkKind,
    start_line: u32,
    end_line: u32,
    start_byte: usize,
    end_byte: usize,
}

impl Declaration {
    fn encloses(&self, other: &Declaration) -> bool {
        self.start_byte < other.start_byte && self.end_byte >= other.end_byte
    }

    fn span(&self) -> usize {
        self.end_byte - self.start_byte
    }
}

/// Materialise chunks from raw declarations: resolve parents, reclassify
/// functions nested directly in classes as methods, render class skeletons.
fn build_chunks(
    content: &str,
    file_path: &str,
    language: Language,
    declarations: Vec<Declaration>,
    max_chunk_size: usize,
) -> Vec<CodeChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks: Vec<CodeChunk> = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();

    // Tightest enclosing declaration index for each declaration.
    let parents: Vec<Option<usize>> = declarations
        .iter()
        .map(|decl| {
            declarations
                .iter()
                .enumerate()
                .filter(|(_, candidate)| candidate.encloses(decl))
                .min_by_key(|(_, candidate)| candidate.span())
                .map(|(i, _)| i)
        })
        .collect();

    // Materialised kinds: functions nested directly in a class are methods.
    let kinds: Vec<ChunkKind> = declarations
        .iter()
        .enumerate()
        .map(|(i, decl)| {
            let enclosed_in_class = parents[i]
                .map(|p| declarations[p].kind == ChunkKind::Class)
                .unwrap_or(false);
            match decl.kind {
                ChunkKind::Function if enclosed_in_class => ChunkKind::Method,
                other => other,
            }
        })
        .collect();

    for (i, decl) in declarations.iter().enumerate() {
        let kind = kinds[i];

        let body = &content[decl.start_byte..decl.end_byte];
        let chunk_content = if kind == ChunkKind::Class {
            let methods: Vec<&Declaration> = declarations
                .iter()
                .enumerate()
                .filter(|(j, d)| parents[*j] == Some(i) && d.kind != ChunkKind::Class)
                .map(|(_, d)| d)
                .collect();
            class_skeleton(&lines, decl, &methods, language)
        } else {
            truncate_to_size(body, max_chunk_size).to_string()
        };

        let mut chunk = CodeChunk::new(
            file_path.to_string(),
            chunk_content,
            decl.start_line,
            decl.end_line,
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
            chunk = chunk.with_parent_id(crate::domain::chunk_id(
                file_path,
                parent.start_line,
                parent.end_line,
                kinds[parent_index],
            ));
        }

        if let Some(docstring) = extract_docstring(body, language) {
            chunk = chunk.with_docstring(docstring);
        }
        if let Some(comment) = extract_leading_comment(&lines, decl.start_line, language) {
            chunk = chunk.with_leading_comment(comment);
        }

        let signature = body.lines().next().unwrap_or("");
        let parameter_count = if kind == ChunkKind::Class {
            0
        } else {
            quality::count_parameters(signature)
        };
        let method_count = declarations
            .iter()
            .enumerate()
            .filter(|(j, _)| parents[*j] == Some(i))
            .count() as u32;

        let metrics = quality::analyze(body, language, kind, parameter_count, method_count);
        chunks.push(chunk.with_quality(metrics));
    }

    chunks
}

/// Class signature + docstring + member signatures, distinct from the full
/// body that methods carry individually.
fn class_skeleton(
    lines: &[&str],
    class: &Declaration,
    methods: &[&Declaration],
    language: Language,
) -> String {
    let mut skeleton = String::new();

    if let Some(first) = lines.get(class.start_line as usize - 1) {
        skeleton.push_str(first);
        skeleton.push('\n');
    }

    if language == Language::Python {
        if let Some(line) = lines.get(class.start_line as usize) {
            let trimmed = line.trim_start();
            if trimmed.starts_with("\"\"\"") || trimmed.starts_with("'''") {
                skeleton.push_str(line);
                skeleton.push('\n');
            }
        }
    }

    for method in methods {
        if let Some(signature) = lines.get(method.start_line as usize - 1) {
            skeleton.push_str(signature.trim_end());
            skeleton.push('\n');
        }
    }

    skeleton
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str, path: &str, language: Language) -> StructuralOutput {
        StructuralParser::new()
            .parse(content, path, language, 64 * 1024)
            .unwrap()
    }

    #[test]
    fn test_python_functions_and_classes() {
        let code = r#"
def top_level(a, b):
    return a + b

class Greeter:
    def greet(self, name):
        return f"hi {name}"

    def wave(self):
        pass
"#;
        let output = parse(code, "app.py", Language::Python);
        assert!(!output.invalid);

        let functions: Vec<_> = output
            .chunks
            .iter()
            .filter(|c| c.kind() == ChunkKind::Function)
            .collect();
        let methods: Vec<_> = output
            .chunks
            .iter()
            .filter(|c| c.kind() == ChunkKind::Method)
            .collect();
        let classes: Vec<_> = output
            .chunks
            .iter()
            .filter(|c| c.kind() == ChunkKind::Class)
            .collect();

        assert_eq!(functions.len(), 1);
        assert_eq!(methods.len(), 2);
        assert_eq!(classes.len(), 1);

        let class_id = classes[0].id();
        for method in &methods {
            assert_eq!(method.parent_id(), Some(class_id));
        }
    }

    #[test]
    fn test_class_skeleton_contains_signatures_not_bodies() {
        let code = r#"
class Calculator:
    """Does arithmetic."""

    def add(self, a, b):
        total = a + b
        return total
"#;
        let output = parse(code, "calc.py", Language::Python);
        let class_chunk = output
            .chunks
            .iter()
            .find(|c| c.kind() == ChunkKind::Class)
            .unwrap();

        assert!(class_chunk.content().contains("class Calculator"));
        assert!(class_chunk.content().contains("def add(self, a, b):"));
        assert!(!class_chunk.content().contains("total = a + b"));
    }

    #[test]
    fn test_python_docstring_extracted() {
        let code = "def run():\n    \"\"\"Runs the job.\"\"\"\n    return 1\n";
        let output = parse(code, "job.py", Language::Python);
        let function = output
            .chunks
            .iter()
            .find(|c| c.name() == Some("run"))
            .unwrap();

        assert_eq!(function.docstring(), Some("Runs the job."));
    }

    #[test]
    fn test_javascript_methods() {
        let code = r#"
class Store {
  get(key) {
    return this.map[key];
  }
}

function helper(x) {
  return x * 2;
}
"#;
        let output = parse(code, "store.js", Language::JavaScript);

        assert!(output
            .chunks
            .iter()
            .any(|c| c.kind() == ChunkKind::Method && c.name() == Some("get")));
        assert!(output
            .chunks
            .iter()
            .any(|c| c.kind() == ChunkKind::Function && c.name() == Some("helper")));
    }

    #[test]
    fn test_invalid_syntax_flagged() {
        let output = parse("def broken(:\n  nope", "broken.py", Language::Python);
        assert!(output.invalid);
        assert!(output.chunks.is_empty());
    }

    #[test]
    fn test_python_call_references() {
        let code = "import helpers\n\ndef caller():\n    helpers.compute()\n    validate(1)\n";
        let output = parse(code, "app.py", Language::Python);

        let calls: Vec<&str> = output
            .references
            .iter()
            .filter(|r| r.kind() == SymbolRefKind::Call)
            .map(|r| r.name())
            .collect();
        let imports: Vec<&str> = output
            .references
            .iter()
            .filter(|r| r.kind() == SymbolRefKind::Import)
            .map(|r| r.name())
            .collect();

        assert!(calls.contains(&"compute"));
        assert!(calls.contains(&"validate"));
        assert!(imports.contains(&"helpers"));
    }

    #[test]
    fn test_typescript_import_source() {
        let code = "import { fetchUser } from './api';\n\nexport function load(): void {\n  fetchUser();\n}\n";
        let output = parse(code, "load.ts", Language::TypeScript);

        assert!(output
            .references
            .iter()
            .any(|r| r.kind() == SymbolRefKind::Import && r.name() == "./api"));
    }
}
