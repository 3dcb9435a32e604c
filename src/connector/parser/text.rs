use regex::Regex;

use crate::domain::{ChunkKind, CodeChunk, Grade, Language, QualityMetrics};

/// Sections shorter than this are merged into their neighbour to avoid
/// noise chunks.
const MIN_SECTION_CHARS: usize = 80;

/// Heading-section chunker for Markdown/HTML plus a paragraph-window
/// chunker for plain text.
pub struct TextParser {
    html_heading: Regex,
}

impl TextParser {
    pub fn new() -> Self {
        Self {
            html_heading: Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>")
                .expect("valid html heading pattern"),
        }
    }

    pub fn parse(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Vec<CodeChunk> {
        match language {
            Language::Markdown => self.parse_markdown(content, file_path),
            Language::Html => self.parse_html(content, file_path),
            _ => self.parse_plaintext(content, file_path, chunk_size, chunk_overlap),
        }
    }

    /// One chunk per heading section; undersized sections merge into the
    /// preceding one.
    fn parse_markdown(&self, content: &str, file_path: &str) -> Vec<CodeChunk> {
        let lines: Vec<&str> = content.lines().collect();

        let mut boundaries: Vec<(usize, String)> = Vec::new();
        let mut in_fence = false;
        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix('#') {
                let level_extra = rest.chars().take_while(|&c| c == '#').count();
                if level_extra < 6 {
                    let title = rest[level_extra..].trim().to_string();
                    boundaries.push((idx, title));
                }
            }
        }

        let sections = sections_from_boundaries(&lines, &boundaries);
        merge_and_build(sections, &lines, file_path, Language::Markdown)
    }

    fn parse_html(&self, content: &str, file_path: &str) -> Vec<CodeChunk> {
        let lines: Vec<&str> = content.lines().collect();

        let mut boundaries: Vec<(usize, String)> = Vec::new();
        for captures in self.html_heading.captures_iter(content) {
            let whole = captures.get(0).expect("match has group 0");
            let title = captures
                .get(2)
                .map(|m| strip_tags(m.as_str()))
                .unwrap_or_default();
            let line_idx = content[..whole.start()].matches('\n').count();
            boundaries.push((line_idx, title));
        }

        let sections = sections_from_boundaries(&lines, &boundaries);
        merge_and_build(sections, &lines, file_path, Language::Html)
    }

    /// Paragraph windows bounded by `chunk_size` characters with a bounded
    /// overlap carried between consecutive windows.
    fn parse_plaintext(
        &self,
        content: &str,
        file_path: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Vec<CodeChunk> {
        let lines: Vec<&str> = content.lines().collect();

        // Paragraph spans as (start_idx, end_idx_exclusive).
        let mut paragraphs: Vec<(usize, usize)> = Vec::new();
        let mut start: Option<usize> = None;
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                if let Some(s) = start.take() {
                    paragraphs.push((s, idx));
                }
            } else if start.is_none() {
                start = Some(idx);
            }
        }
        if let Some(s) = start {
            paragraphs.push((s, lines.len()));
        }

        let mut chunks = Vec::new();
        let mut window: Vec<(usize, usize)> = Vec::new();
        let mut window_chars = 0usize;

        let flush =
            |window: &[(usize, usize)], chunks: &mut Vec<CodeChunk>| {
                if window.is_empty() {
                    return;
                }
                let first = window[0].0;
                let last = window[window.len() - 1].1;
                let body = lines[first..last].join("\n");
                chunks.push(text_chunk(
                    file_path,
                    body,
                    first as u32 + 1,
                    last as u32,
                    ChunkKind::Paragraph,
                    Language::PlainText,
                    None,
                ));
            };

        for paragraph in paragraphs {
            let chars: usize = lines[paragraph.0..paragraph.1]
                .iter()
                .map(|l| l.len() + 1)
                .sum();

            if window_chars + chars > chunk_size && !window.is_empty() {
                flush(&window, &mut chunks);
                // Carry the tail paragraph into the next window when it fits
                // the overlap budget.
                let carry: Vec<(usize, usize)> = window
                    .last()
                    .filter(|(s, e)| {
                        chunk_overlap > 0
                            && lines[*s..*e].iter().map(|l| l.len() + 1).sum::<usize>()
                                <= chunk_overlap
                    })
                    .copied()
                    .into_iter()
                    .collect();
                window = carry;
                window_chars = window
                    .iter()
                    .map(|(s, e)| lines[*s..*e].iter().map(|l| l.len() + 1).sum::<usize>())
                    .sum();
            }

            window.push(paragraph);
            window_chars += chars;
        }
        flush(&window, &mut chunks);

        chunks
    }
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Section {
    start_idx: usize,
    end_idx: usize,
    title: Option<String>,
}

fn sections_from_boundaries(lines: &[&str], boundaries: &[(usize, String)]) -> Vec<Section> {
    let mut sections = Vec::new();

    if lines.is_empty() {
        return sections;
    }

    // Preamble before the first heading.
    let first_boundary = boundaries.first().map(|(i, _)| *i).unwrap_or(lines.len());
    if first_boundary > 0 {
        sections.push(Section {
            start_idx: 0,
            end_idx: first_boundary,
            title: None,
        });
    }

    for (i, (start_idx, title)) in boundaries.iter().enumerate() {
        let end_idx = boundaries
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(lines.len());
        sections.push(Section {
            start_idx: *start_idx,
            end_idx,
            title: Some(title.clone()),
        });
    }

    sections
}

fn merge_and_build(
    sections: Vec<Section>,
    lines: &[&str],
    file_path: &str,
    language: Language,
) -> Vec<CodeChunk> {
    let char_count = |section: &Section| -> usize {
        lines[section.start_idx..section.end_idx]
            .iter()
            .map(|l| l.len() + 1)
            .sum()
    };

    // Merge undersized sections into their predecessor.
    let mut merged: Vec<Section> = Vec::new();
    for section in sections {
        if char_count(&section) < MIN_SECTION_CHARS {
            if let Some(previous) = merged.last_mut() {
                previous.end_idx = section.end_idx;
                continue;
            }
        }
        merged.push(section);
    }

    // A leading stub (preamble or tiny first section) is absorbed by the
    // section that follows it.
    if merged.len() >= 2 && char_count(&merged[0]) < MIN_SECTION_CHARS {
        let stub = merged.remove(0);
        merged[0].start_idx = stub.start_idx;
    }

    merged
        .into_iter()
        .filter(|s| s.end_idx > s.start_idx)
        .map(|section| {
            let body = lines[section.start_idx..section.end_idx].join("\n");
            text_chunk(
                file_path,
                body,
                section.start_idx as u32 + 1,
                section.end_idx as u32,
                ChunkKind::Section,
                language,
                section.title,
            )
        })
        .collect()
}

fn text_chunk(
    file_path: &str,
    body: String,
    start_line: u32,
    end_line: u32,
    kind: ChunkKind,
    language: Language,
    title: Option<String>,
) -> CodeChunk {
    let lines_of_code = body.lines().filter(|l| !l.trim().is_empty()).count() as u32;
    let mut chunk = CodeChunk::new(file_path.to_string(), body, start_line, end_line, kind, language)
        .with_quality(QualityMetrics::new(
            1,
            0,
            0,
            0,
            lines_of_code,
            0,
            Vec::new(),
            Grade::A,
        ));
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        chunk = chunk.with_name(title);
    }
    chunk
}

fn strip_tags(text: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => result.push(c),
            _ => {}
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_sections() {
        let doc = "\
# Install

Run the installer and follow the prompts until the setup completes fully.

# Usage

Invoke the binary with a path argument and inspect the produced output.
";
        let chunks = TextParser::new().parse(doc, "README.md", Language::Markdown, 1200, 120);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].name(), Some("Install"));
        assert_eq!(chunks[1].name(), Some("Usage"));
        assert!(chunks.iter().all(|c| c.kind() == ChunkKind::Section));
    }

    #[test]
    fn test_small_sections_merge() {
        let doc = "\
# A

Tiny.

# B

This section carries enough characters to stand on its own as a chunk in
the index and will not be merged away by the minimum size rule.
";
        let chunks = TextParser::new().parse(doc, "doc.md", Language::Markdown, 1200, 120);

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content().contains("Tiny."));
        assert!(chunks[0].content().contains("stand on its own"));
    }

    #[test]
    fn test_heading_inside_code_fence_ignored() {
        let doc = "\
# Real

Some prose that is long enough to keep the section alive after merging.

```
# not a heading
```
";
        let chunks = TextParser::new().parse(doc, "doc.md", Language::Markdown, 1200, 120);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name(), Some("Real"));
    }

    #[test]
    fn test_html_sections() {
        let doc = "\
<html><body>
<h1>Overview</h1>
<p>The overview paragraph explains what this page is about in enough words.</p>
<h2>Details</h2>
<p>The details paragraph covers the specifics at satisfying length indeed.</p>
</body></html>
";
        let chunks = TextParser::new().parse(doc, "index.html", Language::Html, 1200, 120);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.name() == Some("Overview")));
        assert!(chunks.iter().any(|c| c.name() == Some("Details")));
    }

    #[test]
    fn test_plaintext_paragraph_windows() {
        let paragraph = "word ".repeat(40);
        let doc = format!("{}\n\n{}\n\n{}\n", paragraph, paragraph, paragraph);
        let chunks = TextParser::new().parse(&doc, "notes.txt", Language::PlainText, 300, 0);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.kind() == ChunkKind::Paragraph));
    }

    #[test]
    fn test_empty_document() {
        let chunks = TextParser::new().parse("", "empty.md", Language::Markdown, 1200, 120);
        assert!(chunks.is_empty());
    }
}
