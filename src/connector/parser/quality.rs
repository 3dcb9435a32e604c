use crate::domain::{ChunkKind, Grade, Language, QualityMetrics, Severity, Smell, SmellKind};

/// Branching tokens counted towards cyclomatic complexity, shared across
/// the supported languages. Word tokens are matched on identifier
/// boundaries; the operator tokens are substring-counted.
const BRANCH_KEYWORDS: &[&str] = &[
    "if", "elif", "elsif", "for", "while", "case", "when", "catch", "except", "rescue", "match",
];

const BRANCH_OPERATORS: &[&str] = &["&&", "||"];

/// Deterministic quality estimation over a chunk's source text.
///
/// The same analyzer serves every parser variant: it works on tokens and
/// indentation rather than a syntax tree, so fallback-parsed chunks get the
/// same treatment as structural ones.
pub fn analyze(
    content: &str,
    language: Language,
    kind: ChunkKind,
    parameter_count: u32,
    method_count: u32,
) -> QualityMetrics {
    let lines_of_code = content.lines().filter(|l| !l.trim().is_empty()).count() as u32;
    let cyclomatic = cyclomatic_complexity(content, language);
    let nesting_depth = max_nesting_depth(content, language);
    let cognitive = cognitive_complexity(content, language);

    let smells = detect_smells(
        kind,
        lines_of_code,
        cyclomatic,
        nesting_depth,
        parameter_count,
        method_count,
    );
    let grade = grade_for(cyclomatic, nesting_depth, lines_of_code, parameter_count);

    QualityMetrics::new(
        cyclomatic,
        cognitive,
        nesting_depth,
        parameter_count,
        lines_of_code,
        method_count,
        smells,
        grade,
    )
}

/// Count of branching constructs plus one.
pub fn cyclomatic_complexity(content: &str, language: Language) -> u32 {
    let mut count = 1u32;

    for word in identifier_tokens(content) {
        if BRANCH_KEYWORDS.contains(&word) {
            count += 1;
        } else if word == "or" || word == "and" {
            // Word-form boolean operators only exist in Python and Ruby.
            if matches!(language, Language::Python | Language::Ruby) {
                count += 1;
            }
        }
    }

    for op in BRANCH_OPERATORS {
        count += content.matches(op).count() as u32;
    }

    count
}

/// Cognitive complexity: each branching construct costs 1 plus its nesting
/// level at the point of occurrence.
pub fn cognitive_complexity(content: &str, language: Language) -> u32 {
    let mut total = 0u32;

    for (line, depth) in lines_with_depth(content, language) {
        let branches = identifier_tokens(line)
            .filter(|w| BRANCH_KEYWORDS.contains(w))
            .count() as u32;
        if branches > 0 {
            total += branches * (1 + depth);
        }
    }

    total
}

/// Deepest nesting level observed in the chunk body.
pub fn max_nesting_depth(content: &str, language: Language) -> u32 {
    lines_with_depth(content, language)
        .map(|(_, depth)| depth)
        .max()
        .unwrap_or(0)
}

fn detect_smells(
    kind: ChunkKind,
    lines_of_code: u32,
    cyclomatic: u32,
    nesting_depth: u32,
    parameter_count: u32,
    method_count: u32,
) -> Vec<Smell> {
    let mut smells = Vec::new();

    if matches!(kind, ChunkKind::Function | ChunkKind::Method) && lines_of_code > 50 {
        let severity = if lines_of_code > 100 {
            Severity::Error
        } else {
            Severity::Warning
        };
        smells.push(Smell::new(SmellKind::LongMethod, severity));
    }

    if kind == ChunkKind::Class && (lines_of_code > 250 || method_count > 20) {
        let severity = if lines_of_code > 400 || method_count > 40 {
            Severity::Error
        } else {
            Severity::Warning
        };
        smells.push(Smell::new(SmellKind::GodClass, severity));
    }

    if nesting_depth > 4 {
        let severity = if nesting_depth > 7 {
            Severity::Error
        } else {
            Severity::Warning
        };
        smells.push(Smell::new(SmellKind::DeepNesting, severity));
    }

    if cyclomatic > 15 {
        let severity = if cyclomatic > 30 {
            Severity::Error
        } else {
            Severity::Warning
        };
        smells.push(Smell::new(SmellKind::HighComplexity, severity));
    }

    if parameter_count > 5 {
        let severity = if parameter_count > 8 {
            Severity::Warning
        } else {
            Severity::Info
        };
        smells.push(Smell::new(SmellKind::LongParameterList, severity));
    }

    smells
}

fn grade_for(cyclomatic: u32, nesting_depth: u32, lines_of_code: u32, parameter_count: u32) -> Grade {
    let mut points = 0u32;

    points += match cyclomatic {
        0..=5 => 0,
        6..=10 => 1,
        11..=15 => 2,
        16..=25 => 3,
        _ => 4,
    };
    points += match nesting_depth {
        0..=3 => 0,
        4..=5 => 1,
        _ => 2,
    };
    points += match lines_of_code {
        0..=50 => 0,
        51..=150 => 1,
        _ => 2,
    };
    if parameter_count > 5 {
        points += 1;
    }

    match points {
        0..=1 => Grade::A,
        2..=3 => Grade::B,
        4..=5 => Grade::C,
        6..=7 => Grade::D,
        _ => Grade::F,
    }
}

/// Count parameters in a declaration's first line: entries between the first
/// balanced parentheses, ignoring receiver conventions.
pub fn count_parameters(signature_line: &str) -> u32 {
    let open = match signature_line.find('(') {
        Some(i) => i,
        None => return 0,
    };

    let mut depth = 0u32;
    let mut close = signature_line.len();
    for (i, c) in signature_line.char_indices().skip(open) {
        match c {
            '(' | '[' | '<' | '{' => depth += 1,
            ')' | ']' | '>' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    close = i;
                    break;
                }
            }
            _ => {}
        }
    }

    let inner = &signature_line[open + 1..close.min(signature_line.len())];
    inner
        .split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && *p != "self" && *p != "this")
        .count() as u32
}

fn identifier_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
}

/// Per-line nesting depth. Indentation-sensitive languages use indentation
/// levels; brace languages track `{`/`}` depth.
fn lines_with_depth(content: &str, language: Language) -> impl Iterator<Item = (&str, u32)> {
    let indent_based = matches!(language, Language::Python | Language::Ruby);
    let mut brace_depth: i32 = 0;

    content.lines().map(move |line| {
        let depth = if indent_based {
            let indent = line.len() - line.trim_start().len();
            (indent / 4) as u32
        } else {
            let depth_here = brace_depth.max(0) as u32;
            let opens = line.matches('{').count() as i32;
            let closes = line.matches('}').count() as i32;
            brace_depth += opens - closes;
            depth_here
        };
        (line, depth)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_code_has_base_complexity() {
        let metrics = analyze(
            "def f():\n    return 1\n",
            Language::Python,
            ChunkKind::Function,
            0,
            0,
        );
        assert_eq!(metrics.cyclomatic(), 1);
        assert_eq!(metrics.grade(), Grade::A);
        assert!(metrics.smells().is_empty());
    }

    #[test]
    fn test_branches_raise_cyclomatic() {
        let code = "def f(x):\n    if x:\n        return 1\n    for i in range(3):\n        while i:\n            pass\n";
        assert_eq!(cyclomatic_complexity(code, Language::Python), 4);
    }

    #[test]
    fn test_boolean_operators_counted() {
        assert_eq!(
            cyclomatic_complexity("if (a && b || c) {}", Language::JavaScript),
            4
        );
        // Word operators only count in Python/Ruby.
        assert_eq!(
            cyclomatic_complexity("if a and b or c:", Language::Python),
            4
        );
    }

    #[test]
    fn test_long_method_smell() {
        let body: String = std::iter::once("def f():".to_string())
            .chain((0..60).map(|i| format!("    x{} = {}", i, i)))
            .collect::<Vec<_>>()
            .join("\n");

        let metrics = analyze(&body, Language::Python, ChunkKind::Function, 0, 0);
        assert!(metrics
            .smells()
            .iter()
            .any(|s| s.kind == SmellKind::LongMethod));
    }

    #[test]
    fn test_deep_nesting_smell() {
        let mut code = String::from("def f(x):\n");
        for depth in 1..=6 {
            code.push_str(&" ".repeat(depth * 4));
            code.push_str("if x:\n");
        }
        code.push_str(&" ".repeat(28));
        code.push_str("pass\n");

        let metrics = analyze(&code, Language::Python, ChunkKind::Function, 1, 0);
        assert!(metrics
            .smells()
            .iter()
            .any(|s| s.kind == SmellKind::DeepNesting));
    }

    #[test]
    fn test_god_class_smell_by_method_count() {
        let metrics = analyze(
            "class Big:\n    pass\n",
            Language::Python,
            ChunkKind::Class,
            0,
            25,
        );
        assert!(metrics
            .smells()
            .iter()
            .any(|s| s.kind == SmellKind::GodClass));
    }

    #[test]
    fn test_long_parameter_list() {
        let metrics = analyze(
            "def f(a, b, c, d, e, f, g):\n    pass\n",
            Language::Python,
            ChunkKind::Function,
            7,
            0,
        );
        assert!(metrics
            .smells()
            .iter()
            .any(|s| s.kind == SmellKind::LongParameterList));
    }

    #[test]
    fn test_count_parameters() {
        assert_eq!(count_parameters("def add(a, b):"), 2);
        assert_eq!(count_parameters("def method(self, x):"), 1);
        assert_eq!(count_parameters("function noop() {"), 0);
        assert_eq!(
            count_parameters("function f(a: Map<string, number>, b: string) {"),
            2
        );
    }

    #[test]
    fn test_brace_nesting_depth() {
        let code = "function f() {\n  if (a) {\n    if (b) {\n      go();\n    }\n  }\n}\n";
        assert!(max_nesting_depth(code, Language::JavaScript) >= 3);
    }
}
