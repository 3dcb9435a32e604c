use serde::{Deserialize, Serialize};

/// Letter grade summarising a chunk's quality metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "A" => Grade::A,
            "B" => Grade::B,
            "C" => Grade::C,
            "D" => Grade::D,
            _ => Grade::F,
        }
    }

    /// Normalised score used by the search re-ranker (A = 1.0, F = 0.2).
    pub fn score(&self) -> f32 {
        match self {
            Grade::A => 1.0,
            Grade::B => 0.8,
            Grade::C => 0.6,
            Grade::D => 0.4,
            Grade::F => 0.2,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmellKind {
    LongMethod,
    GodClass,
    DeepNesting,
    HighComplexity,
    LongParameterList,
}

impl SmellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmellKind::LongMethod => "long_method",
            SmellKind::GodClass => "god_class",
            SmellKind::DeepNesting => "deep_nesting",
            SmellKind::HighComplexity => "high_complexity",
            SmellKind::LongParameterList => "long_parameter_list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single detected smell with its severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Smell {
    pub kind: SmellKind,
    pub severity: Severity,
}

impl Smell {
    pub fn new(kind: SmellKind, severity: Severity) -> Self {
        Self { kind, severity }
    }
}

/// Structured quality metrics computed while walking a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    cyclomatic: u32,
    cognitive: u32,
    nesting_depth: u32,
    parameter_count: u32,
    lines_of_code: u32,
    method_count: u32,
    smells: Vec<Smell>,
    grade: Grade,
}

impl QualityMetrics {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cyclomatic: u32,
        cognitive: u32,
        nesting_depth: u32,
        parameter_count: u32,
        lines_of_code: u32,
        method_count: u32,
        smells: Vec<Smell>,
        grade: Grade,
    ) -> Self {
        Self {
            cyclomatic,
            cognitive,
            nesting_depth,
            parameter_count,
            lines_of_code,
            method_count,
            smells,
            grade,
        }
    }

    pub fn cyclomatic(&self) -> u32 {
        self.cyclomatic
    }

    pub fn cognitive(&self) -> u32 {
        self.cognitive
    }

    pub fn nesting_depth(&self) -> u32 {
        self.nesting_depth
    }

    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    pub fn lines_of_code(&self) -> u32 {
        self.lines_of_code
    }

    pub fn method_count(&self) -> u32 {
        self.method_count
    }

    pub fn smells(&self) -> &[Smell] {
        &self.smells
    }

    pub fn smell_count(&self) -> u32 {
        self.smells.len() as u32
    }

    pub fn grade(&self) -> Grade {
        self.grade
    }

    /// Score in [0, 1] combining the grade with a per-smell penalty.
    pub fn quality_score(&self) -> f32 {
        (self.grade.score() - 0.05 * self.smell_count() as f32).max(0.0)
    }
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            cyclomatic: 1,
            cognitive: 0,
            nesting_depth: 0,
            parameter_count: 0,
            lines_of_code: 0,
            method_count: 0,
            smells: Vec::new(),
            grade: Grade::A,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_ordering() {
        assert!(Grade::A < Grade::B);
        assert!(Grade::B < Grade::F);
    }

    #[test]
    fn test_grade_roundtrip() {
        for grade in [Grade::A, Grade::B, Grade::C, Grade::D, Grade::F] {
            assert_eq!(Grade::parse(grade.as_str()), grade);
        }
    }

    #[test]
    fn test_quality_score_penalises_smells() {
        let clean = QualityMetrics::default();
        let smelly = QualityMetrics::new(
            1,
            0,
            0,
            0,
            10,
            0,
            vec![
                Smell::new(SmellKind::LongMethod, Severity::Warning),
                Smell::new(SmellKind::DeepNesting, Severity::Warning),
            ],
            Grade::A,
        );

        assert!(smelly.quality_score() < clean.quality_score());
        assert!(smelly.quality_score() >= 0.0);
    }
}
