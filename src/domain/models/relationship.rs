use serde::{Deserialize, Serialize};

/// A directed, typed edge between two chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    source_chunk_id: String,
    target_chunk_id: String,
    kind: RelationKind,
    weight: f32,
}

impl Relationship {
    pub fn new(
        source_chunk_id: String,
        target_chunk_id: String,
        kind: RelationKind,
        weight: f32,
    ) -> Self {
        Self {
            source_chunk_id,
            target_chunk_id,
            kind,
            weight,
        }
    }

    pub fn source_chunk_id(&self) -> &str {
        &self.source_chunk_id
    }

    pub fn target_chunk_id(&self) -> &str {
        &self.target_chunk_id
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// The mirror edge (`a calls b` ⇒ `b called_by a`), same weight.
    pub fn inverse(&self) -> Relationship {
        Relationship::new(
            self.target_chunk_id.clone(),
            self.source_chunk_id.clone(),
            self.kind.inverse(),
            self.weight,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    CalledBy,
    Imports,
    ImportedBy,
    SemanticallySimilar,
    Contains,
    ContainedBy,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Calls => "calls",
            RelationKind::CalledBy => "called_by",
            RelationKind::Imports => "imports",
            RelationKind::ImportedBy => "imported_by",
            RelationKind::SemanticallySimilar => "semantically_similar",
            RelationKind::Contains => "contains",
            RelationKind::ContainedBy => "contained_by",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(RelationKind::Calls),
            "called_by" => Some(RelationKind::CalledBy),
            "imports" => Some(RelationKind::Imports),
            "imported_by" => Some(RelationKind::ImportedBy),
            "semantically_similar" => Some(RelationKind::SemanticallySimilar),
            "contains" => Some(RelationKind::Contains),
            "contained_by" => Some(RelationKind::ContainedBy),
            _ => None,
        }
    }

    pub fn inverse(&self) -> RelationKind {
        match self {
            RelationKind::Calls => RelationKind::CalledBy,
            RelationKind::CalledBy => RelationKind::Calls,
            RelationKind::Imports => RelationKind::ImportedBy,
            RelationKind::ImportedBy => RelationKind::Imports,
            RelationKind::SemanticallySimilar => RelationKind::SemanticallySimilar,
            RelationKind::Contains => RelationKind::ContainedBy,
            RelationKind::ContainedBy => RelationKind::Contains,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A symbol reference emitted by a parser before resolution.
///
/// Resolution against the project symbol table happens at index time;
/// unresolved references are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRef {
    /// Referenced name (callee or imported module/symbol).
    name: String,
    /// 1-based line of the reference site.
    line: u32,
    kind: SymbolRefKind,
}

impl SymbolRef {
    pub fn new(name: String, line: u32, kind: SymbolRefKind) -> Self {
        Self { name, line, kind }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn kind(&self) -> SymbolRefKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolRefKind {
    Call,
    Import,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_edge() {
        let edge = Relationship::new("a".to_string(), "b".to_string(), RelationKind::Calls, 1.0);
        let inverse = edge.inverse();

        assert_eq!(inverse.source_chunk_id(), "b");
        assert_eq!(inverse.target_chunk_id(), "a");
        assert_eq!(inverse.kind(), RelationKind::CalledBy);
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            RelationKind::Calls,
            RelationKind::CalledBy,
            RelationKind::Imports,
            RelationKind::ImportedBy,
            RelationKind::SemanticallySimilar,
            RelationKind::Contains,
            RelationKind::ContainedBy,
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
            assert_eq!(kind.inverse().inverse(), kind);
        }
    }
}
