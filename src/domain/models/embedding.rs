use serde::{Deserialize, Serialize};

/// A fixed-dimension vector tied to a chunk's content hash.
///
/// Keyed by content hash rather than chunk id so that byte-identical chunks
/// share one vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    content_hash: String,
    vector: Vec<f32>,
    model: String,
}

impl Embedding {
    pub fn new(content_hash: String, vector: Vec<f32>, model: String) -> Self {
        Self {
            content_hash,
            vector,
            model,
        }
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn into_vector(self) -> Vec<f32> {
        self.vector
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }

    pub fn is_normalized(&self) -> bool {
        (self.magnitude() - 1.0).abs() < 0.01
    }

    pub fn magnitude(&self) -> f32 {
        self.vector.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn normalized(mut self) -> Self {
        l2_normalize(&mut self.vector);
        self
    }
}

/// L2-normalises a vector in place; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = dot_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    model_name: String,
    dimensions: usize,
    normalised: bool,
}

impl EmbeddingConfig {
    pub fn new(model_name: String, dimensions: usize, normalised: bool) -> Self {
        Self {
            model_name,
            dimensions,
            normalised,
        }
    }

    /// Models known to emit unit-length vectors; for these, similarity
    /// reduces to a dot product.
    pub fn model_is_normalised(model_name: &str) -> bool {
        let lowered = model_name.to_lowercase();
        lowered.starts_with("bge") || lowered.starts_with("jina-v3") || lowered.contains("local-hash")
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn normalised(&self) -> bool {
        self.normalised
    }

    /// Similarity function dictated by the model designation.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        if self.normalised {
            dot_product(a, b)
        } else {
            cosine_similarity(a, b)
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "local-hash-384".to_string(),
            dimensions: 384,
            normalised: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_creation() {
        let embedding = Embedding::new(
            "deadbeef".to_string(),
            vec![0.5, 0.5, 0.5, 0.5],
            "test-model".to_string(),
        );

        assert_eq!(embedding.content_hash(), "deadbeef");
        assert_eq!(embedding.dimensions(), 4);
        assert_eq!(embedding.model(), "test-model");
    }

    #[test]
    fn test_normalization() {
        let embedding =
            Embedding::new("h".to_string(), vec![3.0, 4.0], "test".to_string()).normalized();
        assert!(embedding.is_normalized());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
    }

    #[test]
    fn test_dot_matches_cosine_for_unit_vectors() {
        let mut a = vec![3.0, 4.0];
        let mut b = vec![4.0, 3.0];
        l2_normalize(&mut a);
        l2_normalize(&mut b);

        let cfg = EmbeddingConfig::new("bge-small".to_string(), 2, true);
        assert!((cfg.similarity(&a, &b) - cosine_similarity(&a, &b)).abs() < 1e-6);
    }

    #[test]
    fn test_model_designation() {
        assert!(EmbeddingConfig::model_is_normalised("bge-small-en"));
        assert!(EmbeddingConfig::model_is_normalised("jina-v3"));
        assert!(!EmbeddingConfig::model_is_normalised("word2vec"));
    }
}
