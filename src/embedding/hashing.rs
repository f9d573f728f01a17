//! Feature-hashing embedder.
//!
//! Each normalized word token is hashed with SHA-256; the first eight digest
//! bytes pick a bucket and the ninth byte picks a sign. Token counts are
//! accumulated into the buckets and the result is L2-normalized, so cosine
//! similarity tracks weighted lexical overlap. No model files, no state.

use sha2::{Digest, Sha256};

use super::{l2_normalize, Embedder, EmbeddingError};

const STOP_WORDS: [&str; 54] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of", "on",
    "or", "our", "so", "than", "that", "the", "their", "then", "there", "these", "this", "to",
    "via", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "you", "your",
];

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::ModelUnavailable(
                "hashing embedder needs a non-zero dimension".to_string(),
            ));
        }
        Ok(Self {
            model_id: format!("hashing-v1-{}", dimension),
            dimension,
        })
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Lowercased word tokens with stop words removed. Dots, dashes and
/// underscores stay inside tokens so `23.10.0` or `process.cpus` survive.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || matches!(c, '.' | '-' | '_')))
        .map(|raw| raw.trim_matches(|c| matches!(c, '.' | '-' | '_')))
        .filter(|raw| !raw.is_empty())
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let first = embedder.embed("Configure the SLURM executor").unwrap();
        let second = embedder.embed("Configure the SLURM executor").unwrap();
        assert_eq!(first, second);

        let other = HashingEmbedder::new(384).unwrap();
        assert_eq!(first, other.embed("Configure the SLURM executor").unwrap());
    }

    #[test]
    fn rejects_empty_text() {
        let embedder = HashingEmbedder::new(16).unwrap();
        assert!(matches!(embedder.embed(""), Err(EmbeddingError::EmptyInput)));
        assert!(matches!(embedder.embed(" \n\t"), Err(EmbeddingError::EmptyInput)));
    }

    #[test]
    fn stop_word_only_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let vector = embedder.embed("what is the").unwrap();
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn output_is_unit_length() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let vector = embedder.embed("Channels connect processes").unwrap();
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let query = embedder.embed("What is the latest Nextflow version?").unwrap();
        let related = embedder.embed("Nextflow 23.10.0 released").unwrap();
        let unrelated = embedder.embed("Install via conda").unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
        assert!(cosine(&query, &related) > 0.3);
    }

    #[test]
    fn tokenizer_keeps_versions_and_drops_punctuation() {
        assert_eq!(
            tokenize("What is the latest Nextflow version?"),
            vec!["latest", "nextflow", "version"]
        );
        assert_eq!(tokenize("Nextflow 23.10.0 released."), vec!["nextflow", "23.10.0", "released"]);
        assert_eq!(tokenize("--- process.cpus ---"), vec!["process.cpus"]);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
