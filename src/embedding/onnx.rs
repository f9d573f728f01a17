//! ONNX Runtime sentence-transformer embedder (all-MiniLM-L6-v2 and friends).
//!
//! Tokenizes with a HuggingFace `tokenizer.json`, runs the model on CPU and
//! mean-pools token embeddings under the attention mask. Output vectors are
//! L2-normalized so the index sees unit vectors from both profiles.

use std::path::Path;
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, Embedder, EmbeddingError};

/// Longest token sequence fed to the model; longer inputs are truncated.
const MAX_SEQUENCE_LENGTH: usize = 256;

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
    dimension: usize,
}

impl std::fmt::Debug for OnnxEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedder")
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbedder {
    pub fn new(
        model_path: &Path,
        tokenizer_path: &Path,
        threads: usize,
    ) -> Result<Self, EmbeddingError> {
        if !model_path.exists() {
            return Err(EmbeddingError::ModelUnavailable(format!(
                "ONNX model file not found: {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(EmbeddingError::ModelUnavailable(format!(
                "tokenizer file not found: {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(load_error(model_path))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error(model_path))?
            .with_intra_threads(threads.max(1))
            .map_err(load_error(model_path))?
            .commit_from_file(model_path)
            .map_err(load_error(model_path))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|err| {
            EmbeddingError::ModelUnavailable(format!("failed to load tokenizer: {}", err))
        })?;

        let model_id = model_path
            .parent()
            .and_then(|dir| dir.file_name())
            .or_else(|| model_path.file_stem())
            .map(|name| format!("onnx-{}", name.to_string_lossy()))
            .unwrap_or_else(|| "onnx".to_string());

        let mut embedder = Self {
            session: Mutex::new(session),
            tokenizer,
            model_id,
            dimension: 0,
        };

        // One pass to learn the hidden size.
        let sample = embedder.run(&["hidden size".to_string()])?;
        embedder.dimension = sample.first().map(Vec::len).unwrap_or(0);
        if embedder.dimension == 0 {
            return Err(EmbeddingError::ModelUnavailable(
                "model produced an empty embedding".to_string(),
            ));
        }

        tracing::info!(
            "Loaded ONNX embedding model {} ({} dimensions)",
            embedder.model_id,
            embedder.dimension
        );
        Ok(embedder)
    }

    fn run(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|err| EmbeddingError::Inference(format!("tokenization failed: {}", err)))?;

        let batch = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(MAX_SEQUENCE_LENGTH))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        for (row, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            for col in 0..ids.len().min(seq_len) {
                input_ids[row * seq_len + col] = i64::from(ids[col]);
                attention_mask[row * seq_len + col] = i64::from(mask[col]);
            }
        }
        let token_type_ids = vec![0i64; batch * seq_len];

        let shape = [batch, seq_len];
        let to_value = |data: Vec<i64>| -> Result<Tensor<i64>, EmbeddingError> {
            Tensor::from_array((shape, data))
                .map_err(|err| EmbeddingError::Inference(format!("tensor creation failed: {}", err)))
        };
        let ids_value = to_value(input_ids)?;
        let mask_value = to_value(attention_mask.clone())?;
        let type_value = to_value(token_type_ids)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbeddingError::Inference("ONNX session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids_value,
                "attention_mask" => mask_value,
                "token_type_ids" => type_value
            ])
            .map_err(|err| EmbeddingError::Inference(err.to_string()))?;

        // [batch, seq_len, hidden]
        let (output_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|err| EmbeddingError::Inference(err.to_string()))?;
        let dims: Vec<usize> = output_shape.iter().map(|&d| d.max(0) as usize).collect();
        if dims.len() != 3 || dims[0] != batch {
            return Err(EmbeddingError::Inference(format!(
                "unexpected output shape {:?}",
                dims
            )));
        }
        let out_seq = dims[1];
        let hidden = dims[2];
        if self.dimension != 0 && hidden != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: hidden,
            });
        }

        let mut vectors = Vec::with_capacity(batch);
        for row in 0..batch {
            let mut pooled = vec![0.0f32; hidden];
            let mut mask_sum = 0.0f32;
            for token in 0..out_seq.min(seq_len) {
                let weight = attention_mask[row * seq_len + token] as f32;
                if weight == 0.0 {
                    continue;
                }
                mask_sum += weight;
                let offset = (row * out_seq + token) * hidden;
                for (slot, value) in pooled.iter_mut().zip(&data[offset..offset + hidden]) {
                    *slot += value * weight;
                }
            }
            for value in pooled.iter_mut() {
                *value /= mask_sum.max(1e-9);
            }
            l2_normalize(&mut pooled);
            vectors.push(pooled);
        }

        Ok(vectors)
    }
}

fn load_error<E: std::fmt::Display>(model_path: &Path) -> impl Fn(E) -> EmbeddingError + '_ {
    move |err| {
        EmbeddingError::ModelUnavailable(format!(
            "failed to load ONNX model {}: {}",
            model_path.display(),
            err
        ))
    }
}

impl Embedder for OnnxEmbedder {
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
        let mut vectors = self.run(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Inference("model returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyBatchItem(index));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts)
    }
}
