//! Dense and sparse vector types and the encoder seams.
//!
//! Encoders are pure functions of their input text. Both kinds are
//! batch-first: [`DenseEncoder::encode_batch`] must return exactly one vector
//! per input, in input order, and the vector for a text must not depend on
//! which other texts share its batch.

use std::{collections::BTreeMap, future::Future};

use crate::error::{Error, Result};

/// A fixed-length semantic embedding, L2-normalized on construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseVector(Vec<f32>);

impl DenseVector {
    /// Normalize `values` to unit length. An all-zero vector stays zero.
    pub fn normalized(mut values: Vec<f32>) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            for v in &mut values {
                *v /= norm;
            }
        }
        Self(values)
    }

    /// Wrap values that are already normalized (e.g. read back from disk).
    pub fn from_raw(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cosine similarity clamped to [0, 1].
    ///
    /// Both sides are unit length, so this is the dot product. Mismatched
    /// dimensions score zero.
    pub fn similarity(&self, other: &DenseVector) -> f32 {
        if self.0.len() != other.0.len() {
            return 0.0;
        }
        let dot: f32 = self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum();
        if dot.is_finite() { dot.clamp(0.0, 1.0) } else { 0.0 }
    }
}

/// A sparse lexical embedding: strictly increasing term indices with
/// positive weights, L2-normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseVector {
    /// Build a normalized vector from (index, weight) pairs.
    ///
    /// Duplicate indices are summed; non-positive or non-finite weights are
    /// dropped.
    pub fn from_weights(weights: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
        for (index, weight) in weights {
            *merged.entry(index).or_default() += weight;
        }
        merged.retain(|_, w| w.is_finite() && *w > 0.0);

        let norm = merged.values().map(|w| w * w).sum::<f32>().sqrt();
        let (indices, values): (Vec<u32>, Vec<f32>) = merged
            .into_iter()
            .map(|(i, w)| (i, if norm > 0.0 { w / norm } else { w }))
            .unzip();
        Self { indices, values }
    }

    /// Reassemble a vector read back from storage.
    ///
    /// Returns `None` when the parts are inconsistent.
    pub fn from_parts(indices: Vec<u32>, values: Vec<f32>) -> Option<Self> {
        if indices.len() != values.len()
            || indices.windows(2).any(|w| w[0] >= w[1])
        {
            return None;
        }
        Some(Self { indices, values })
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product by merge join over the sorted indices, clamped to [0, 1].
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0f32;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum.clamp(0.0, 1.0)
    }
}

/// Produces dense semantic vectors.
pub trait DenseEncoder: Send + Sync {
    /// Identifier of the underlying model, for logs and status output.
    fn model_id(&self) -> &str;

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<DenseVector>>> + Send;

    fn encode(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<DenseVector>> + Send {
        async move {
            let texts = [text.to_string()];
            let mut vectors = self.encode_batch(&texts).await?;
            vectors
                .pop()
                .ok_or_else(|| Error::encoding("dense", "encoder returned no vector"))
        }
    }
}

/// Produces sparse lexical vectors.
pub trait SparseEncoder: Send + Sync {
    fn model_id(&self) -> &str;

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<SparseVector>>> + Send;

    fn encode(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<SparseVector>> + Send {
        async move {
            let texts = [text.to_string()];
            let mut vectors = self.encode_batch(&texts).await?;
            vectors
                .pop()
                .ok_or_else(|| Error::encoding("sparse", "encoder returned no vector"))
        }
    }
}
