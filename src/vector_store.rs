//! The vector store seam: one collection of records, each carrying a dense
//! and a sparse vector, queried by both at once.

use std::{cmp::Ordering, future::Future};

use serde::{Deserialize, Serialize};

use crate::{
    embedding::{DenseVector, SparseVector},
    error::Result,
    record::Record,
};

/// Payload constraints applied before ranking.
///
/// Dates compare as ISO `YYYY-MM-DD` strings and both bounds are
/// inclusive. A record without a date never matches a date bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.answer_type.is_none() && self.date_from.is_none() && self.date_to.is_none()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(wanted) = &self.answer_type
            && record.answer_type.as_deref() != Some(wanted.as_str())
        {
            return false;
        }
        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }
        let Some(date) = record.date.as_deref() else {
            return false;
        };
        self.date_from.as_deref().is_none_or(|from| date >= from)
            && self.date_to.as_deref().is_none_or(|to| date <= to)
    }
}

/// A dual-vector request: each modality returns its own top `limit`.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub dense: DenseVector,
    pub sparse: SparseVector,
    pub limit: usize,
    pub filter: SearchFilter,
}

/// One record scored by one modality. The record carries its stored dense
/// vector.
#[derive(Debug, Clone)]
pub struct Hit {
    pub record: Record,
    pub score: f32,
}

/// Per-modality ranked hits, each ordered by score descending then id
/// ascending.
#[derive(Debug, Clone, Default)]
pub struct HybridHits {
    pub dense: Vec<Hit>,
    pub sparse: Vec<Hit>,
}

pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id. Payload and both vectors of every
    /// record in the call are written in one transaction.
    fn upsert(&self, records: Vec<Record>) -> impl Future<Output = Result<()>> + Send;

    fn hybrid_query(
        &self,
        query: HybridQuery,
    ) -> impl Future<Output = Result<HybridHits>> + Send;

    /// Number of records in the collection.
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// Order hits by score descending, then id ascending, and keep `limit`.
pub fn rank_hits(mut hits: Vec<Hit>, limit: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    hits.truncate(limit);
    hits
}
