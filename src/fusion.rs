//! Merging the dense and sparse result lists into one ranking.
//!
//! Two formulas are available. Weighted fusion combines the raw scores
//! linearly; reciprocal rank fusion only looks at each list's ranks and is
//! rescaled so a record ranked first in both lists scores exactly 1.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::Serialize;

use crate::{
    config::{FusionConfig, FusionMethod, SearchConfig},
    record::Record,
    vector_store::{Hit, HybridHits},
};

/// A record with its per-modality and fused scores.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub record: Record,
    pub dense_score: f32,
    pub sparse_score: f32,
    pub fused_score: f32,
    /// 1-based position in the fused ranking.
    pub rank: usize,
}

/// Where a record appeared in one modality's list.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    score: f32,
    rank: usize,
}

#[derive(Debug, Clone)]
pub struct Fusion {
    method: FusionMethod,
    dense_weight: f32,
    sparse_weight: f32,
    rrf_k: f32,
    missing_score_floor: f32,
    min_fused_score: f32,
}

impl Default for Fusion {
    fn default() -> Self {
        Self::from_config(&FusionConfig::default(), &SearchConfig::default())
    }
}

impl Fusion {
    pub fn from_config(fusion: &FusionConfig, search: &SearchConfig) -> Self {
        Self {
            method: fusion.method,
            dense_weight: fusion.dense_weight,
            sparse_weight: fusion.sparse_weight,
            rrf_k: fusion.rrf_k as f32,
            missing_score_floor: search.missing_score_floor,
            min_fused_score: search.min_fused_score,
        }
    }

    fn fused_score(&self, dense: Option<Placement>, sparse: Option<Placement>) -> f32 {
        match self.method {
            FusionMethod::Weighted => {
                let floor = self.missing_score_floor;
                let d = dense.map_or(floor, |p| p.score);
                let s = sparse.map_or(floor, |p| p.score);
                self.dense_weight * d + self.sparse_weight * s
            }
            FusionMethod::Rrf => {
                let k = self.rrf_k;
                let term = |p: Option<Placement>| p.map_or(0.0, |p| 1.0 / (k + p.rank as f32));
                (term(dense) + term(sparse)) / (2.0 / (k + 1.0))
            }
        }
    }

    /// Merge both lists by record id, score the union, and return the top
    /// `top_k` in rank order.
    ///
    /// Scores are compared with ties broken by ascending id, so the output
    /// is a total order that does not depend on the order of either input
    /// list beyond its ranks.
    pub fn merge(&self, hits: HybridHits, top_k: usize) -> Vec<ScoredCandidate> {
        let mut merged: BTreeMap<String, (Record, Option<Placement>, Option<Placement>)> =
            BTreeMap::new();

        for (position, Hit { record, score }) in hits.dense.into_iter().enumerate() {
            let placement = Placement {
                score,
                rank: position + 1,
            };
            merged
                .entry(record.id.clone())
                .or_insert_with(|| (record, None, None))
                .1 = Some(placement);
        }
        for (position, Hit { record, score }) in hits.sparse.into_iter().enumerate() {
            let placement = Placement {
                score,
                rank: position + 1,
            };
            merged
                .entry(record.id.clone())
                .or_insert_with(|| (record, None, None))
                .2 = Some(placement);
        }

        let floor = self.missing_score_floor;
        let mut candidates: Vec<ScoredCandidate> = merged
            .into_values()
            .map(|(record, dense, sparse)| ScoredCandidate {
                dense_score: dense.map_or(floor, |p| p.score),
                sparse_score: sparse.map_or(floor, |p| p.score),
                fused_score: self.fused_score(dense, sparse),
                record,
                rank: 0,
            })
            .filter(|c| self.min_fused_score <= 0.0 || c.fused_score >= self.min_fused_score)
            .collect();

        candidates.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        candidates.truncate(top_k);
        for (i, c) in candidates.iter_mut().enumerate() {
            c.rank = i + 1;
        }
        candidates
    }
}
