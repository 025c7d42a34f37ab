//! Confidence in a fused candidate list.
//!
//! The score blends how relevant the best match is, how full the result
//! list is, and how much the candidates agree with each other. It is then
//! discounted when the top two candidates are nearly tied and when too few
//! candidates clear the relevance floor.

use serde::Serialize;

use crate::{config::ConfidenceConfig, fusion::ScoredCandidate};

/// The inputs that produced a confidence value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
    /// Fused score of the top candidate.
    pub relevance: f32,
    /// Fraction of the requested `top_k` that was filled.
    pub diversity: f32,
    /// Mean pairwise similarity of the candidates' dense vectors.
    pub agreement: f32,
    /// Lead of the top candidate over the second.
    pub margin: f32,
    pub ambiguity_factor: f32,
    /// Candidates at or above the relevance floor.
    pub supporting: usize,
    pub support_factor: f32,
}

/// One candidate's share of the total fused score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub id: String,
    pub rank: usize,
    pub share: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Confidence {
    pub value: f32,
    pub breakdown: ConfidenceBreakdown,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ConfidenceConfig::default())
    }
}

impl ConfidenceScorer {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// Score a ranked candidate list. Returns exactly 0 for an empty list
    /// and a value in (0, 1] otherwise.
    pub fn score(&self, candidates: &[ScoredCandidate], top_k: usize) -> Confidence {
        let Some(top) = candidates.first() else {
            return Confidence::default();
        };
        let c = &self.config;

        let relevance = top.fused_score.clamp(0.0, 1.0);
        let diversity = (candidates.len() as f32 / top_k.max(1) as f32).min(1.0);
        let agreement = agreement(candidates);

        let margin = match candidates.get(1) {
            Some(second) => (top.fused_score - second.fused_score).max(0.0),
            None => top.fused_score.max(0.0),
        };
        let ambiguity_factor =
            1.0 - c.ambiguity_penalty * (1.0 - (margin / c.ambiguity_gap).min(1.0));

        let supporting = candidates
            .iter()
            .filter(|cand| cand.fused_score >= c.relevance_floor)
            .count();
        let support_factor = if supporting >= c.min_supporting {
            1.0
        } else {
            (supporting as f32 + 1.0) / (c.min_supporting as f32 + 1.0)
        };

        let base = c.relevance_weight * relevance
            + c.diversity_weight * diversity
            + c.agreement_weight * agreement;
        let value = (base * ambiguity_factor * support_factor).clamp(0.0, 1.0);

        Confidence {
            value,
            breakdown: ConfidenceBreakdown {
                relevance,
                diversity,
                agreement,
                margin,
                ambiguity_factor,
                supporting,
                support_factor,
            },
            contributions: contributions(candidates),
        }
    }
}

fn agreement(candidates: &[ScoredCandidate]) -> f32 {
    let n = candidates.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            total += a.record.dense_vector.similarity(&b.record.dense_vector);
        }
    }
    let pairs = (n * (n - 1) / 2) as f32;
    (total / pairs).clamp(0.0, 1.0)
}

// With no fused mass at all, every candidate gets an equal share.
fn contributions(candidates: &[ScoredCandidate]) -> Vec<Contribution> {
    let total: f32 = candidates.iter().map(|c| c.fused_score.max(0.0)).sum();
    let n = candidates.len() as f32;
    candidates
        .iter()
        .map(|c| Contribution {
            id: c.record.id.clone(),
            rank: c.rank,
            share: if total > 0.0 {
                c.fused_score.max(0.0) / total
            } else {
                1.0 / n
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{embedding::DenseVector, record::Record};

    fn candidate(id: &str, fused: f32, dense: &[f32]) -> ScoredCandidate {
        ScoredCandidate {
            record: Record {
                id: id.to_string(),
                question: "q".into(),
                answer: "a".into(),
                dense_vector: DenseVector::normalized(dense.to_vec()),
                ..Record::default()
            },
            dense_score: fused,
            sparse_score: fused,
            fused_score: fused,
            rank: 0,
        }
    }

    fn ranked(mut list: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        for (i, c) in list.iter_mut().enumerate() {
            c.rank = i + 1;
        }
        list
    }

    #[test]
    fn empty_candidates_score_zero() {
        let confidence = ConfidenceScorer::default().score(&[], 5);
        assert_eq!(confidence.value, 0.0);
        assert!(confidence.contributions.is_empty());
    }

    #[test]
    fn any_candidate_scores_positive() {
        let list = ranked(vec![candidate("a", 0.0, &[1.0, 0.0])]);
        let confidence = ConfidenceScorer::default().score(&list, 5);
        assert!(confidence.value > 0.0);
        assert!(confidence.value <= 1.0);
    }

    #[test]
    fn single_strong_candidate() {
        let list = ranked(vec![candidate("a", 0.9, &[1.0, 0.0])]);
        let confidence = ConfidenceScorer::default().score(&list, 5);
        let b = &confidence.breakdown;
        assert!((b.relevance - 0.9).abs() < 1e-6);
        assert!((b.diversity - 0.2).abs() < 1e-6);
        assert_eq!(b.agreement, 0.0);
        assert_eq!(b.ambiguity_factor, 1.0);
        assert_eq!(b.supporting, 1);
        // 0.6 * 0.9 + 0.2 * 0.2
        assert!((confidence.value - 0.58).abs() < 1e-5);
    }

    #[test]
    fn near_tie_is_penalized() {
        let scorer = ConfidenceScorer::default();
        let clear = ranked(vec![
            candidate("a", 0.8, &[1.0, 0.0]),
            candidate("b", 0.5, &[1.0, 0.0]),
        ]);
        let tied = ranked(vec![
            candidate("a", 0.8, &[1.0, 0.0]),
            candidate("b", 0.8, &[1.0, 0.0]),
        ]);
        let clear = scorer.score(&clear, 2);
        let tied = scorer.score(&tied, 2);
        assert_eq!(clear.breakdown.ambiguity_factor, 1.0);
        assert!((tied.breakdown.ambiguity_factor - 0.75).abs() < 1e-6);
        assert!(tied.value < clear.value);
    }

    #[test]
    fn weak_support_is_penalized() {
        let scorer = ConfidenceScorer::new(ConfidenceConfig {
            min_supporting: 2,
            ..ConfidenceConfig::default()
        });
        let list = ranked(vec![
            candidate("a", 0.9, &[1.0, 0.0]),
            candidate("b", 0.1, &[0.0, 1.0]),
        ]);
        let confidence = scorer.score(&list, 2);
        assert_eq!(confidence.breakdown.supporting, 1);
        assert!((confidence.breakdown.support_factor - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn agreement_is_mean_pairwise_similarity() {
        let list = ranked(vec![
            candidate("a", 0.9, &[1.0, 0.0]),
            candidate("b", 0.8, &[1.0, 0.0]),
            candidate("c", 0.7, &[0.0, 1.0]),
        ]);
        let confidence = ConfidenceScorer::default().score(&list, 3);
        // pairs: ab = 1, ac = 0, bc = 0
        assert!((confidence.breakdown.agreement - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn monotonic_in_top_score() {
        let scorer = ConfidenceScorer::default();
        let mut previous = 0.0;
        for top in [0.4, 0.5, 0.7, 0.9, 1.0] {
            let list = ranked(vec![
                candidate("a", top, &[1.0, 0.0]),
                candidate("b", 0.35, &[0.6, 0.8]),
            ]);
            let value = scorer.score(&list, 5).value;
            assert!(value >= previous, "{value} < {previous} at top={top}");
            previous = value;
        }
    }

    #[test]
    fn contributions_are_shares_of_fused_mass() {
        let list = ranked(vec![
            candidate("a", 0.6, &[1.0, 0.0]),
            candidate("b", 0.2, &[1.0, 0.0]),
        ]);
        let confidence = ConfidenceScorer::default().score(&list, 2);
        let shares: Vec<_> = confidence.contributions.iter().map(|c| c.share).collect();
        assert!((shares[0] - 0.75).abs() < 1e-6);
        assert!((shares[1] - 0.25).abs() < 1e-6);
        assert_eq!(confidence.contributions[1].rank, 2);
    }

    #[test]
    fn deterministic() {
        let list = ranked(vec![
            candidate("a", 0.7, &[0.6, 0.8]),
            candidate("b", 0.6, &[0.8, 0.6]),
        ]);
        let scorer = ConfidenceScorer::default();
        assert_eq!(scorer.score(&list, 5), scorer.score(&list, 5));
    }
}
