use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::SearchConfig,
    embedding::{DenseEncoder, SparseEncoder},
    error::{Error, Result},
    fusion::{Fusion, ScoredCandidate},
    record::is_iso_date,
    retry::{self, RetryPolicy, Stage},
    vector_store::{HybridQuery, SearchFilter, VectorStore},
};

/// A single retrieval request.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    pub filter: SearchFilter,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            filter: SearchFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    fn validate(&self) -> Result<&str> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(Error::InvalidQuery("query text must not be empty".into()));
        }
        if self.top_k == 0 {
            return Err(Error::InvalidQuery("top_k must be at least 1".into()));
        }
        for (name, bound) in [
            ("date_from", &self.filter.date_from),
            ("date_to", &self.filter.date_to),
        ] {
            if let Some(date) = bound
                && !is_iso_date(date)
            {
                return Err(Error::InvalidQuery(format!(
                    "{name} must be a YYYY-MM-DD date, got {date:?}"
                )));
            }
        }
        if let (Some(from), Some(to)) = (&self.filter.date_from, &self.filter.date_to)
            && from > to
        {
            return Err(Error::InvalidQuery(format!(
                "date range is empty: {from} is after {to}"
            )));
        }
        Ok(text)
    }
}

/// Dense + sparse retrieval over one collection with fused ranking.
pub struct HybridSearcher<D, S, V> {
    dense: Arc<D>,
    sparse: Arc<S>,
    store: Arc<V>,
    fusion: Fusion,
    oversample_factor: usize,
    retry: RetryPolicy,
}

impl<D, S, V> HybridSearcher<D, S, V>
where
    D: DenseEncoder,
    S: SparseEncoder,
    V: VectorStore,
{
    pub fn new(
        dense: Arc<D>,
        sparse: Arc<S>,
        store: Arc<V>,
        fusion: Fusion,
        search: &SearchConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dense,
            sparse,
            store,
            fusion,
            oversample_factor: search.oversample_factor.max(1),
            retry,
        }
    }

    /// Execute the hybrid pipeline.
    ///
    /// 1. Encode the query densely and sparsely, concurrently
    /// 2. One store request for each modality's top `top_k * oversample`
    /// 3. Merge by id and fuse the scores
    /// 4. Rank and cut to `top_k`
    ///
    /// An empty collection, or a filter nothing matches, gives an empty
    /// list. Nothing is written, so dropping the future at any point is
    /// harmless.
    pub async fn search(&self, query: &Query) -> Result<Vec<ScoredCandidate>> {
        let text = query.validate()?;

        let (dense, sparse) = tokio::try_join!(
            retry::run(&self.retry, Stage::Embedding, || self.dense.encode(text)),
            retry::run(&self.retry, Stage::Embedding, || self.sparse.encode(text)),
        )
        .inspect_err(|e| {
            tracing::error!(stage = "encode", query = text, error = %e, "query encoding failed");
        })?;

        let hybrid = HybridQuery {
            dense,
            sparse,
            limit: query.top_k.saturating_mul(self.oversample_factor),
            filter: query.filter.clone(),
        };
        let hits = retry::run(&self.retry, Stage::Store, || {
            self.store.hybrid_query(hybrid.clone())
        })
        .await
        .inspect_err(|e| {
            tracing::error!(stage = "store", query = text, error = %e, "hybrid query failed");
        })?;

        tracing::debug!(
            dense_hits = hits.dense.len(),
            sparse_hits = hits.sparse.len(),
            "retrieved"
        );

        let candidates = self.fusion.merge(hits, query.top_k);
        tracing::info!(
            query = text,
            results = candidates.len(),
            top = candidates.first().map(|c| c.fused_score),
            "search complete"
        );
        Ok(candidates)
    }
}

impl<D, S, V> std::fmt::Debug for HybridSearcher<D, S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearcher")
            .field("fusion", &self.fusion)
            .field("oversample_factor", &self.oversample_factor)
            .finish_non_exhaustive()
    }
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[ScoredCandidate]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!(
            "{:>3}. [{:.3}] {} (dense {:.3}, sparse {:.3})",
            r.rank, r.fused_score, r.record.id, r.dense_score, r.sparse_score
        );
        println!("     Q: {}", r.record.question);
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [ScoredCandidate],
}

/// Format results as JSON output.
pub fn format_json(results: &[ScoredCandidate], query: &str) -> Result<()> {
    let output = SearchOutput {
        query,
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        record::{Record, RecordInput, normalize},
        testing::{FakeDense, FakeSparse, FlakyStore, temp_store},
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        dense: Arc<FakeDense>,
        sparse: Arc<FakeSparse>,
        store: Arc<FlakyStore>,
        searcher: HybridSearcher<FakeDense, FakeSparse, FlakyStore>,
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn fixture() -> Fixture {
        let (tmp, db) = temp_store();
        let dense = Arc::new(FakeDense::default());
        let sparse = Arc::new(FakeSparse::default());
        let store = Arc::new(FlakyStore::new(db));
        let searcher = HybridSearcher::new(
            Arc::clone(&dense),
            Arc::clone(&sparse),
            Arc::clone(&store),
            Fusion::default(),
            &SearchConfig::default(),
            policy(),
        );
        Fixture {
            _tmp: tmp,
            dense,
            sparse,
            store,
            searcher,
        }
    }

    async fn seed(f: &Fixture, rows: &[(&str, &str, &str)]) {
        let mut records = Vec::new();
        for (id, question, answer) in rows {
            let mut record: Record =
                normalize(&RecordInput::new(question, answer).with_id(id)).unwrap();
            let text = record.embedding_text();
            record.dense_vector = f.dense.encode(&text).await.unwrap();
            record.sparse_vector = f.sparse.encode(&text).await.unwrap();
            records.push(record);
        }
        f.store.inner.put_all(&records).unwrap();
    }

    const CORPUS: &[(&str, &str, &str)] = &[
        ("enc", "Do you encrypt customer data at rest?", "Yes, AES-256 encryption at rest."),
        ("sso", "Do you support single sign-on?", "Yes, SAML and OIDC."),
        ("dr", "Describe your disaster recovery plan.", "Daily backups replicated to a second region."),
        ("sla", "What is your uptime SLA?", "99.9% monthly uptime."),
    ];

    #[tokio::test]
    async fn rejects_invalid_queries() {
        let f = fixture();
        let err = f.searcher.search(&Query::new("   ", 5)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        let err = f.searcher.search(&Query::new("encryption", 0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert_eq!(f.dense.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_malformed_date_bounds() {
        let f = fixture();
        seed(&f, CORPUS).await;
        for filter in [
            SearchFilter {
                date_from: Some("2024-1-5".into()),
                ..SearchFilter::default()
            },
            SearchFilter {
                date_to: Some("yesterday".into()),
                ..SearchFilter::default()
            },
            SearchFilter {
                date_from: Some("2024-13-01".into()),
                ..SearchFilter::default()
            },
        ] {
            let query = Query::new("encrypt", 5).with_filter(filter);
            let err = f.searcher.search(&query).await.unwrap_err();
            assert!(matches!(err, Error::InvalidQuery(_)), "{err}");
        }
        assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_inverted_date_range() {
        let f = fixture();
        let query = Query::new("encrypt", 5).with_filter(SearchFilter {
            date_from: Some("2024-06-01".into()),
            date_to: Some("2024-01-01".into()),
            ..SearchFilter::default()
        });
        let err = f.searcher.search(&query).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));

        let single_day = Query::new("encrypt", 5).with_filter(SearchFilter {
            date_from: Some("2024-01-01".into()),
            date_to: Some("2024-01-01".into()),
            ..SearchFilter::default()
        });
        assert!(f.searcher.search(&single_day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_collection_returns_empty() {
        let f = fixture();
        let results = f.searcher.search(&Query::new("encryption", 5)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn relevant_record_ranks_first() {
        let f = fixture();
        seed(&f, CORPUS).await;

        let results = f
            .searcher
            .search(&Query::new("Is customer data encrypted at rest?", 3))
            .await
            .unwrap();
        assert_eq!(results[0].record.id, "enc");
        assert!(results.len() <= 3);
        let ranks: Vec<_> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=results.len()).collect::<Vec<_>>());
        assert!(!results[0].record.dense_vector.is_empty());
    }

    #[tokio::test]
    async fn results_are_deterministic() {
        let f = fixture();
        seed(&f, CORPUS).await;
        let query = Query::new("backup and recovery", 4);

        let a = f.searcher.search(&query).await.unwrap();
        let b = f.searcher.search(&query).await.unwrap();
        let key = |r: &[ScoredCandidate]| {
            r.iter()
                .map(|c| (c.record.id.clone(), c.fused_score.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&a), key(&b));
    }

    #[tokio::test]
    async fn filter_restricts_results() {
        let f = fixture();
        let mut record = normalize(&RecordInput {
            answer_type: Some("security".into()),
            ..RecordInput::new("Do you encrypt backups?", "Yes.").with_id("sec")
        })
        .unwrap();
        record.dense_vector = f.dense.vector(&record.embedding_text());
        record.sparse_vector = f.sparse.encode(&record.embedding_text()).await.unwrap();
        f.store.inner.put_all(&[record]).unwrap();
        seed(&f, CORPUS).await;

        let query = Query::new("encrypt", 5).with_filter(SearchFilter {
            answer_type: Some("security".into()),
            ..SearchFilter::default()
        });
        let results = f.searcher.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, "sec");
    }

    #[tokio::test]
    async fn encoder_failure_aborts_after_retries() {
        let f = fixture();
        seed(&f, CORPUS).await;
        f.sparse.fail.store(true, Ordering::SeqCst);
        let before = f.sparse.calls.load(Ordering::SeqCst);

        let err = f.searcher.search(&Query::new("uptime", 3)).await.unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
        assert_eq!(f.sparse.calls.load(Ordering::SeqCst) - before, 2);
    }

    #[tokio::test]
    async fn store_failure_is_store_unavailable() {
        let f = fixture();
        f.store.fail.store(true, Ordering::SeqCst);
        let err = f.searcher.search(&Query::new("uptime", 3)).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(f.store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn json_output_omits_vectors() {
        let candidate = ScoredCandidate {
            record: Record {
                id: "a".into(),
                question: "q".into(),
                answer: "a".into(),
                dense_vector: crate::embedding::DenseVector::normalized(vec![1.0]),
                ..Record::default()
            },
            dense_score: 0.5,
            sparse_score: 0.0,
            fused_score: 0.3,
            rank: 1,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["record"]["id"], "a");
        assert!(json["record"].get("dense_vector").is_none());
    }
}
