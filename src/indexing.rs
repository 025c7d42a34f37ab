use std::{collections::HashSet, sync::Arc};

use serde::Serialize;

use crate::{
    embedding::{DenseEncoder, SparseEncoder},
    error::{Error, Result},
    record::{Record, RecordInput, RejectReason, normalize},
    retry::{self, RetryPolicy, Stage},
    vector_store::VectorStore,
};

/// An input that was not indexed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// 0-based position in the submitted batch.
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub inserted: usize,
    pub rejected: Vec<Rejection>,
}

/// Validates records, embeds them with both encoders, and upserts them.
pub struct Indexer<D, S, V> {
    dense: Arc<D>,
    sparse: Arc<S>,
    store: Arc<V>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<D, S, V> Indexer<D, S, V>
where
    D: DenseEncoder,
    S: SparseEncoder,
    V: VectorStore,
{
    pub fn new(
        dense: Arc<D>,
        sparse: Arc<S>,
        store: Arc<V>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dense,
            sparse,
            store,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Index a batch of inputs.
    ///
    /// Invalid inputs are reported in [`IndexReport::rejected`] and skipped.
    /// Encoder or store failures that survive retries fail the whole call;
    /// chunks written before the failure stay written.
    pub async fn index(&self, inputs: &[RecordInput]) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let mut valid = Vec::with_capacity(inputs.len());

        for (position, input) in inputs.iter().enumerate() {
            match normalize(input) {
                Ok(record) => valid.push(record),
                Err(reason) => {
                    tracing::warn!(position, id = ?input.id, %reason, "rejected record");
                    report.rejected.push(Rejection {
                        position,
                        id: input.id.clone(),
                        reason,
                    });
                }
            }
        }

        let valid = keep_last_by_id(valid);
        for chunk in valid.chunks(self.batch_size) {
            let records = self.embed(chunk).await?;
            retry::run(&self.retry, Stage::Store, || {
                self.store.upsert(records.clone())
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    stage = "upsert",
                    first_id = %chunk[0].id,
                    error = %e,
                    "upsert failed"
                );
            })?;
            report.inserted += records.len();
            tracing::debug!(chunk = records.len(), total = report.inserted, "upserted chunk");
        }

        tracing::info!(
            inserted = report.inserted,
            rejected = report.rejected.len(),
            "indexing complete"
        );
        Ok(report)
    }

    async fn embed(&self, chunk: &[Record]) -> Result<Vec<Record>> {
        let texts: Vec<String> = chunk.iter().map(Record::embedding_text).collect();

        let (dense, sparse) = tokio::try_join!(
            retry::run(&self.retry, Stage::Embedding, || self.dense.encode_batch(&texts)),
            retry::run(&self.retry, Stage::Embedding, || self.sparse.encode_batch(&texts)),
        )
        .inspect_err(|e| {
            tracing::error!(
                stage = "encode",
                first_id = %chunk[0].id,
                error = %e,
                "record encoding failed"
            );
        })?;

        if dense.len() != chunk.len() || sparse.len() != chunk.len() {
            return Err(Error::encoding(
                "indexing",
                format!(
                    "expected {} vectors, got {} dense and {} sparse",
                    chunk.len(),
                    dense.len(),
                    sparse.len()
                ),
            ));
        }

        Ok(chunk
            .iter()
            .cloned()
            .zip(dense.into_iter().zip(sparse))
            .map(|(mut record, (dense, sparse))| {
                record.dense_vector = dense;
                record.sparse_vector = sparse;
                record
            })
            .collect())
    }
}

/// Drop all but the last occurrence of each id, keeping input order.
fn keep_last_by_id(records: Vec<Record>) -> Vec<Record> {
    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let mut kept: Vec<Record> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    kept.reverse();
    if kept.len() < total {
        tracing::debug!(superseded = total - kept.len(), "duplicate ids in batch");
    }
    kept
}

impl<D, S, V> std::fmt::Debug for Indexer<D, S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
