use std::{future::Future, path::Path, sync::Arc};

use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};

use crate::{
    embedding::{DenseVector, SparseVector},
    error::{Error, Result},
    record::Record,
    vector_store::{Hit, HybridHits, HybridQuery, VectorStore, rank_hits},
};

const PAYLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("payloads");
const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const DENSE_DIMENSION_KEY: &str = "dense_dimension";

/// Header size: 4 bytes dense dimension + 4 bytes sparse entry count.
const HEADER_SIZE: usize = 8;

/// A record collection persisted in a single redb file.
///
/// Payloads are stored as JSON keyed by record id. Vectors live in a
/// separate table, one entry per record:
/// - 4 bytes: dense dimension D (u32 LE)
/// - 4 bytes: sparse entry count S (u32 LE)
/// - D * 4 bytes: dense f32 values
/// - S * 4 bytes: sparse u32 indices
/// - S * 4 bytes: sparse f32 values
///
/// Every record in a collection has the same dense dimension, recorded in
/// the meta table on first write.
#[derive(Clone)]
pub struct VectorDb {
    db: Arc<Database>,
}

impl VectorDb {
    /// Open or create a collection at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use rfpbert::VectorDb;
    ///
    /// let db = VectorDb::open(&tmp.path().join("rfp.redb")).unwrap();
    /// assert_eq!(db.len().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(PAYLOADS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Dense dimension fixed by the first write, if any.
    pub fn dense_dimension(&self) -> Result<Option<usize>> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        Ok(meta.get(DENSE_DIMENSION_KEY)?.map(|v| v.value() as usize))
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PAYLOADS)?;
        Ok(table.len()?)
    }

    /// Write `records` in a single transaction, replacing existing ids.
    pub fn put_all(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            let stored = meta.get(DENSE_DIMENSION_KEY)?.map(|v| v.value() as usize);
            let dimension = check_dimension(stored, records)?;
            if stored.is_none() {
                meta.insert(DENSE_DIMENSION_KEY, dimension as u64)?;
            }

            let mut payloads = txn.open_table(PAYLOADS)?;
            let mut vectors = txn.open_table(VECTORS)?;
            for record in records {
                let payload = serde_json::to_vec(record)?;
                payloads.insert(record.id.as_str(), payload.as_slice())?;

                let encoded = encode_vectors(&record.dense_vector, &record.sparse_vector);
                vectors.insert(record.id.as_str(), encoded.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Load a record with its vectors.
    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        let txn = self.db.begin_read()?;
        let payloads = txn.open_table(PAYLOADS)?;
        let vectors = txn.open_table(VECTORS)?;

        let Some(payload) = payloads.get(id)? else {
            return Ok(None);
        };
        let mut record: Record = serde_json::from_slice(payload.value())?;
        if let Some(bytes) = vectors.get(id)? {
            let (dense, sparse) = decode_vectors(bytes.value()).ok_or_else(|| corrupt(id))?;
            record.dense_vector = dense;
            record.sparse_vector = sparse;
        }
        Ok(Some(record))
    }

    /// Score every matching record against both query vectors and return
    /// each modality's top `limit`.
    ///
    /// Records sharing no terms with the query are left out of the sparse
    /// list.
    pub fn search(&self, query: &HybridQuery) -> Result<HybridHits> {
        if let Some(stored) = self.dense_dimension()?
            && !query.dense.is_empty()
            && query.dense.dimension() != stored
        {
            return Err(Error::Config(format!(
                "query vector has dimension {} but the collection stores {stored}",
                query.dense.dimension()
            )));
        }

        let records = self.load_matching(query)?;
        tracing::debug!(candidates = records.len(), "scoring collection");

        let scored: Vec<(f32, f32)> = records
            .par_iter()
            .map(|r| {
                (
                    r.dense_vector.similarity(&query.dense),
                    r.sparse_vector.dot(&query.sparse),
                )
            })
            .collect();

        let mut dense = Vec::with_capacity(records.len());
        let mut sparse = Vec::new();
        for (record, (dense_score, sparse_score)) in records.into_iter().zip(scored) {
            if sparse_score > 0.0 {
                sparse.push(Hit {
                    record: record.clone(),
                    score: sparse_score,
                });
            }
            dense.push(Hit {
                record,
                score: dense_score,
            });
        }

        Ok(HybridHits {
            dense: rank_hits(dense, query.limit),
            sparse: rank_hits(sparse, query.limit),
        })
    }

    fn load_matching(&self, query: &HybridQuery) -> Result<Vec<Record>> {
        let txn = self.db.begin_read()?;
        let payloads = txn.open_table(PAYLOADS)?;
        let vectors = txn.open_table(VECTORS)?;

        let mut records = Vec::new();
        for entry in payloads.iter()? {
            let (key, payload) = entry?;
            let mut record: Record = serde_json::from_slice(payload.value())?;
            if !query.filter.matches(&record) {
                continue;
            }
            let Some(bytes) = vectors.get(key.value())? else {
                tracing::warn!(id = %record.id, "record has no vectors, skipping");
                continue;
            };
            let (dense, sparse) =
                decode_vectors(bytes.value()).ok_or_else(|| corrupt(&record.id))?;
            record.dense_vector = dense;
            record.sparse_vector = sparse;
            records.push(record);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDb").finish_non_exhaustive()
    }
}

impl VectorStore for VectorDb {
    fn upsert(&self, records: Vec<Record>) -> impl Future<Output = Result<()>> + Send {
        let db = self.clone();
        async move { blocking(move || db.put_all(&records)).await }
    }

    fn hybrid_query(
        &self,
        query: HybridQuery,
    ) -> impl Future<Output = Result<HybridHits>> + Send {
        let db = self.clone();
        async move { blocking(move || db.search(&query)).await }
    }

    fn count(&self) -> impl Future<Output = Result<u64>> + Send {
        let db = self.clone();
        async move { blocking(move || db.len()).await }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("store task failed: {e}")))?
}

fn corrupt(id: &str) -> Error {
    Error::StoreUnavailable(format!("corrupt vector entry for record '{id}'"))
}

/// All records in a write must agree with each other and with the dimension
/// already stored.
fn check_dimension(stored: Option<usize>, records: &[Record]) -> Result<usize> {
    let mut dimension = stored;
    for record in records {
        let d = record.dense_vector.dimension();
        if d == 0 {
            return Err(Error::Config(format!(
                "record '{}' has no dense vector",
                record.id
            )));
        }
        match dimension {
            Some(expected) if expected != d => {
                return Err(Error::Config(format!(
                    "record '{}' has dense dimension {d} but the collection stores {expected}",
                    record.id
                )));
            }
            _ => dimension = Some(d),
        }
    }
    dimension.ok_or_else(|| Error::Config("no records to write".into()))
}

fn encode_vectors(dense: &DenseVector, sparse: &SparseVector) -> Vec<u8> {
    let d = dense.as_slice();
    let mut out = Vec::with_capacity(
        HEADER_SIZE + std::mem::size_of_val(d) + sparse.len() * 8,
    );
    out.extend_from_slice(&(d.len() as u32).to_le_bytes());
    out.extend_from_slice(&(sparse.len() as u32).to_le_bytes());
    out.extend_from_slice(bytemuck::cast_slice(d));
    out.extend_from_slice(bytemuck::cast_slice(sparse.indices()));
    out.extend_from_slice(bytemuck::cast_slice(sparse.values()));
    out
}

fn decode_vectors(bytes: &[u8]) -> Option<(DenseVector, SparseVector)> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let dense_len = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
    let sparse_len = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;

    let dense_end = HEADER_SIZE + dense_len * 4;
    let indices_end = dense_end + sparse_len * 4;
    if bytes.len() != indices_end + sparse_len * 4 {
        return None;
    }

    // Stored values carry no alignment guarantee, so copy rather than cast.
    let dense: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..dense_end]);
    let indices: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes[dense_end..indices_end]);
    let values: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[indices_end..]);

    Some((
        DenseVector::from_raw(dense),
        SparseVector::from_parts(indices, values)?,
    ))
}
