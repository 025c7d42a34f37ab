//! In-crate fakes for encoders, the language model and the store.

use std::{
    future::Future,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use crate::{
    embedding::{DenseEncoder, DenseVector, SparseEncoder, SparseVector},
    error::{Error, Result},
    record::Record,
    sparse::{LexicalEncoder, term_index},
    synthesis::LanguageModel,
    vector_db::VectorDb,
    vector_store::{HybridHits, HybridQuery, VectorStore},
};

pub const FAKE_DIMENSION: usize = 32;

/// Dense encoder that buckets analyzed terms into a small vector, so texts
/// sharing words land close together.
#[derive(Debug, Default)]
pub struct FakeDense {
    lexical: LexicalEncoder,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeDense {
    pub fn vector(&self, text: &str) -> DenseVector {
        let mut values = vec![0.0f32; FAKE_DIMENSION];
        for term in self.lexical.terms(text) {
            values[term_index(&term) as usize % FAKE_DIMENSION] += 1.0;
        }
        // keep every vector non-zero
        values[0] += 0.01;
        DenseVector::normalized(values)
    }
}

impl DenseEncoder for FakeDense {
    fn model_id(&self) -> &str {
        "fake-dense"
    }

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<DenseVector>>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(Error::encoding("fake-dense", "injected failure"))
        } else {
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        };
        std::future::ready(result)
    }
}

/// Sparse encoder wrapping the real lexical encoder with failure injection.
#[derive(Debug, Default)]
pub struct FakeSparse {
    lexical: LexicalEncoder,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl SparseEncoder for FakeSparse {
    fn model_id(&self) -> &str {
        "fake-sparse"
    }

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<SparseVector>>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(Error::encoding("fake-sparse", "injected failure"))
        } else {
            Ok(texts.iter().map(|t| self.lexical.encode_text(t)).collect())
        };
        std::future::ready(result)
    }
}

/// Language model with a canned reply.
#[derive(Debug)]
pub struct FakeLlm {
    pub reply: Mutex<String>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub last_prompt: Mutex<Option<String>>,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self::replying("Yes. All customer data is encrypted at rest.")
    }
}

impl FakeLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Mutex::new(reply.to_string()),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for FakeLlm {
    fn model_id(&self) -> &str {
        "fake-llm"
    }

    fn complete(
        &self,
        _system: &str,
        user: &str,
    ) -> impl Future<Output = Result<String>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(user.to_string());
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(Error::Synthesis("injected failure".into()))
        } else {
            Ok(self.reply.lock().unwrap().clone())
        };
        std::future::ready(result)
    }
}

/// Store wrapper that can be switched to fail every call.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    pub inner: VectorDb,
    pub fail: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: VectorDb) -> Self {
        Self {
            inner,
            fail: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl VectorStore for FlakyStore {
    fn upsert(&self, records: Vec<Record>) -> impl Future<Output = Result<()>> + Send {
        let checked = self.check();
        let inner = self.inner.clone();
        async move {
            checked?;
            inner.upsert(records).await
        }
    }

    fn hybrid_query(
        &self,
        query: HybridQuery,
    ) -> impl Future<Output = Result<HybridHits>> + Send {
        let checked = self.check();
        let inner = self.inner.clone();
        async move {
            checked?;
            inner.hybrid_query(query).await
        }
    }

    fn count(&self) -> impl Future<Output = Result<u64>> + Send {
        let checked = self.check();
        let inner = self.inner.clone();
        async move {
            checked?;
            inner.count().await
        }
    }
}

pub fn temp_store() -> (tempfile::TempDir, VectorDb) {
    let tmp = tempfile::tempdir().unwrap();
    let db = VectorDb::open(&tmp.path().join("test.redb")).unwrap();
    (tmp, db)
}
