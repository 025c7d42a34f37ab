//! The assembled retrieval-and-answer engine.
//!
//! One [`Engine`] is built at startup and shared (typically behind an
//! `Arc`) by every request. It holds no per-request state.

use std::{future::Future, sync::Arc};

use crate::{
    confidence::ConfidenceScorer,
    config::{Config, DenseProvider},
    data_dir::DataDir,
    embedding::{DenseEncoder, DenseVector, SparseEncoder},
    error::Result,
    fusion::{Fusion, ScoredCandidate},
    indexing::{IndexReport, Indexer},
    model_manager::ColbertEncoder,
    openai::{OpenAiChat, OpenAiClient, OpenAiEmbedder},
    record::RecordInput,
    retry::RetryPolicy,
    search::{HybridSearcher, Query},
    sparse::LexicalEncoder,
    synthesis::{AnswerResult, LanguageModel, Synthesizer},
    vector_db::VectorDb,
    vector_store::VectorStore,
};

pub struct Engine<D, S, V, L> {
    searcher: HybridSearcher<D, S, V>,
    indexer: Indexer<D, S, V>,
    synthesizer: Synthesizer<L>,
    store: Arc<V>,
    default_top_k: usize,
}

impl<D, S, V, L> Engine<D, S, V, L>
where
    D: DenseEncoder,
    S: SparseEncoder,
    V: VectorStore,
    L: LanguageModel,
{
    /// Wire the components together. `config` is expected to be validated.
    pub fn new(dense: D, sparse: S, store: V, llm: L, config: &Config) -> Self {
        let dense = Arc::new(dense);
        let sparse = Arc::new(sparse);
        let store = Arc::new(store);
        let retry = RetryPolicy::from_config(&config.retry, &config.timeouts);

        Self {
            searcher: HybridSearcher::new(
                Arc::clone(&dense),
                Arc::clone(&sparse),
                Arc::clone(&store),
                Fusion::from_config(&config.fusion, &config.search),
                &config.search,
                retry.clone(),
            ),
            indexer: Indexer::new(
                dense,
                sparse,
                Arc::clone(&store),
                config.indexing.batch_size,
                retry.clone(),
            ),
            synthesizer: Synthesizer::new(
                Arc::new(llm),
                ConfidenceScorer::new(config.confidence.clone()),
                config.llm.max_context_chars,
                retry,
            ),
            store,
            default_top_k: config.search.top_k,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub async fn index(&self, inputs: &[RecordInput]) -> Result<IndexReport> {
        self.indexer.index(inputs).await
    }

    pub async fn search(&self, query: &Query) -> Result<Vec<ScoredCandidate>> {
        self.searcher.search(query).await
    }

    /// Search, then synthesize an answer from the results.
    ///
    /// Retrieval failures are returned as errors. Synthesis never fails; a
    /// model failure shows up as a degraded [`AnswerResult`].
    pub async fn answer(&self, query: &Query) -> Result<AnswerResult> {
        let candidates = self.searcher.search(query).await?;
        Ok(self.synthesizer.synthesize(query, candidates).await)
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.count().await
    }
}

impl<D, S, V, L> std::fmt::Debug for Engine<D, S, V, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("searcher", &self.searcher)
            .field("indexer", &self.indexer)
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}

/// The dense encoder selected by `dense.provider`.
#[derive(Debug, Clone)]
pub enum DenseBackend {
    OpenAi(OpenAiEmbedder),
    Colbert(ColbertEncoder),
}

impl DenseBackend {
    pub fn from_config(config: &Config, client: &OpenAiClient) -> Self {
        match config.dense.provider {
            DenseProvider::OpenAi => Self::OpenAi(OpenAiEmbedder::new(
                client.clone(),
                &config.dense.model,
                config.dense.dimensions,
            )),
            DenseProvider::Colbert => {
                Self::Colbert(ColbertEncoder::new(config.dense.colbert_model.clone()))
            }
        }
    }
}

impl DenseEncoder for DenseBackend {
    fn model_id(&self) -> &str {
        match self {
            Self::OpenAi(e) => e.model_id(),
            Self::Colbert(e) => e.model_id(),
        }
    }

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<DenseVector>>> + Send {
        async move {
            match self {
                Self::OpenAi(e) => e.encode_batch(texts).await,
                Self::Colbert(e) => e.encode_batch(texts).await,
            }
        }
    }
}

/// The engine as the binary runs it.
pub type RfpEngine = Engine<DenseBackend, LexicalEncoder, VectorDb, OpenAiChat>;

/// Open the configured collection under `data_dir` and build the engine.
pub fn open(config: &Config, data_dir: &DataDir) -> Result<RfpEngine> {
    let client = OpenAiClient::new(
        &config.openai.base_url,
        config.openai.api_key.as_deref().unwrap_or_default(),
    );
    let dense = DenseBackend::from_config(config, &client);
    let store = VectorDb::open(&data_dir.collection_db(&config.store.collection))?;
    let llm = OpenAiChat::new(
        client,
        &config.llm.model,
        config.llm.temperature,
        config.llm.max_tokens,
    );

    tracing::debug!(
        collection = %config.store.collection,
        dense = dense.model_id(),
        llm = llm.model_id(),
        "engine ready"
    );
    Ok(Engine::new(dense, LexicalEncoder::new(), store, llm, config))
}
