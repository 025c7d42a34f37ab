//! Answering many questions concurrently under a fixed limit.

use std::sync::Arc;

use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    embedding::{DenseEncoder, SparseEncoder},
    engine::Engine,
    error::{Error, Result},
    search::Query,
    synthesis::{AnswerResult, LanguageModel},
    vector_store::VectorStore,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Answered { result: AnswerResult },
    Failed { error: String },
}

/// The result for one question, at its input position.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub question: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Answered { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub top_k: usize,
    pub concurrency: usize,
    pub max_questions: usize,
}

/// Split a batch file into questions.
///
/// A JSON array of strings is taken as is; anything else is read one
/// question per line. Blank entries are dropped either way.
pub fn parse_questions(contents: &str) -> Vec<String> {
    let questions = match serde_json::from_str::<Vec<String>>(contents) {
        Ok(list) => list,
        Err(_) => contents.lines().map(str::to_string).collect(),
    };
    questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Answer every question, at most `concurrency` at a time.
///
/// Returns one item per question in input order. A failing question is
/// recorded in its item and never stops the others. Only an oversized batch
/// is rejected as a whole.
pub async fn answer_all<D, S, V, L>(
    engine: Arc<Engine<D, S, V, L>>,
    questions: Vec<String>,
    options: BatchOptions,
) -> Result<Vec<BatchItem>>
where
    D: DenseEncoder + 'static,
    S: SparseEncoder + 'static,
    V: VectorStore + 'static,
    L: LanguageModel + 'static,
{
    if questions.len() > options.max_questions {
        return Err(Error::InvalidQuery(format!(
            "batch has {} questions, the limit is {}",
            questions.len(),
            options.max_questions
        )));
    }

    let total = questions.len();
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, question) in questions.iter().cloned().enumerate() {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        let top_k = options.top_k;
        tasks.spawn(async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => match engine.answer(&Query::new(question, top_k)).await {
                    Ok(result) => BatchOutcome::Answered { result },
                    Err(e) => {
                        tracing::warn!(index, error = %e, "batch question failed");
                        BatchOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                },
                Err(_) => BatchOutcome::Failed {
                    error: "batch was cancelled".into(),
                },
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<BatchOutcome>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => tracing::error!(error = %e, "batch task did not complete"),
        }
    }

    let items: Vec<BatchItem> = questions
        .into_iter()
        .zip(outcomes)
        .enumerate()
        .map(|(index, (question, outcome))| BatchItem {
            index,
            question,
            outcome: outcome.unwrap_or_else(|| BatchOutcome::Failed {
                error: "task did not complete".into(),
            }),
        })
        .collect();

    let succeeded = items.iter().filter(|i| i.is_success()).count();
    tracing::info!(total, succeeded, failed = total - succeeded, "batch complete");
    Ok(items)
}

/// Format batch results for human-readable terminal output.
pub fn format_human(items: &[BatchItem]) {
    for item in items {
        println!("[{}] {}", item.index + 1, item.question);
        match &item.outcome {
            BatchOutcome::Answered { result } => {
                println!(
                    "    ({:.1}% confidence) {}",
                    result.confidence * 100.0,
                    result.answer_text
                );
            }
            BatchOutcome::Failed { error } => println!("    FAILED: {error}"),
        }
    }
    let succeeded = items.iter().filter(|i| i.is_success()).count();
    println!("\n{succeeded}/{} answered", items.len());
}
