//! Grounded answer generation from fused search results.

use std::{future::Future, sync::Arc};

use serde::Serialize;

use crate::{
    confidence::{Confidence, ConfidenceBreakdown, ConfidenceScorer, Contribution},
    error::{Error, Result},
    fusion::ScoredCandidate,
    retry::{self, RetryPolicy, Stage},
    search::Query,
};

pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";

pub const DEGRADED_ANSWER: &str =
    "An answer could not be generated. The retrieved sources are listed below.";

pub const SYSTEM_PROMPT: &str = "You are an expert assistant for answering \
RFP (Request for Proposal) questions. Answer using only the information in the \
provided context. Be accurate, concise and professional. If the context does \
not fully answer the question, say which parts are not covered instead of \
guessing.";

/// A generative model that turns a prompt into text.
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    NoRelevantInformation,
    /// Sources were found but the model call failed.
    Degraded { reason: String },
}

/// The outcome of one question.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    pub question: String,
    pub answer_text: String,
    pub confidence: f32,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub contributions: Vec<Contribution>,
    pub sources: Vec<ScoredCandidate>,
    pub raw_context: String,
    pub status: AnswerStatus,
}

impl AnswerResult {
    fn no_relevant_information(question: &str) -> Self {
        Self {
            question: question.to_string(),
            answer_text: NO_RELEVANT_INFORMATION.to_string(),
            confidence: 0.0,
            confidence_breakdown: ConfidenceBreakdown::default(),
            contributions: Vec::new(),
            sources: Vec::new(),
            raw_context: String::new(),
            status: AnswerStatus::NoRelevantInformation,
        }
    }
}

/// Render candidates, in rank order, as the context block given to the
/// model.
///
/// Whole records are added while they fit in `max_chars`; the first
/// record that does not fit ends the block. The top-ranked record is always
/// included even if it alone exceeds the budget.
pub fn build_context(candidates: &[ScoredCandidate], max_chars: usize) -> (String, usize) {
    let mut context = String::new();
    let mut used = 0;
    let mut included = 0;

    for (i, candidate) in candidates.iter().enumerate() {
        let separator = if i == 0 { "" } else { "\n\n" };
        let block = format_source(i + 1, candidate);
        let cost = separator.chars().count() + block.chars().count();
        if i > 0 && used + cost > max_chars {
            break;
        }
        context.push_str(separator);
        context.push_str(&block);
        used += cost;
        included += 1;
    }

    (context, included)
}

fn format_source(n: usize, candidate: &ScoredCandidate) -> String {
    let record = &candidate.record;
    let mut block = format!(
        "Source {n}:\nQuestion: {}\nAnswer: {}",
        record.question, record.answer
    );
    if let Some(summary) = &record.summary {
        block.push_str("\nSummary: ");
        block.push_str(summary);
    }
    block.push_str(&format!(
        "\nRelevance Score: {:.3}",
        candidate.fused_score
    ));
    block
}

pub fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Context from previous RFP answers:\n\n{context}\n\n\
         Question: {question}\n\n\
         Write a complete answer to the question based on the context."
    )
}

pub struct Synthesizer<L> {
    llm: Arc<L>,
    scorer: ConfidenceScorer,
    max_context_chars: usize,
    retry: RetryPolicy,
}

impl<L: LanguageModel> Synthesizer<L> {
    pub fn new(
        llm: Arc<L>,
        scorer: ConfidenceScorer,
        max_context_chars: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            scorer,
            max_context_chars,
            retry,
        }
    }

    pub fn language_model(&self) -> &L {
        &self.llm
    }

    /// Build an answer for `query` from its ranked candidates.
    ///
    /// Never fails: no candidates means no model call, and a model that
    /// keeps failing yields a degraded result that still lists the sources.
    pub async fn synthesize(
        &self,
        query: &Query,
        candidates: Vec<ScoredCandidate>,
    ) -> AnswerResult {
        let question = query.text.trim();
        if candidates.is_empty() {
            tracing::info!(query = question, "no candidates, skipping synthesis");
            return AnswerResult::no_relevant_information(question);
        }

        let Confidence {
            value,
            breakdown,
            contributions,
        } = self.scorer.score(&candidates, query.top_k);
        let (context, included) = build_context(&candidates, self.max_context_chars);
        if included < candidates.len() {
            tracing::debug!(
                included,
                dropped = candidates.len() - included,
                "context budget reached"
            );
        }
        let prompt = user_prompt(question, &context);

        let reply = retry::run(&self.retry, Stage::Llm, || async {
            let text = self.llm.complete(SYSTEM_PROMPT, &prompt).await?;
            let text = text.trim();
            if text.is_empty() {
                Err(Error::Synthesis("model returned an empty answer".into()))
            } else {
                Ok(text.to_string())
            }
        })
        .await;

        match reply {
            Ok(answer_text) => {
                tracing::info!(
                    query = question,
                    model = self.llm.model_id(),
                    confidence = value,
                    sources = candidates.len(),
                    "answer generated"
                );
                AnswerResult {
                    question: question.to_string(),
                    answer_text,
                    confidence: value,
                    confidence_breakdown: breakdown,
                    contributions,
                    sources: candidates,
                    raw_context: context,
                    status: AnswerStatus::Answered,
                }
            }
            Err(e) => {
                tracing::warn!(
                    query = question,
                    stage = "synthesis",
                    error = %e,
                    "answer synthesis degraded"
                );
                AnswerResult {
                    question: question.to_string(),
                    answer_text: DEGRADED_ANSWER.to_string(),
                    confidence: 0.0,
                    confidence_breakdown: breakdown,
                    contributions,
                    sources: candidates,
                    raw_context: context,
                    status: AnswerStatus::Degraded {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }
}

impl<L> std::fmt::Debug for Synthesizer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("max_context_chars", &self.max_context_chars)
            .finish_non_exhaustive()
    }
}

/// Format an answer for human-readable terminal output.
pub fn format_human(result: &AnswerResult) {
    println!("{}", result.answer_text);
    println!();
    match &result.status {
        AnswerStatus::Answered => {}
        AnswerStatus::NoRelevantInformation => return,
        AnswerStatus::Degraded { reason } => println!("(degraded: {reason})"),
    }
    println!("Confidence: {:.1}%", result.confidence * 100.0);
    println!("Sources:");
    for s in &result.sources {
        println!(
            "{:>3}. [{:.3}] {}: {}",
            s.rank, s.fused_score, s.record.id, s.record.question
        );
    }
}
