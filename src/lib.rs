//! rfpbert - hybrid dense + sparse retrieval and grounded answering over RFP
//! question/answer records.
//!
//! Records are indexed with two vectors each: a dense semantic embedding
//! (an OpenAI-compatible embeddings API, or a local
//! [ColBERT](https://github.com/stanford-futuredata/ColBERT) model
//! mean-pooled to one vector) and a sparse lexical vector built with
//! [Tantivy](https://github.com/quickwit-oss/tantivy)'s English analyzer.
//! Queries are run against both, the two ranked lists are fused into one,
//! and a language model writes an answer from the top results together with
//! a confidence score.
//!
//! # Quick start
//!
//! ```no_run
//! use rfpbert::{Config, DataDir, RecordInput, engine, search::Query};
//!
//! # async fn run() -> rfpbert::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config = Config::load(Some(&data_dir.config_file()))?;
//! config.validate()?;
//! let engine = engine::open(&config, &data_dir)?;
//!
//! engine
//!     .index(&[RecordInput::new(
//!         "Do you encrypt customer data at rest?",
//!         "Yes. All data is encrypted with AES-256.",
//!     )])
//!     .await?;
//!
//! let result = engine.answer(&Query::new("Is data encrypted?", 5)).await?;
//! println!("{} ({:.0}%)", result.answer_text, result.confidence * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cli;
pub mod confidence;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod indexing;
pub mod model_manager;
pub mod openai;
pub mod record;
pub mod retry;
pub mod search;
pub mod sparse;
pub mod synthesis;
pub mod vector_db;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use data_dir::DataDir;
pub use engine::Engine;
pub use error::{Error, Result};
pub use record::{Record, RecordInput};
pub use vector_db::VectorDb;
