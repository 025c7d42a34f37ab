use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::vector_store::SearchFilter;

#[derive(Debug, Parser)]
#[command(
    name = "rfpbert",
    about = "Hybrid dense + sparse retrieval and answering over RFP answer banks"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON config file (defaults to <data-dir>/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use this collection instead of the configured one
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate and index question/answer records from a JSON file
    Index(IndexArgs),
    /// Retrieve and rank records without generating an answer
    Search(SearchArgs),
    /// Answer a question from the indexed records
    Ask(AskArgs),
    /// Answer many questions from a file concurrently
    Batch(BatchArgs),
    /// Show collection and model status
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// JSON file: {"documents": [...]} or a bare array of records
    pub file: PathBuf,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search / Ask --

#[derive(Debug, Args)]
pub struct FilterArgs {
    /// Only records with this answer type
    #[arg(long)]
    pub answer_type: Option<String>,

    /// Only records dated on or after this day (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Only records dated on or before this day (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> SearchFilter {
        SearchFilter {
            answer_type: self.answer_type.clone(),
            date_from: self.since.clone(),
            date_to: self.until.clone(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (defaults to search.top_k)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question to answer
    pub query: String,

    /// Number of records to use as context (defaults to search.top_k)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Output the answer as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Batch --

#[derive(Debug, Parser)]
pub struct BatchArgs {
    /// One question per line, or a JSON array of strings
    pub file: PathBuf,

    /// Questions answered at once (defaults to batch.concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Number of records to use as context per question
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "rfpbert",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_with_filters() {
        let cli = Cli::parse_from([
            "rfpbert",
            "search",
            "encryption at rest",
            "-n",
            "3",
            "--answer-type",
            "security",
            "--since",
            "2024-01-01",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "encryption at rest");
                assert_eq!(args.count, Some(3));
                let filter = args.filter.to_filter();
                assert_eq!(filter.answer_type.as_deref(), Some("security"));
                assert_eq!(filter.date_from.as_deref(), Some("2024-01-01"));
                assert_eq!(filter.date_to, None);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_ask_defaults() {
        let cli = Cli::parse_from(["rfpbert", "ask", "Do you support SSO?"]);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.count, None);
                assert!(!args.json);
                assert!(args.filter.to_filter().is_empty());
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "rfpbert",
            "status",
            "--collection",
            "vendor_a",
            "-vv",
        ]);
        assert_eq!(cli.collection.as_deref(), Some("vendor_a"));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["rfpbert", "-q", "-v", "status"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
