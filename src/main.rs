use std::sync::Arc;

use clap::Parser;
use rfpbert::{
    batch::{self, BatchOptions},
    cli::{AskArgs, BatchArgs, Cli, Command, IndexArgs, SearchArgs, StatusArgs},
    config::{Config, DenseProvider},
    data_dir::DataDir,
    engine::{self, RfpEngine},
    error::{self, Error},
    record,
    search::{self, Query},
    sparse::LEXICAL_MODEL_ID,
    synthesis,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RFPBERT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = load_config(&cli, &data_dir)?;
    let engine = engine::open(&config, &data_dir)?;

    match cli.command {
        Command::Index(args) => cmd_index(&engine, &args).await?,
        Command::Search(args) => cmd_search(&engine, &args).await?,
        Command::Ask(args) => {
            config.require_api_key()?;
            cmd_ask(&engine, &args).await?;
        }
        Command::Batch(args) => {
            config.require_api_key()?;
            cmd_batch(engine, &config, &args).await?;
        }
        Command::Status(args) => {
            cmd_status(&engine, &config, &data_dir, &args).await?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Defaults, then the config file, then the environment, then flags.
fn load_config(cli: &Cli, data_dir: &DataDir) -> error::Result<Config> {
    let path = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(Error::NotFound {
                kind: "config file",
                name: path.display().to_string(),
            });
        }
        Some(path) => path.clone(),
        None => data_dir.config_file(),
    };

    let mut config = Config::load(Some(&path))?;
    if let Some(collection) = &cli.collection {
        config.store.collection = collection.clone();
    }
    if let Command::Batch(args) = &cli.command
        && let Some(concurrency) = args.concurrency
    {
        config.batch.concurrency = concurrency;
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_index(engine: &RfpEngine, args: &IndexArgs) -> error::Result<()> {
    let inputs = record::load_documents(&args.file)?;
    tracing::info!(file = %args.file.display(), records = inputs.len(), "indexing");
    let report = engine.index(&inputs).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Indexed {} record(s)", report.inserted);
    if !report.rejected.is_empty() {
        println!("Rejected {} record(s):", report.rejected.len());
        for r in &report.rejected {
            let id = r.id.as_deref().unwrap_or("-");
            println!("  #{} (id {id}): {}", r.position, r.reason);
        }
    }
    Ok(())
}

async fn cmd_search(engine: &RfpEngine, args: &SearchArgs) -> error::Result<()> {
    let query = Query::new(
        args.query.clone(),
        args.count.unwrap_or(engine.default_top_k()),
    )
    .with_filter(args.filter.to_filter());
    let results = engine.search(&query).await?;

    if args.json {
        search::format_json(&results, &args.query)?;
    } else {
        search::format_human(&results);
    }
    Ok(())
}

async fn cmd_ask(engine: &RfpEngine, args: &AskArgs) -> error::Result<()> {
    let query = Query::new(
        args.query.clone(),
        args.count.unwrap_or(engine.default_top_k()),
    )
    .with_filter(args.filter.to_filter());
    let result = engine.answer(&query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        synthesis::format_human(&result);
    }
    Ok(())
}

async fn cmd_batch(
    engine: RfpEngine,
    config: &Config,
    args: &BatchArgs,
) -> error::Result<()> {
    let contents = std::fs::read_to_string(&args.file)?;
    let questions = batch::parse_questions(&contents);
    let options = BatchOptions {
        top_k: args.count.unwrap_or(engine.default_top_k()),
        concurrency: config.batch.concurrency,
        max_questions: config.batch.max_questions,
    };
    tracing::info!(
        questions = questions.len(),
        concurrency = options.concurrency,
        "starting batch"
    );

    let items = batch::answer_all(Arc::new(engine), questions, options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        batch::format_human(&items);
    }
    Ok(())
}

#[derive(Serialize)]
struct Status<'a> {
    data_dir: String,
    collection: &'a str,
    collection_file: String,
    records: u64,
    dense_provider: DenseProvider,
    dense_model: &'a str,
    sparse_model: &'a str,
    llm_model: &'a str,
}

async fn cmd_status(
    engine: &RfpEngine,
    config: &Config,
    data_dir: &DataDir,
    args: &StatusArgs,
) -> error::Result<()> {
    let dense_model = match config.dense.provider {
        DenseProvider::OpenAi => config.dense.model.as_str(),
        DenseProvider::Colbert => config.dense.colbert_model.as_str(),
    };
    let status = Status {
        data_dir: data_dir.root().display().to_string(),
        collection: &config.store.collection,
        collection_file: data_dir
            .collection_db(&config.store.collection)
            .display()
            .to_string(),
        records: engine.count().await?,
        dense_provider: config.dense.provider,
        dense_model,
        sparse_model: LEXICAL_MODEL_ID,
        llm_model: &config.llm.model,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Data directory: {}", status.data_dir);
    println!("Collection:     {} ({})", status.collection, status.collection_file);
    println!("Records:        {}", status.records);
    println!("Dense model:    {dense_model}");
    println!("Sparse model:   {}", status.sparse_model);
    println!("LLM model:      {}", status.llm_model);
    Ok(())
}
