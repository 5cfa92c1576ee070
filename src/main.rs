use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use housing_datahub::llm::LlmClient;
use housing_datahub::{Assistant, QueryRouter, Settings, SqlPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "housing-datahub")]
#[command(about = "Answer questions about Hong Kong housing data with safe, read-only SQL")]
struct Args {
    /// Path to the SQLite store (or set DATABASE_PATH)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question in natural language
    Ask {
        question: String,
        /// Skip routing and answer from data only
        #[arg(long)]
        sql_only: bool,
    },
    /// Print the live schema summary
    Schema,
    /// Validate SQL without running it
    Check { sql: String },
    /// Validate, execute and format SQL
    Run { sql: String },
    /// Show the query plan and table sizes for SQL
    Stats { sql: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings = Settings::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    if let Some(database) = args.database {
        settings.database_path = database;
    }
    info!("Using store at {}", settings.database_path.display());

    let llm = Arc::new(LlmClient::from_settings(&settings)?);
    let pipeline = SqlPipeline::new(llm.clone(), &settings)
        .with_context(|| format!("failed to open {}", settings.database_path.display()))?;

    match args.command {
        Command::Ask { question, sql_only } => {
            info!("Answering with model {}", llm.model());
            let answer = if sql_only {
                pipeline.answer(&question, &[]).await
            } else {
                let router = QueryRouter::new(llm.clone(), settings.intent_timeout());
                Assistant::new(router, Arc::new(pipeline)).answer(&question, &[]).await
            };
            println!("{}", answer);
        }
        Command::Schema => {
            println!("{}", pipeline.schema_validator().snapshot().summary());
        }
        Command::Check { sql } => {
            let result = pipeline.sql_validator().validate_query(&sql);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Run { sql } => match pipeline.run_sql(&sql).await {
            Ok(formatted) => println!("{}", formatted.display_text),
            Err(e) => println!("{}", housing_datahub::pipeline::render_failure(&e)),
        },
        Command::Stats { sql } => {
            let stats = pipeline.executor().query_stats(&sql)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
