//! Oracle consensus CLI
//!
//! Resolves a single question with the configured voters and prints the
//! result as JSON.
//!
//! ```text
//! oracle_consensus "Did the S&P 500 close above 5000 on 2024-02-09?" [context]
//! oracle_consensus --env-example > .env
//! ```

use anyhow::{bail, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::info;

use oracle_consensus::config::{create_env_example, Config};
use oracle_consensus::insurance::RecordingInsurance;
use oracle_consensus::tracing_logger;
use oracle_consensus::typed_errors::{ErrorContext, ErrorExt};
use oracle_consensus::OracleService;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--env-example") {
        print!("{}", create_env_example());
        return Ok(());
    }

    let config = Config::from_env().context("failed to load configuration")?;
    tracing_logger::init_subscriber(&config.log_level);
    config
        .validate()
        .app_err(ErrorContext::new("oracle_consensus", "startup"))?;

    let question = args
        .first()
        .cloned()
        .or_else(|| env::var("RESOLVE_QUESTION").ok())
        .filter(|q| !q.trim().is_empty());
    let Some(question) = question else {
        bail!("usage: oracle_consensus <question> [context] (or set RESOLVE_QUESTION)");
    };
    let context = args
        .get(1)
        .cloned()
        .or_else(|| env::var("RESOLVE_CONTEXT").ok());

    // Single-question runs never reach the insurance backstop
    let (service, _local) = OracleService::from_config(&config, Arc::new(RecordingInsurance::new()));

    info!(
        voters = config.voters.len(),
        required_agreement = config.resolution.required_agreement,
        "Resolving question"
    );

    let response = service.resolve_market(&question, context.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
