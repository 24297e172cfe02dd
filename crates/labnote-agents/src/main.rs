use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use coordination::find_unit_block;
use labnote_agents::config::{parse_roster, LabnoteConfig};
use labnote_agents::model_port::check_endpoint;
use labnote_agents::retrieval::ContextRetriever;
use labnote_agents::telemetry::append_report;
use labnote_agents::{NullRetriever, OpenAiCompatClient, RevisionLoop, SopRetriever};
use tracing::{info, warn};

/// Populate lab-note unit-operation sections with a draft/judge/revise loop.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Draft, judge, and revise one section until accepted
    Populate(PopulateArgs),
    /// Probe the inference endpoint and list the models it serves
    Check,
}

#[derive(Args, Debug)]
struct PopulateArgs {
    /// Experiment goal
    #[arg(long)]
    query: String,

    /// Section to write (e.g. Method, Reagent, Equipment)
    #[arg(long)]
    section: String,

    /// Markdown file holding the unit-operation block or a whole workflow
    #[arg(long, conflicts_with = "block", required_unless_present = "block")]
    file: Option<PathBuf>,

    /// Unit-operation block passed inline
    #[arg(long)]
    block: Option<String>,

    /// Unit id to select from a whole workflow document (e.g. UHW100)
    #[arg(long)]
    unit: Option<String>,

    /// Override the draft roster (comma separated)
    #[arg(long)]
    models: Option<String>,

    /// Override the judge model
    #[arg(long)]
    judge: Option<String>,

    /// Override the cycle budget
    #[arg(long)]
    max_cycles: Option<u32>,

    /// Print `{uo_id, section, options}` as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print the loop report to stderr
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Append the loop report to this JSONL file
    #[arg(long)]
    report_log: Option<PathBuf>,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = LabnoteConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Populate(args) => populate(config, args).await,
        Command::Check => check(&config).await,
    }
}

async fn populate(mut config: LabnoteConfig, args: PopulateArgs) -> Result<()> {
    if let Some(models) = args.models.as_deref() {
        config.draft_models = parse_roster(models);
    }
    if let Some(judge) = args.judge {
        config.judge_model = judge;
    }
    if let Some(max_cycles) = args.max_cycles {
        config.max_cycles = max_cycles;
    }

    let source = match (&args.file, &args.block) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(block)) => block.clone(),
        (None, None) => bail!("either --file or --block is required"),
    };
    let block = match args.unit.as_deref() {
        Some(unit) => find_unit_block(&source, unit)?.to_string(),
        None => source,
    };

    let port = Arc::new(OpenAiCompatClient::new(&config.endpoint)?);
    let retriever: Arc<dyn ContextRetriever> = match &config.sop_dir {
        Some(dir) => Arc::new(SopRetriever::new(dir)),
        None => Arc::new(NullRetriever),
    };
    retriever.init().await.context("failed to initialise SOP retriever")?;

    info!(
        endpoint = %config.endpoint.base_url,
        drafters = %config.draft_models.join(","),
        judge = %config.judge_model,
        "lab-note loop starting"
    );

    let controller = RevisionLoop::from_config(&config, port, retriever.clone())?;
    let outcome = controller.run_loop(&args.query, &block, &args.section).await;
    retriever.close().await;
    let response = outcome?;

    if args.json {
        let body = serde_json::json!({
            "uo_id": response.uo_id,
            "section": response.section,
            "options": response.options,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("[{}] {}", response.uo_id, response.section);
        for option in &response.options {
            println!("\n{option}");
        }
    }

    if args.report {
        eprintln!("{}", serde_json::to_string_pretty(&response.report)?);
    }
    if let Some(path) = args.report_log.as_deref() {
        append_report(&response.report, path);
    }
    Ok(())
}

async fn check(config: &LabnoteConfig) -> Result<()> {
    let base = &config.endpoint.base_url;
    if !check_endpoint(base, &config.endpoint.api_key).await {
        bail!("inference endpoint {base} is not reachable");
    }
    info!(endpoint = %base, "endpoint reachable");

    let client = OpenAiCompatClient::new(&config.endpoint)?;
    let served = match client.list_models().await {
        Ok(models) => models,
        Err(e) => {
            warn!(error = %e, "could not list served models");
            return Ok(());
        }
    };

    let wanted = config
        .draft_models
        .iter()
        .map(|m| (m.as_str(), "drafter"))
        .chain(std::iter::once((config.judge_model.as_str(), "judge")));
    for (model, role) in wanted {
        if served.iter().any(|s| s == model) {
            println!("ok       {role:<8} {model}");
        } else {
            println!("missing  {role:<8} {model}");
        }
    }
    Ok(())
}
