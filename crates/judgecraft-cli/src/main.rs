use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use judgecraft_core::config::{AgentConfig, DataConfig, JudgeSettings};
use judgecraft_core::{
	source, FilteredSource, JsonlSink, MultiSink, ResultSink, RunConfig, Runner, StoreSink,
};
use judgecraft_store::Store;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "judgecraft", about = "Run declarative agent evaluations")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	Run(RunArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML run config; flags below override its values
	#[arg(long)]
	config: Option<PathBuf>,

	/// Case file: JSONL (one case per line) or a YAML suite with a `cases:` list
	#[arg(long)]
	data: Option<PathBuf>,

	/// HTTP agent endpoint (POST by default). Sends { "input": <value> } and expects JSON response.
	#[arg(long)]
	http_url: Option<String>,

	/// HTTP method for --http-url (GET or POST)
	#[arg(long)]
	http_method: Option<String>,

	/// OpenAI-compatible base URL for the semantic judge
	#[arg(long)]
	judge_url: Option<String>,

	/// Judge model name
	#[arg(long)]
	judge_model: Option<String>,

	/// Run cases in concurrent batches
	#[arg(long, action = ArgAction::SetTrue)]
	parallel: bool,

	/// Cases per concurrent batch
	#[arg(long)]
	batch_size: Option<usize>,

	/// Retries after a rate-limited call
	#[arg(long)]
	max_retries: Option<u32>,

	/// Only run cases with this name (repeatable)
	#[arg(long = "name")]
	names: Vec<String>,

	/// Only run cases carrying this tag (repeatable)
	#[arg(long = "tag")]
	tags: Vec<String>,

	/// Write results.jsonl and summary.json here
	#[arg(long)]
	out_dir: Option<PathBuf>,

	/// Record the run in this SQLite database
	#[arg(long)]
	db: Option<PathBuf>,

	/// Output the full JSON report to a file
	#[arg(long)]
	json_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_target(false)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await,
	}
}

async fn resolve_config(args: &RunArgs) -> Result<RunConfig> {
	let mut config = match &args.config {
		Some(path) => RunConfig::load(path).await?,
		None => {
			let url = args
				.http_url
				.clone()
				.context("--http-url is required without --config")?;
			let path = args.data.clone().context("--data is required without --config")?;
			RunConfig {
				agent: AgentConfig::Http {
					url,
					method: "POST".to_string(),
					model: None,
				},
				data: DataConfig { path },
				judge: None,
				retry: Default::default(),
				schedule: Default::default(),
				output: Default::default(),
			}
		}
	};

	if let Some(path) = &args.data {
		config.data.path = path.clone();
	}
	let AgentConfig::Http { url, method, .. } = &mut config.agent;
	if let Some(new_url) = &args.http_url {
		*url = new_url.clone();
	}
	if let Some(new_method) = &args.http_method {
		*method = new_method.clone();
	}
	if args.judge_url.is_some() || args.judge_model.is_some() {
		let judge = config.judge.get_or_insert_with(JudgeSettings::default);
		if let Some(base_url) = &args.judge_url {
			judge.base_url = base_url.clone();
		}
		if let Some(model) = &args.judge_model {
			judge.model = model.clone();
		}
	}
	if args.parallel {
		config.schedule.parallel = true;
	}
	if let Some(batch_size) = args.batch_size {
		config.schedule.batch_size = batch_size;
	}
	if let Some(max_retries) = args.max_retries {
		config.retry.max_retries = max_retries;
	}
	if args.out_dir.is_some() {
		config.output.dir = args.out_dir.clone();
	}
	if args.db.is_some() {
		config.output.db = args.db.clone();
	}
	Ok(config)
}

async fn run(args: RunArgs) -> Result<ExitCode> {
	let config = resolve_config(&args).await?;
	let schedule = config.schedule.schedule();

	let mut sinks: Vec<Arc<dyn ResultSink>> = Vec::new();
	if let Some(dir) = &config.output.dir {
		sinks.push(Arc::new(JsonlSink::create(dir).await?));
	}
	if let Some(db) = &config.output.db {
		let store = Store::open(db).with_context(|| format!("Failed to open database {:?}", db))?;
		let metadata = json!({
			"data": config.data.path,
			"names": args.names,
			"tags": args.tags,
		});
		let sink = StoreSink::new(store, Some(metadata))?;
		tracing::info!(run_id = sink.run_id(), db = %db.display(), "recording run");
		sinks.push(Arc::new(sink));
	}

	let mut builder = Runner::builder()
		.agent(Arc::new(config.agent.build()))
		.retry(config.retry.clone())
		.pacing(config.schedule.pacing());
	if let Some(judge) = &config.judge {
		builder = builder.judge(Arc::new(judge.build()));
	}
	match sinks.len() {
		0 => {}
		1 => builder = builder.sink(sinks.remove(0)),
		_ => builder = builder.sink(Arc::new(MultiSink::new(sinks))),
	}
	let runner = builder.build()?;

	let cases = FilteredSource::new(source::from_path(&config.data.path))
		.names(args.names.clone())
		.tags(args.tags.clone());
	let report = runner.run(&cases, schedule).await?;
	println!("{}", report.summary_table());

	if let Some(path) = args.json_out {
		let json = serde_json::to_string_pretty(&report)?;
		tokio::fs::write(&path, json)
			.await
			.with_context(|| format!("Failed to write {:?}", path))?;
	}

	if report.summary.failed > 0 {
		Ok(ExitCode::FAILURE)
	} else {
		Ok(ExitCode::SUCCESS)
	}
}
