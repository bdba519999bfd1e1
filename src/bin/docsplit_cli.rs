use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use docsplit::{
    config::Config,
    logging,
    processing::{
        AggregationRequest, AnalysisResponse, ChunkBoundary, ChunkingConfig, ChunkingOverrides,
        ChunkingService, CleanupRequest, StrategySelection, TokenAnalysis, aggregate_results,
        cleanup_chunks, plan_document,
    },
    storage::{BlobLocation, FsBlobStore},
};
use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docsplit-cli",
    about = "Offline PDF chunking: inspect, split, aggregate and clean up"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report token profile, strategy decision and planned chunks without writing anything.
    Analyze {
        /// A PDF file or a directory searched recursively for `*.pdf`.
        #[arg(long)]
        input: PathBuf,
        /// JSON file with chunking overrides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Split a PDF into chunk files under `output_dir/<bucket>/`.
    Split {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value = "local")]
        bucket: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Aggregate a JSON AggregationRequest.
    Aggregate {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run a JSON CleanupRequest against a filesystem store rooted at `root`.
    Cleanup {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_cli_tracing();
    match cli.command {
        Command::Analyze { input, config } => analyze(&input, config.as_deref()),
        Command::Split {
            input,
            document_id,
            output_dir,
            bucket,
            config,
        } => split(&input, &document_id, &output_dir, &bucket, config.as_deref()),
        Command::Aggregate { input } => aggregate(&input),
        Command::Cleanup { root, input } => cleanup(&root, &input),
    }
}

/// Planning summary for one file.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileReport {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_analysis: Option<TokenAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<StrategySelection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    boundaries: Vec<ChunkBoundary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

fn analyze(input: &Path, config_path: Option<&Path>) -> Result<()> {
    let env = load_config()?;
    let config = ChunkingConfig::merge(
        &ChunkingConfig::default(),
        &env.chunking_env,
        &read_overrides(config_path)?,
    );
    config.validate()?;
    let files = collect_pdfs(input)?;
    if files.is_empty() {
        bail!("no PDF files found under {}", input.display());
    }

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let bytes =
            fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
        let report = match plan_document(&bytes, &config) {
            Ok(plan) => FileReport {
                file: file.display().to_string(),
                token_analysis: Some(TokenAnalysis::summary(&plan.profile)),
                decision: Some(plan.selection),
                boundaries: plan.boundaries,
                error: None,
            },
            Err(err) => FileReport {
                file: file.display().to_string(),
                token_analysis: None,
                decision: None,
                boundaries: Vec::new(),
                error: Some(serde_json::to_value(err.to_payload())?),
            },
        };
        reports.push(report);
    }
    print_json(&reports)
}

fn split(
    input: &Path,
    document_id: &str,
    output_dir: &Path,
    bucket: &str,
    config_path: Option<&Path>,
) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let overrides = read_overrides(config_path)?;
    let key = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("input has no file name: {}", input.display()))?;
    let source = BlobLocation::new(bucket, key);
    let config = load_config()?;
    let service = ChunkingService::from_config(&config, Arc::new(FsBlobStore::new(output_dir)));

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let response = runtime
        .block_on(service.analyze_bytes(document_id, &source, bytes, &overrides))
        .unwrap_or_else(|err| AnalysisResponse::failed(Some(document_id.to_string()), &err));
    print_json(&response)?;
    if let Some(error) = response.error() {
        bail!("{}: {}", error.kind, error.message);
    }
    Ok(())
}

fn aggregate(input: &Path) -> Result<()> {
    let request: AggregationRequest = read_json(input)?;
    let document_id = request
        .document_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("Missing required field: documentId"))?;
    let result = aggregate_results(&document_id, &request.chunk_results);
    print_json(&result)
}

fn cleanup(root: &Path, input: &Path) -> Result<()> {
    let request: CleanupRequest = read_json(input)?;
    let store = FsBlobStore::new(root);
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let response = runtime.block_on(cleanup_chunks(&store, request));
    print_json(&response)
}

fn load_config() -> Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_env().context("invalid docsplit environment")
}

fn read_overrides(path: Option<&Path>) -> Result<ChunkingOverrides> {
    let Some(path) = path else {
        return Ok(ChunkingOverrides::default());
    };
    let value: Value = read_json(path)?;
    Ok(ChunkingOverrides::from_json(value)?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn collect_pdfs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", input.display()))?;
        let is_pdf = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if entry.file_type().is_file() && is_pdf {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
