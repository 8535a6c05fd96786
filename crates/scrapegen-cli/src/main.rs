//! scrapegen CLI - generate and repair web scrapers
//!
//! Usage:
//!   scrapegen init                         Write default configuration
//!   scrapegen index <docs>                 Embed documentation into the vector index
//!   scrapegen generate <inputs.json>       Generate a working scraper
//!   scrapegen check <file>                 Syntax-check a program
//!   scrapegen run <file>                   Run a program in the sandbox
//!   scrapegen validate <data> --schema <s> Validate output data against a schema

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scrapegen_core::{GenerationInputs, OutputSchema, ScrapegenConfig};
use scrapegen_llm::{AnthropicClient, Embedder, OpenAiEmbedder};
use scrapegen_orchestrator::{save_code, save_state, ControllerConfig, RepairController};
use scrapegen_retrieval::{
    load_documents, DocumentationCorpus, InMemoryVectorIndex, QdrantIndex, VectorIndex,
};
use scrapegen_sandbox::{CodeExecutor, PythonSyntaxChecker, SandboxExecutor, SyntaxChecker};
use scrapegen_validation::SchemaValidator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "py", "html"];

#[derive(Parser)]
#[command(name = "scrapegen")]
#[command(author, version, about = "Generate web scrapers and repair them until they work")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project directory holding .scrapegen/
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to .scrapegen/config.toml
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Embed a documentation directory into a Qdrant collection
    Index {
        /// Directory of documentation files
        docs: PathBuf,

        /// Qdrant URL
        #[arg(long, default_value = "http://localhost:6333")]
        qdrant: String,

        /// Split files into chunks of at most this many characters
        #[arg(long, default_value = "2000")]
        chunk_chars: usize,
    },

    /// Generate a scraper from a JSON inputs file
    Generate {
        /// Task, schema and page context (JSON)
        inputs: PathBuf,

        /// Index this documentation directory in memory before generating
        #[arg(long, conflicts_with = "qdrant")]
        docs: Option<PathBuf>,

        /// Search an existing Qdrant collection instead
        #[arg(long)]
        qdrant: Option<String>,

        /// Directory the program is written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// File name of the program (".py" appended when missing)
        #[arg(long)]
        name: Option<String>,

        /// Also write the final run state here
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Syntax-check a Python program
    Check {
        file: PathBuf,
    },

    /// Run a program in the sandbox and print its output
    Run {
        file: PathBuf,

        /// Timeout in seconds (defaults to the configured value)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Validate output data against a schema
    Validate {
        /// Data file (JSON)
        data: PathBuf,

        /// Schema file (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Report fields the schema does not declare
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let project = cli.project;
    match cli.command {
        Commands::Init { force } => cmd_init(&project, force),
        Commands::Index {
            docs,
            qdrant,
            chunk_chars,
        } => cmd_index(&project, docs, qdrant, chunk_chars).await,
        Commands::Generate {
            inputs,
            docs,
            qdrant,
            out,
            name,
            state,
        } => cmd_generate(&project, inputs, docs, qdrant, out, name, state).await,
        Commands::Check { file } => cmd_check(&project, file).await,
        Commands::Run { file, timeout } => cmd_run(&project, file, timeout).await,
        Commands::Validate {
            data,
            schema,
            strict,
        } => cmd_validate(data, schema, strict).await,
    }
}

fn load_config(project: &Path) -> Result<ScrapegenConfig> {
    let config = ScrapegenConfig::load_or_default(project)
        .with_context(|| format!("Failed to load configuration from {}", project.display()))?;
    config.check().context("Invalid configuration")?;
    Ok(config)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn cmd_init(project: &Path, force: bool) -> Result<()> {
    let config_path = project.join(".scrapegen").join("config.toml");
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let written = ScrapegenConfig::write_default(project)
        .with_context(|| format!("Failed to write configuration in {}", project.display()))?;

    println!("Initialized scrapegen in {}", project.display());
    println!("Created:");
    println!("  {}", written.display());
    Ok(())
}

async fn cmd_index(project: &Path, docs: PathBuf, qdrant: String, chunk_chars: usize) -> Result<()> {
    let config = load_config(project)?;
    let documents = load_documents(&docs, DOC_EXTENSIONS, Some(chunk_chars))
        .with_context(|| format!("Failed to load documentation from {}", docs.display()))?;
    if documents.is_empty() {
        bail!("No documentation files found in {}", docs.display());
    }

    let embedder = OpenAiEmbedder::from_config(&config.embedding);
    let index = qdrant_index(&qdrant);
    let corpus = DocumentationCorpus::new(config.retrieval.collection.clone(), documents);
    let count = corpus
        .build(&embedder, &index)
        .await
        .context("Failed to index documentation")?;

    println!(
        "Indexed {} chunks into collection '{}' at {}",
        count, config.retrieval.collection, qdrant
    );
    Ok(())
}

fn qdrant_index(url: &str) -> QdrantIndex {
    let index = QdrantIndex::new(url);
    match std::env::var("QDRANT_API_KEY") {
        Ok(key) if !key.trim().is_empty() => index.with_api_key(key),
        _ => index,
    }
}

async fn cmd_generate(
    project: &Path,
    inputs: PathBuf,
    docs: Option<PathBuf>,
    qdrant: Option<String>,
    out: PathBuf,
    name: Option<String>,
    state_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(project)?;
    let inputs: GenerationInputs = read_json(&inputs).await?;

    let generator = Arc::new(AnthropicClient::from_config(&config.llm));
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::from_config(&config.embedding));

    let index: Arc<dyn VectorIndex> = match (&qdrant, &docs) {
        (Some(url), _) => Arc::new(qdrant_index(url)),
        (None, Some(dir)) => {
            let memory = Arc::new(InMemoryVectorIndex::new());
            let documents = load_documents(dir, DOC_EXTENSIONS, Some(2000))
                .with_context(|| format!("Failed to load documentation from {}", dir.display()))?;
            let corpus = DocumentationCorpus::new(config.retrieval.collection.clone(), documents);
            corpus
                .build(embedder.as_ref(), memory.as_ref())
                .await
                .context("Failed to index documentation")?;
            memory
        }
        (None, None) => {
            warn!("No documentation source given; generating without retrieval context");
            Arc::new(InMemoryVectorIndex::new())
        }
    };

    let executor = Arc::new(SandboxExecutor::from_config(&config.sandbox, project));
    let controller = RepairController::new(
        generator,
        embedder,
        index,
        executor,
        Arc::new(PythonSyntaxChecker::from_config(&config.sandbox)),
        ControllerConfig::from_config(&config),
    );

    let mut state = inputs.into_state(config.llm.max_html_chars);
    let outcome = controller.run(&mut state).await;

    if let Some(path) = &state_path {
        save_state(path, &state)
            .await
            .with_context(|| format!("Failed to save run state to {}", path.display()))?;
    }

    outcome.context("Scraper generation failed")?;

    let path = save_code(&out, name.as_deref(), &state.generated_code)
        .await
        .context("Failed to save generated program")?;
    println!(
        "Working scraper after {} iteration(s): {}",
        state.iteration,
        path.display()
    );
    Ok(())
}

async fn cmd_check(project: &Path, file: PathBuf) -> Result<()> {
    let config = load_config(project)?;
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let issues = PythonSyntaxChecker::from_config(&config.sandbox)
        .check(&code)
        .await?;
    if issues.is_empty() {
        println!("{}: ok", file.display());
        return Ok(());
    }
    for issue in &issues {
        println!("{}: {}", file.display(), issue);
    }
    bail!("{} syntax issue(s) in {}", issues.len(), file.display())
}

async fn cmd_run(project: &Path, file: PathBuf, timeout: Option<u64>) -> Result<()> {
    let config = load_config(project)?;
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.sandbox.timeout());

    let executor = SandboxExecutor::from_config(&config.sandbox, project);
    let outcome = executor.run(&code, timeout).await?;
    info!("Run finished in {}ms", outcome.duration_ms);

    if !outcome.is_success() {
        println!("{}", outcome.failure_message());
        bail!("Program failed");
    }

    print!("{}", outcome.combined_output);
    if let Some(data) = executor.load_output(&outcome).await? {
        println!("\nOutput data:\n{}", serde_json::to_string_pretty(&data)?);
    }
    if let Err(e) = executor.discard_run(&outcome.workdir).await {
        warn!("Could not remove {}: {}", outcome.workdir.display(), e);
    }
    Ok(())
}

async fn cmd_validate(data: PathBuf, schema: PathBuf, strict: bool) -> Result<()> {
    let data: serde_json::Value = read_json(&data).await?;
    let schema: OutputSchema = read_json(&schema).await?;

    let validator = if strict {
        SchemaValidator::new().deny_unknown_fields()
    } else {
        SchemaValidator::new()
    };
    let report = validator.validate(&data, &schema);
    if report.is_ok() {
        println!("Valid");
        return Ok(());
    }
    for violation in &report.violations {
        println!("- {}", violation);
    }
    bail!("{} schema violation(s)", report.violations.len())
}
