//! Dry-run UI test assets against recorded accessibility snapshots.
//!
//! # Usage
//!
//! ```bash
//! # Print the normalized element tree of a snapshot
//! stagehand tree login.json
//!
//! # Try a selector
//! stagehand query login.json 'button[label^=Log]'
//! stagehand query login.json "Log In" --using label
//!
//! # Run a test asset, serving snapshots in order (the last one repeats)
//! stagehand run ./assets smoke --snapshot login.json --snapshot home.json
//!
//! # Machine-readable journal
//! stagehand --format json run ./assets smoke --snapshot login.json
//! ```

mod fixture;
mod resolver;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use stagehand_core::action::Action;
use stagehand_core::asset::{AssetKind, AssetReference};
use stagehand_core::config::EngineConfig;
use stagehand_core::context::ExecutionContext;
use stagehand_core::element::Element;
use stagehand_core::interpreter::ActionInterpreter;
use stagehand_core::journal::{ActionRecord, Journal, Verdict};
use stagehand_core::run_state::RunControl;
use stagehand_core::selector::{select, QueryOutcome};
use stagehand_core::tree::{ElementTree, TreeOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::fixture::{read_snapshot, FixtureDriver};
use crate::resolver::DirectoryResolver;

/// Dry-run UI test assets against recorded snapshots.
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Inspect snapshots and dry-run UI test assets")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Engine config file (defaults to ~/.stagehand/config.json)
    #[arg(short, long, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Print the normalized element tree of a snapshot
    Tree {
        /// Snapshot JSON file
        snapshot: PathBuf,
    },

    /// Run a selector against a snapshot
    Query {
        /// Snapshot JSON file
        snapshot: PathBuf,
        /// Selector text
        selector: String,
        /// How to interpret the selector: selector, name, label, id or value
        #[arg(short, long, default_value = "selector")]
        using: String,
    },

    /// Run a test asset against a fixture driver
    Run {
        /// Asset directory
        assets: PathBuf,
        /// Name of the test asset
        test: String,
        /// Snapshot files served in order; the last one repeats
        #[arg(short, long = "snapshot", required = true)]
        snapshots: Vec<PathBuf>,
        /// Module the test belongs to
        #[arg(short, long)]
        module: Option<String>,
        /// Override the retry bound
        #[arg(short, long)]
        retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

/// Logs go to stderr, or to `log_file` when given. The guard must outlive `main`.
fn init_tracing(log_file: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "stagehand.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[derive(Debug)]
enum CliError {
    TestFailed(String),
    Usage(String),
    Runtime(String),
    Io(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::TestFailed(_) => ExitCode::from(1),
            CliError::Usage(_) => ExitCode::from(2),
            CliError::Runtime(_) => ExitCode::from(3),
            CliError::Io(_) => ExitCode::from(4),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::TestFailed(msg) => write!(f, "Test failed: {}", msg),
            CliError::Usage(msg) => write!(f, "Invalid input: {}", msg),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl From<fixture::FixtureError> for CliError {
    fn from(e: fixture::FixtureError) -> Self {
        match e {
            fixture::FixtureError::Io(..) => CliError::Io(e.to_string()),
            fixture::FixtureError::Parse(..) => CliError::Usage(e.to_string()),
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Tree { ref snapshot } => {
            let tree = load_tree(snapshot, &config)?;
            print_tree(&tree, cli.format)
        }
        Command::Query {
            ref snapshot,
            ref selector,
            ref using,
        } => {
            let tree = load_tree(snapshot, &config)?;
            match select(&tree, using, selector) {
                QueryOutcome::Found(found) => {
                    print_elements(&found, cli.format, |_| 0)?;
                    Ok(())
                }
                QueryOutcome::Empty => {
                    if cli.format == OutputFormat::Json {
                        println!("[]");
                    } else {
                        println!("no matches");
                    }
                    Ok(())
                }
                QueryOutcome::Invalid(e) => Err(CliError::Usage(e.to_string())),
            }
        }
        Command::Run {
            ref assets,
            ref test,
            ref snapshots,
            ref module,
            retries,
        } => {
            let mut config = config;
            if let Some(retries) = retries {
                config.retries = retries;
            }
            run_test(assets, test, snapshots, module.clone(), config, cli.format).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => EngineConfig::load_from(path).map_err(|e| CliError::Usage(format!("{}: {}", path.display(), e))),
        None => Ok(EngineConfig::load()),
    }
}

fn load_tree(path: &Path, config: &EngineConfig) -> Result<ElementTree, CliError> {
    let snapshot = read_snapshot(path)?;
    let options = TreeOptions::from_config(config).map_err(|e| CliError::Usage(e.to_string()))?;
    Ok(ElementTree::build(&snapshot, &options, 1))
}

fn print_tree(tree: &ElementTree, format: OutputFormat) -> Result<(), CliError> {
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for element in tree.iter() {
        let depth = element
            .parent
            .as_ref()
            .and_then(|p| depths.get(p.id.as_str()))
            .map_or(0, |d| d + 1);
        depths.insert(element.id.as_str(), depth);
    }
    let elements: Vec<Element> = tree.searchable().cloned().collect();
    print_elements(&elements, format, |e| depths.get(e.id.as_str()).copied().unwrap_or(0))
}

fn print_elements(
    elements: &[Element],
    format: OutputFormat,
    depth: impl Fn(&Element) -> usize,
) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(elements).map_err(|e| CliError::Runtime(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }
    for element in elements {
        println!("{}{}", "  ".repeat(depth(element)), format_element(element));
    }
    Ok(())
}

fn format_element(element: &Element) -> String {
    let mut line = element.id.clone();
    if let Some(ref name) = element.name {
        line.push_str(&format!(" [{}]", name));
    }
    if let Some(ref label) = element.label {
        line.push_str(&format!(" \"{}\"", label));
    }
    if let Some(ref value) = element.value {
        line.push_str(&format!(" = {}", value));
    }
    if !element.visible {
        line.push_str(" (hidden)");
    }
    if !element.enabled {
        line.push_str(" (disabled)");
    }
    line
}

async fn run_test(
    assets: &Path,
    test: &str,
    snapshots: &[PathBuf],
    module: Option<String>,
    config: EngineConfig,
    format: OutputFormat,
) -> Result<(), CliError> {
    if !assets.is_dir() {
        return Err(CliError::Io(format!("{} is not a directory", assets.display())));
    }
    let driver = Arc::new(FixtureDriver::from_files(snapshots)?);
    let run = RunControl::new();

    let stopper = run.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping run");
            stopper.stop();
        }
    });

    let journal = Journal::new();
    let mut records = journal.subscribe();
    let printer = tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match records.recv().await {
                Ok(record) => print_record(&record, format),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "journal output fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut ctx = ExecutionContext::new(driver, config, run)
        .map_err(|e| CliError::Usage(e.to_string()))?
        .with_journal(journal);
    let interpreter = ActionInterpreter::new(Arc::new(DirectoryResolver::new(assets)));

    let mut reference = AssetReference::new(AssetKind::Test, test);
    reference.module = module;
    info!(test = %reference, "running");
    let outcome = interpreter.execute(&Action::Execute { reference }, &mut ctx).await;

    drop(ctx);
    printer.await.map_err(|e| CliError::Runtime(e.to_string()))?;

    if format == OutputFormat::Text {
        let status = if outcome.interrupted {
            "INTERRUPTED"
        } else if outcome.passed {
            "PASSED"
        } else {
            "FAILED"
        };
        println!("{} {}", status, test);
    }

    if outcome.passed {
        Ok(())
    } else {
        Err(CliError::TestFailed(outcome.message))
    }
}

fn print_record(record: &ActionRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "could not encode journal record"),
        },
        OutputFormat::Text => {
            let mark = match record.verdict {
                Verdict::Passed => "ok",
                Verdict::Failed => "FAIL",
                Verdict::Interrupted => "STOP",
            };
            println!(
                "{}{:<4} {} {} ({}ms)",
                "  ".repeat(record.depth),
                mark,
                record.verb,
                record.target,
                record.duration_ms
            );
            if record.verdict == Verdict::Failed && record.depth == 0 {
                println!("     {}", record.message);
            }
        }
    }
}
