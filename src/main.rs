use clap::{Parser, Subcommand, ValueEnum};
use shlit::cancel::{self, CancelToken};
use shlit::config::{self, ExecRoot};
use shlit::discovery::Discovery;
use shlit::report;
use shlit::runner::{self, RunContext, RunOptions};
use shlit::scheduler;
use shlit::summary::Summary;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "shlit")]
#[command(about = "A lit-style shell test runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover and run tests
    Run {
        /// Suite directory or single test file
        path: PathBuf,
        /// Number of tests run at once (default: one per CPU)
        #[arg(short = 'j', long)]
        workers: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Only run tests whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,
        /// Show every test and the commands it ran
        #[arg(short, long)]
        verbose: bool,
        /// Per-test timeout in seconds (overrides suite config)
        #[arg(long)]
        timeout: Option<u64>,
        /// Use the first failing stage's exit code for every pipeline
        #[arg(long)]
        pipefail: bool,
        /// Keep the scratch directory of failing tests
        #[arg(long)]
        keep_on_failure: bool,
        /// Directory for scratch directories (overrides suite config).
        /// Use "local" for .shlit/<timestamp>/, or specify a path.
        #[arg(long)]
        exec_root: Option<String>,
    },
    /// Parse every test without running it
    Validate {
        /// Suite directory or single test file
        path: PathBuf,
    },
    /// Scaffold a new suite
    Init {
        /// Directory for the new suite
        #[arg(default_value = "tests")]
        path: PathBuf,
    },
    /// Output the JSON schema of lit.yaml / lit.toml
    Schema,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SHLIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            path,
            workers,
            output,
            filter,
            verbose,
            timeout,
            pipefail,
            keep_on_failure,
            exec_root,
        } => {
            if verbose && let Some(ref f) = filter {
                eprintln!("Filtering tests by: {f:?}");
            }
            if timeout == Some(0) {
                eprintln!("Error: --timeout must be at least 1 second");
                process::exit(2);
            }

            let discovery = match Discovery::open(&path) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("Error loading suite config: {e}");
                    process::exit(1);
                }
            };

            let mut options = RunOptions {
                timeout: timeout.map(Duration::from_secs),
                pipefail,
                keep_on_failure,
                exec_root: exec_root.map(ExecRoot::from),
                filter,
                ..RunOptions::default()
            };
            if let Some(workers) = workers {
                options.workers = workers.max(1);
            }

            let cancel = CancelToken::new();
            if let Err(e) = cancel::install_interrupt_handler(&cancel) {
                warn!(error = %e, "cannot install the interrupt handler");
            }
            let ctx = RunContext::new(options, cancel.clone());
            let summary = Summary::new();

            let human = matches!(output, OutputFormat::Human);
            scheduler::run_suite(discovery, &ctx, &summary, &|result| {
                if human {
                    println!("{}", report::result_line(result));
                }
            });

            let snapshot = summary.snapshot();
            match output {
                OutputFormat::Human => print!("{}", report::human(&snapshot, verbose)),
                OutputFormat::Json => match report::json(&snapshot) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Error serializing results: {e}");
                        process::exit(1);
                    }
                },
                OutputFormat::Junit => print!("{}", report::junit(&snapshot, &suite_name(&path))),
            }

            if snapshot.total == 0 {
                eprintln!("No tests found at: {}", path.display());
                process::exit(1);
            }
            if cancel.is_cancelled() {
                process::exit(130);
            }
            if snapshot.has_failures() {
                process::exit(1);
            }
        }
        Command::Validate { path } => {
            let discovery = match Discovery::open(&path) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("Error loading suite config: {e}");
                    process::exit(1);
                }
            };

            let mut total = 0;
            let mut errors = 0;
            for item in discovery {
                total += 1;
                let test = match item {
                    Ok(test) => test,
                    Err(e) => {
                        eprintln!("✗ {e}");
                        errors += 1;
                        continue;
                    }
                };
                match runner::validate_test(&test) {
                    Ok(runs) => println!("✓ {} ({runs} RUN lines)", test.name),
                    Err(e) => {
                        eprintln!("✗ {}: {e}", test.name);
                        errors += 1;
                    }
                }
            }

            if total == 0 {
                eprintln!("No tests found at: {}", path.display());
                process::exit(1);
            }
            if errors > 0 {
                eprintln!("\n{errors} test(s) failed validation");
                process::exit(1);
            }
            println!("\nAll {total} test(s) valid");
        }
        Command::Init { path } => {
            if let Err(e) = init(&path) {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = config::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

fn suite_name(path: &Path) -> String {
    let dir = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    config::resolve_root(dir)
        .map(|c| c.name)
        .unwrap_or_else(|_| "tests".to_string())
}

const CONFIG_TEMPLATE: &str = r#"# Suite configuration. Subdirectories may add their own lit.yaml.
name: example
suffixes: [txt]

# substitutions:
#   "%greeting": "hello"
# env:
#   LC_ALL: C
# timeout: 60
# exec_root: local
"#;

const TEST_TEMPLATE: &str = r#"# RUN: echo hello world > %t
# RUN: cat %t | grep hello
# CHECK: hello {{w.*d}}
"#;

/// Write a starter `lit.yaml` and one example test into `dir`.
fn init(dir: &Path) -> Result<(), String> {
    let config_path = dir.join("lit.yaml");
    if config_path.exists() {
        return Err(format!("file already exists: {}", config_path.display()));
    }
    fs::create_dir_all(dir).map_err(|e| format!("creating {}: {e}", dir.display()))?;
    fs::write(&config_path, CONFIG_TEMPLATE)
        .map_err(|e| format!("writing {}: {e}", config_path.display()))?;
    let test_path = dir.join("example.txt");
    if !test_path.exists() {
        fs::write(&test_path, TEST_TEMPLATE)
            .map_err(|e| format!("writing {}: {e}", test_path.display()))?;
    }
    Ok(())
}
