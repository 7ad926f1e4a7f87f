use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use workload_meter::config::MeterConfig;
use workload_meter::host::SqliteSession;
use workload_meter::lifecycle::Engine;
use workload_meter::replay;
use workload_meter::view::{self, WorkloadView};

/// Per-workload SQL statement instrumentation: count statements tagged with
/// `/* WORKLOAD_NAME=<name> */` and report the aggregates as a read-only view.
#[derive(Parser, Debug)]
#[command(name = "workload-meter", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "workload.toml")]
    config: PathBuf,

    /// Dynamic workload capacity (overrides config)
    #[arg(long)]
    capacity: Option<usize>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (admissions, ignored events)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSONL statement log and print the view
    Replay {
        /// Statement log, one JSON record per line
        file: PathBuf,

        /// Concurrent sessions (overrides config)
        #[arg(long)]
        sessions: Option<usize>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Run a SQL script (one statement per line) against SQLite and print the view
    Sql {
        /// SQL script
        file: PathBuf,

        /// Database file (default: in-memory)
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Serve the view over HTTP
    #[cfg(feature = "serve")]
    Serve {
        /// Statement log to replay before serving
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match MeterConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(capacity) = cli.capacity {
        config.engine.capacity = capacity;
    }

    init_logging(&cli, &config);
    tracing::debug!(?cli, "parsed CLI arguments");

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(resolved) => println!("{resolved}"),
            Err(e) => {
                eprintln!("Error: failed to render config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let result = match cli.command {
        Some(Command::Replay {
            file,
            sessions,
            format,
        }) => handle_replay(&config, &file, sessions, format),
        Some(Command::Sql { file, db, format }) => {
            handle_sql(&config, &file, db.as_deref(), format)
        }
        #[cfg(feature = "serve")]
        Some(Command::Serve { replay, port }) => {
            handle_serve(config, replay.as_deref(), port).await
        }
        None => {
            println!("workload-meter v{}", env!("CARGO_PKG_VERSION"));
            println!("Config file: {}", cli.config.display());
            println!("Run with --help for available commands.");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli, config: &MeterConfig) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn activate(config: &MeterConfig) -> Result<Arc<Engine>, String> {
    let engine = Arc::new(Engine::new(config.engine.clone()));
    engine.activate().map_err(|e| e.to_string())?;
    Ok(engine)
}

fn print_view(engine: &Arc<Engine>, format: OutputFormat) -> Result<(), String> {
    let rows = WorkloadView::new(engine.clone())
        .rows()
        .map_err(|e| e.to_string())?;
    match format {
        OutputFormat::Table => print!("{}", view::render_table(&rows)),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&rows)
                .map_err(|e| format!("Failed to serialize view: {e}"))?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Handle `workload-meter replay`.
fn handle_replay(
    config: &MeterConfig,
    file: &Path,
    sessions: Option<usize>,
    format: OutputFormat,
) -> Result<(), String> {
    let sessions = sessions.unwrap_or(config.replay.sessions);
    if sessions == 0 {
        return Err("--sessions must be greater than 0".to_string());
    }

    let log = replay::load_log(file).map_err(|e| e.to_string())?;
    if log.skipped > 0 {
        eprintln!("Warning: skipped {} malformed line(s).", log.skipped);
    }

    let engine = activate(config)?;
    let summary = replay::replay(&engine, &log, sessions);
    tracing::debug!(?summary, "replay summary");

    print_view(&engine, format)?;
    engine.deactivate().map_err(|e| e.to_string())
}

/// Handle `workload-meter sql`.
fn handle_sql(
    config: &MeterConfig,
    file: &Path,
    db: Option<&Path>,
    format: OutputFormat,
) -> Result<(), String> {
    let script = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;

    let engine = activate(config)?;
    let session = match db {
        Some(path) => SqliteSession::open(path, engine.hook()),
        None => SqliteSession::open_in_memory(engine.hook()),
    }
    .map_err(|e| format!("Failed to open database: {e}"))?;

    for sql in workload_meter::host::script_statements(&script) {
        session
            .execute(sql)
            .map_err(|e| format!("Statement failed: {e}\n  {sql}"))?;
    }

    print_view(&engine, format)?;
    engine.deactivate().map_err(|e| e.to_string())
}

/// Handle `workload-meter serve`.
#[cfg(feature = "serve")]
async fn handle_serve(
    mut config: MeterConfig,
    replay_file: Option<&Path>,
    port: Option<u16>,
) -> Result<(), String> {
    if let Some(port) = port {
        config.serve.port = port;
    }

    let engine = activate(&config)?;
    if let Some(file) = replay_file {
        let log = replay::load_log(file).map_err(|e| e.to_string())?;
        replay::replay(&engine, &log, config.replay.sessions);
    }

    workload_meter::serve::run(&config.serve, engine)
        .await
        .map_err(|e| format!("Server error: {e}"))
}
