use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kbc_provider::config::ProviderConfig;
use kbc_provider::kbc::client::format_kbc_error;
use kbc_provider::resource::{Operation, ResourceKind};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Declarative resource provider for Keboola Connection
#[derive(Parser, Debug)]
#[command(name = "kbc-provider", version, about, long_about = None)]
struct Args {
    /// Storage API token (overrides config and STORAGE_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a resource from a desired-state document
    Create(StateArgs),
    /// Refresh a state document from the remote object
    Read(StateArgs),
    /// Apply changed attributes in place
    Update {
        #[command(flatten)]
        state: StateArgs,
        /// Changed attribute names
        #[arg(long, value_delimiter = ',', required = true)]
        changed: Vec<String>,
    },
    /// Delete the resource a state document points at
    Delete(StateArgs),
    /// Encrypt a secret for a component
    Encrypt {
        #[arg(long)]
        component: String,
        #[arg(long)]
        value: String,
    },
}

#[derive(clap::Args, Debug)]
struct StateArgs {
    /// Resource kind
    #[arg(long, value_enum)]
    kind: ResourceKind,

    /// State document (JSON)
    #[arg(long)]
    state: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }

    /// Filter for this level; `RUST_LOG` takes precedence when set
    fn env_filter(self) -> Option<EnvFilter> {
        let level = self.to_tracing_level()?;
        Some(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase())),
        )
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = level.env_filter()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            return None;
        },
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("kbc-provider started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("kbc-provider").join("kbc-provider.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".kbc-provider").join("kbc-provider.log");
    }
    PathBuf::from("kbc-provider.log")
}

fn read_state(path: &PathBuf) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let config = match &args.config {
        Some(path) => ProviderConfig::load_from(path)?,
        None => ProviderConfig::load()?,
    };
    let credential = config.credential(args.api_key.as_deref())?;
    tracing::info!("Using API token {}", credential.masked());
    let client = config.build_client(credential)?;

    let (kind, state, op) = match args.command {
        Command::Encrypt { component, value } => {
            let encrypted = client
                .encrypt(&component, &value)
                .await
                .map_err(|e| anyhow::anyhow!(format_kbc_error(&e)))?;
            println!("{}", encrypted);
            return Ok(());
        },
        Command::Create(s) => (s.kind, s.state, Operation::Create),
        Command::Read(s) => (s.kind, s.state, Operation::Read),
        Command::Update { state, changed } => (state.kind, state.state, Operation::Update(changed)),
        Command::Delete(s) => (s.kind, s.state, Operation::Delete),
    };

    let document = read_state(&state)?;
    let result = kind
        .apply(&client, &op, document)
        .await
        .map_err(|e| anyhow::anyhow!(format_kbc_error(&e)))
        .with_context(|| format!("{} {:?} failed", kind, op))?;

    match result {
        Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
        None => println!("null"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_installs_no_filter() {
        assert!(LogLevel::Off.env_filter().is_none());
    }

    #[test]
    fn test_level_filter_without_rust_log() {
        std::env::remove_var("RUST_LOG");
        let filter = LogLevel::Debug.env_filter().expect("debug has a filter");
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::DEBUG)
        );
    }

    #[test]
    fn test_args_parse_update_with_changed_list() {
        let args = Args::try_parse_from([
            "kbc-provider",
            "--log-level",
            "info",
            "update",
            "--kind",
            "orchestration",
            "--state",
            "nightly.json",
            "--changed",
            "crontab_record,active",
        ])
        .unwrap();
        match args.command {
            Command::Update { state, changed } => {
                assert_eq!(state.kind, ResourceKind::Orchestration);
                assert_eq!(changed, vec!["crontab_record", "active"]);
            },
            other => panic!("expected update, got {other:?}"),
        }
    }
}
