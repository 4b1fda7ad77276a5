use std::env;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use trade_guard::config::{Config, ConfigError, StorageConfig};
use trade_guard::risk::{
    GuardStatus, RiskManagerAgent, RiskManagerSettings, TradeGuard, TradeOutcome,
};
use trade_guard::storage::{KeyValueStore, StorageError, open_store};

const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

const USAGE: &str = "usage: trade-guard [--config=path] <command>

commands:
  status <identity>                  show loss streak, pause and throttle
  check <identity> <size>            size a position through the guard
  record <identity> <win|loss>       record a closed trade
  reset <identity>                   clear loss streak, pause and throttle
  emergency <drawdown> <daily_loss>  run the emergency risk check";

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}\n\n{usage}", usage = USAGE)]
    Usage(String),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, PartialEq)]
enum Command {
    Status(String),
    Check(String, Decimal),
    Record(String, TradeOutcome),
    Reset(String),
    Emergency { drawdown: f64, daily_loss: f64 },
}

/// Each command runs in its own process, so without a `storage` section the
/// state goes to the default SQLite file.
fn cli_storage(config: &Config) -> StorageConfig {
    config.storage.clone().unwrap_or(StorageConfig {
        backend: Some("sqlite".to_string()),
        path: None,
        max_connections: None,
    })
}

fn parse_config_path() -> String {
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn parse_command(args: &[String]) -> Result<Command, CliError> {
    let args: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with("--config="))
        .collect();

    let number = |name: &str, value: &str| {
        value
            .parse::<f64>()
            .map_err(|_| CliError::Usage(format!("{} must be a number: {}", name, value)))
    };

    match args.as_slice() {
        ["status", id] => Ok(Command::Status(id.to_string())),
        ["reset", id] => Ok(Command::Reset(id.to_string())),
        ["check", id, size] => {
            let size = Decimal::from_str(size)
                .map_err(|_| CliError::Usage(format!("size must be a decimal: {}", size)))?;
            Ok(Command::Check(id.to_string(), size))
        }
        ["record", id, "win"] => Ok(Command::Record(id.to_string(), TradeOutcome::Win)),
        ["record", id, "loss"] => Ok(Command::Record(id.to_string(), TradeOutcome::Loss)),
        ["record", _, other] => Err(CliError::Usage(format!(
            "outcome must be win or loss: {}",
            other
        ))),
        ["emergency", drawdown, daily_loss] => Ok(Command::Emergency {
            drawdown: number("drawdown", drawdown)?,
            daily_loss: number("daily_loss", daily_loss)?,
        }),
        [] => Err(CliError::Usage("missing command".into())),
        [other, ..] => Err(CliError::Usage(format!(
            "unknown command or wrong arguments: {}",
            other
        ))),
    }
}

fn init_tracing(log_level: Option<&str>) {
    let level = match log_level {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") | Some("warning") => Level::WARN,
        Some("error") => Level::ERROR,
        Some("trace") => Level::TRACE,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    // Logs go to stderr so stdout stays pure JSON.
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn status_json(id: &str, status: &GuardStatus) -> serde_json::Value {
    json!({
        "identity": id,
        "consecutive_losses": status.losses.consecutive_losses,
        "paused": status.losses.is_paused,
        "remaining_pause_secs": status.losses.remaining_pause.map(|d| d.as_secs()),
        "multiplier": status.throttle.multiplier,
        "throttled": status.throttle.is_throttled,
        "effective_losses": status.throttle.effective_losses,
    })
}

async fn run(config: &Config, command: Command) -> Result<serde_json::Value, CliError> {
    match command {
        Command::Emergency {
            drawdown,
            daily_loss,
        } => {
            let agent =
                RiskManagerAgent::new(RiskManagerSettings::from_config(config.risk.as_ref()));
            let assessment = agent.check_emergency_conditions(drawdown, daily_loss);
            Ok(serde_json::to_value(&assessment)?)
        }
        command => {
            let storage = cli_storage(config);
            if storage.backend.as_deref() == Some("memory")
                && matches!(command, Command::Record(..) | Command::Reset(_))
            {
                warn!("Memory backend selected; this change is lost when the command exits");
            }
            let store: Arc<dyn KeyValueStore> = open_store(Some(&storage)).await?;
            let guard = TradeGuard::from_config(Arc::clone(&store), config);
            let output = run_guard(&guard, command).await;
            store.close().await?;
            output
        }
    }
}

async fn run_guard(guard: &TradeGuard, command: Command) -> Result<serde_json::Value, CliError> {
    match command {
        Command::Status(id) => Ok(status_json(&id, &guard.status(&id).await?)),
        Command::Check(id, size) => {
            let decision = guard.check(&id, size).await?;
            Ok(json!({
                "identity": id,
                "allowed": decision.allowed,
                "size": decision.size,
                "multiplier": decision.multiplier,
                "message": decision.message,
            }))
        }
        Command::Record(id, outcome) => {
            let status = guard.record_outcome(&id, outcome).await?;
            Ok(status_json(&id, &status))
        }
        Command::Reset(id) => {
            guard.reset(&id).await?;
            info!(identity = %id, "Risk state reset");
            Ok(status_json(&id, &guard.status(&id).await?))
        }
        Command::Emergency { .. } => Err(CliError::Usage(
            "emergency does not use the risk store".into(),
        )),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    init_tracing(config.app.log_level.as_deref());

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    info!(config = %config_path, app = %config.app.name, env = %config.app.env, "Starting");

    match run(&config, command).await.and_then(|value| {
        serde_json::to_string_pretty(&value).map_err(CliError::from)
    }) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
