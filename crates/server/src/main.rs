//! Vigil Server
//!
//! CLI and HTTP progress observer over the Vigil scan record store.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{AppState, SharedState};
use vigil_core::config::DEFAULT_CONFIG_PATH;
use vigil_core::state::db::DEFAULT_DB_PATH;
use vigil_core::state::{ScanDb, ScanStore, SqliteScanStore};
use vigil_core::OrchestratorConfig;

#[derive(Parser, Clone)]
#[command(author, version, about = "Vigil - Security scan orchestration")]
struct Args {
    /// Scan database path (overrides VIGIL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Orchestrator config path (overrides VIGIL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP progress observer (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Print the stored record of one scan
    Status {
        /// Scan id
        scan_id: String,
    },
    /// List stored scans with their progress
    List,
    /// Print the effective orchestrator configuration
    Config,
}

/// Flag, then environment variable, then built-in default
fn resolve_path(flag: Option<PathBuf>, env_var: &str, default: &str) -> PathBuf {
    flag.or_else(|| std::env::var_os(env_var).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

fn open_store(path: &Path) -> anyhow::Result<Arc<dyn ScanStore>> {
    let db = ScanDb::open_at(path)
        .with_context(|| format!("Failed to open scan database at {}", path.display()))?;
    Ok(Arc::new(SqliteScanStore::new(&db)))
}

// === Server Entry ===

async fn run_server(store: Arc<dyn ScanStore>, port: u16) -> anyhow::Result<()> {
    let state: SharedState = Arc::new(AppState { store });
    let app = api::router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Vigil server running at http://{}", addr);
    tracing::info!("API v1 routes: /api/v1/health, /api/v1/scans, /api/v1/scans/:id, /api/v1/scans/:id/result, /api/v1/openapi.json");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info,vigil_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let db_path = resolve_path(args.db, "VIGIL_DB_PATH", DEFAULT_DB_PATH);
    let config_path = resolve_path(args.config, "VIGIL_CONFIG", DEFAULT_CONFIG_PATH);

    match args.command {
        Some(CliCommand::Status { scan_id }) => {
            let record = open_store(&db_path)?.load(&scan_id)?;
            println!(
                "{} {} {}%",
                record.scan_id(),
                record.state.stage.as_str(),
                record.progress()
            );
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Some(CliCommand::List) => {
            let scans = open_store(&db_path)?.list()?;
            if scans.is_empty() {
                println!("No scans recorded in {}", db_path.display());
            }
            for state in scans {
                println!(
                    "{:<36} {:<10} {:<12} {:>3}%  {}/{} detectors",
                    state.scan_id,
                    state.kind.as_str(),
                    state.stage.as_str(),
                    state.progress,
                    state.completed_detectors,
                    state.total_detectors
                );
            }
        }
        Some(CliCommand::Config) => {
            let config = OrchestratorConfig::load_from(&config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some(CliCommand::Serve { port }) => run_server(open_store(&db_path)?, port).await?,
        None => run_server(open_store(&db_path)?, 8080).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_takes_precedence() {
        let path = resolve_path(
            Some(PathBuf::from("/tmp/flag.db")),
            "VIGIL_TEST_UNSET_VAR",
            DEFAULT_DB_PATH,
        );
        assert_eq!(path, PathBuf::from("/tmp/flag.db"));
    }

    #[test]
    fn test_default_when_nothing_set() {
        let path = resolve_path(None, "VIGIL_TEST_UNSET_VAR", DEFAULT_DB_PATH);
        assert_eq!(path, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::parse_from(["vigil", "--db", "scans.db", "status", "scan-1"]);
        assert_eq!(args.db, Some(PathBuf::from("scans.db")));
        assert!(matches!(args.command, Some(CliCommand::Status { scan_id }) if scan_id == "scan-1"));

        let args = Args::parse_from(["vigil", "serve", "--port", "9000"]);
        assert!(matches!(args.command, Some(CliCommand::Serve { port: 9000 })));
    }
}
