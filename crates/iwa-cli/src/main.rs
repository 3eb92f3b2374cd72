mod config;
mod http;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use iwa_core::UpdateManager;
use iwa_core::discovery::{DiscoveryCollaborators, DiscoveryLogEntry};
use iwa_core::execution::TokioProcessExecutor;
use iwa_core::install::{
    DryRunInstaller, ExternalCommand, ProcessDryRunInstaller, ProcessTrustVerifier,
    VerifyingInstaller,
};
use iwa_core::models::{InstalledAppRecord, PackageIdentity};
use iwa_core::persistence::AppRegistry;
use iwa_core::sqlite::SqliteStore;
use iwa_core::staging::StagingArea;
use semver::Version;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

use crate::config::{CliConfig, CliError, DEFAULT_CONFIG_PATH};
use crate::http::UreqFetcher;

const USAGE: &str = "\
usage: iwa-updater <command> [--config <path>]

commands:
  run                                          discover updates on a timer until Ctrl-C
  discover                                     run one discovery cycle and print its log
  apps                                         print registered apps
  register <id> <version> <location> [url]     add or replace an isolated app
  unregister <id>                              remove an app";

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Discover,
    Apps,
    Register {
        identity: PackageIdentity,
        version: Version,
        location: PathBuf,
        manifest_url: Option<String>,
    },
    Unregister {
        identity: PackageIdentity,
    },
}

#[derive(Debug, PartialEq)]
struct Invocation {
    command: Command,
    config_path: PathBuf,
}

impl Invocation {
    fn parse(args: &[String]) -> Result<Self, CliError> {
        let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let mut positional = Vec::new();
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args
                        .next()
                        .ok_or_else(|| CliError::Usage("--config needs a path".to_string()))?;
                    config_path = PathBuf::from(path);
                }
                "--help" | "-h" => return Err(CliError::Usage(USAGE.to_string())),
                other => positional.push(other),
            }
        }

        let command = match positional.as_slice() {
            ["run"] => Command::Run,
            ["discover"] => Command::Discover,
            ["apps"] => Command::Apps,
            ["register", identity, version, location, rest @ ..] if rest.len() <= 1 => {
                Command::Register {
                    identity: parse_identity(identity)?,
                    version: Version::parse(version).map_err(|error| {
                        CliError::Usage(format!("invalid version '{version}': {error}"))
                    })?,
                    location: PathBuf::from(location),
                    manifest_url: rest.first().map(|url| url.to_string()),
                }
            }
            ["unregister", identity] => Command::Unregister {
                identity: parse_identity(identity)?,
            },
            [] => return Err(CliError::Usage(USAGE.to_string())),
            _ => {
                return Err(CliError::Usage(format!(
                    "unrecognized arguments: {}\n\n{USAGE}",
                    positional.join(" ")
                )));
            }
        };

        Ok(Self {
            command,
            config_path,
        })
    }
}

fn parse_identity(raw: &str) -> Result<PackageIdentity, CliError> {
    PackageIdentity::new(raw).map_err(|error| CliError::Usage(error.message))
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match Invocation::parse(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(2);
        }
    };

    match execute(invocation).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "iwa-updater failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(invocation: Invocation) -> Result<(), CliError> {
    let config = CliConfig::load(&invocation.config_path)?;
    let store = Arc::new(SqliteStore::new(&config.database_path));
    store.migrate_to_latest()?;

    match invocation.command {
        Command::Run => run_daemon(config, store).await,
        Command::Discover => discover_once(config, store).await,
        Command::Apps => print_json(&store.list_apps()?),
        Command::Register {
            identity,
            version,
            location,
            manifest_url,
        } => {
            let mut record = InstalledAppRecord::isolated(identity, version, location);
            if let Some(url) = manifest_url {
                record = record.with_update_manifest_url(url);
            }
            store.upsert_app(&record)?;
            tracing::info!(
                app = %record.identity,
                version = %record.current_version,
                "registered app"
            );
            Ok(())
        }
        Command::Unregister { identity } => {
            if store.remove_app(&identity)? {
                tracing::info!(app = %identity, "unregistered app");
            } else {
                tracing::warn!(app = %identity, "app was not registered");
            }
            Ok(())
        }
    }
}

fn build_manager(
    config: CliConfig,
    store: Arc<SqliteStore>,
) -> Result<Arc<UpdateManager>, CliError> {
    let collaborators = DiscoveryCollaborators {
        registry: store,
        fetcher: Arc::new(UreqFetcher::new()),
        installer: build_installer(config.installer, config.verifier),
        staging: StagingArea::new(config.staging_dir),
    };
    Ok(UpdateManager::new(config.manager, collaborators)?)
}

/// Every dry run goes through the verifier first.
fn build_installer(
    installer: ExternalCommand,
    verifier: ExternalCommand,
) -> Arc<dyn DryRunInstaller> {
    let executor = Arc::new(TokioProcessExecutor);
    Arc::new(VerifyingInstaller::new(
        Arc::new(ProcessTrustVerifier::new(executor.clone(), verifier)),
        Arc::new(ProcessDryRunInstaller::new(executor, installer)),
    ))
}

async fn run_daemon(config: CliConfig, store: Arc<SqliteStore>) -> Result<(), CliError> {
    let manager = build_manager(config, store)?;
    if !manager.start_registry_watch().await? {
        tracing::warn!(
            "discovery timer is not running yet; no isolated apps or feature disabled"
        );
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for ctrl-c");
    }
    manager.shutdown().await;
    Ok(())
}

async fn discover_once(config: CliConfig, store: Arc<SqliteStore>) -> Result<(), CliError> {
    let manager = build_manager(config, store)?;
    manager.run_discovery_cycle().await?;
    let entries: Vec<PrintedLogEntry> = manager
        .debug_log()
        .await
        .into_iter()
        .map(PrintedLogEntry::from)
        .collect();
    print_json(&entries)
}

#[derive(Serialize)]
struct PrintedLogEntry {
    #[serde(flatten)]
    entry: DiscoveryLogEntry,
    finished_at: Option<String>,
}

impl From<DiscoveryLogEntry> for PrintedLogEntry {
    fn from(entry: DiscoveryLogEntry) -> Self {
        let finished_at = OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(entry.finished_at_unix_ms) * 1_000_000,
        )
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok());
        Self { entry, finished_at }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
