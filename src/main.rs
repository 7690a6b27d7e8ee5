//! service-host
//!
//! Runs an HTTP listener and a sample plugin under one lifecycle.
//!
//! # Architecture Overview
//!
//! ```text
//!     CLI flags ─┐
//!     TOML file ─┼─▶ ConfigLoader ──▶ Host::init ──▶ configure (in order)
//!     env vars  ─┘                        │
//!                                         ▼
//!                                   Host::start ──▶ run (concurrent)
//!                                         │           ├─ http listener
//!     SIGINT/SIGTERM ─────────────────────┤           └─ simple plugin
//!                                         ▼
//!                                   Host::shutdown ──▶ stop (parallel, bounded)
//!
//!     Config file change ──▶ ConfigWatcher ──▶ HttpListener::reload
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use axum::{routing::get, Json};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use service_host::component::{Component, Registry};
use service_host::config::{ConfigLoader, ConfigWatcher, FlagSet, ListenerConfig};
use service_host::http::HttpListener;
use service_host::lifecycle::Host;
use service_host::observability::{logging, LogFormat, LoggingConfig, PrometheusTelemetry};
use service_host::plugin::SimplePlugin;

#[derive(Parser)]
#[command(name = "service-host")]
#[command(about = "Host HTTP and plugin components under one lifecycle", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override an option, e.g. `--set http.port=8080`
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Prefix for environment variables (`{PREFIX}_HTTP_PORT`)
    #[arg(long, default_value = "SERVICE_HOST")]
    env_prefix: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format: compact or json
    #[arg(long, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    /// Seconds to wait for components to stop
    #[arg(long, default_value_t = 30)]
    shutdown_timeout_secs: u64,

    /// Reload the listener when the configuration file changes
    #[arg(long, requires = "config")]
    watch: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the host (default)
    Run,
    /// Print every registered option with its default and environment variable
    Flags,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    };
    if let Err(e) = logging::init(&logging) {
        eprintln!("service-host: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "service-host exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut loader = ConfigLoader::new()
        .with_env_prefix(cli.env_prefix.as_str())
        .with_overrides(cli.overrides.iter().cloned());
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }

    let listener = HttpListener::default();
    listener.route("/ping", get(ping))?;

    let mut registry = Registry::new();
    registry.register(listener.clone())?;
    registry.register(SimplePlugin::new("simple"))?;

    if let Some(Command::Flags) = cli.command {
        return print_flags(&registry, &loader);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        components = ?registry.names(),
        "service-host starting"
    );

    let mut builder = Host::builder(registry)
        .config_loader(loader)
        .shutdown_timeout(Duration::from_secs(cli.shutdown_timeout_secs));
    if let Some(address) = cli.metrics_address {
        builder = builder.telemetry(PrometheusTelemetry::new(address));
    }
    let host = builder.build();

    host.init()?;
    let simple = host.registry().must_resolve::<SimplePlugin>("simple")?;
    tracing::info!(value = %simple.value(), "Simple plugin configured");

    // Dropping the watcher stops it, so keep it alive until the host exits.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => Some(watch_listener(&host, path, listener)?),
        _ => None,
    };

    host.start().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn watch_listener(
    host: &Host,
    path: &std::path::Path,
    listener: HttpListener,
) -> Result<notify::RecommendedWatcher, Box<dyn Error>> {
    let flags = host.flags().unwrap_or_default();
    let (watcher, mut updates) = ConfigWatcher::new(path, host.config_loader().clone(), flags);
    let watcher = watcher.run()?;

    tokio::spawn(async move {
        let prefix = listener.prefix().to_string();
        while let Some(resolved) = updates.recv().await {
            match ListenerConfig::from_view(&resolved.view(&prefix)) {
                Ok(config) if config == *listener.config() => {
                    tracing::debug!("Listener configuration unchanged");
                }
                Ok(config) => {
                    if let Err(e) = listener.reload(config).await {
                        tracing::error!(error = %e, "Listener reload failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid listener configuration");
                }
            }
        }
    });

    Ok(watcher)
}

fn print_flags(registry: &Registry, loader: &ConfigLoader) -> Result<(), Box<dyn Error>> {
    let mut flags = FlagSet::new();
    for component in registry.iter() {
        component.init_flags(&mut flags.scoped(component.name(), component.prefix()))?;
    }

    let options: Vec<Value> = flags
        .iter()
        .map(|def| {
            json!({
                "key": def.key,
                "kind": def.kind(),
                "default": def.default,
                "env": loader.env_var_name(&def.key),
                "owner": def.owner,
                "help": def.help,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}
