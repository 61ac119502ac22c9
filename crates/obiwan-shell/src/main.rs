//! Command-line host for the Obi-Wan worker.
//!
//! Starts a worker over a real HTTP fetcher, connects one page to it,
//! installs and activates, then runs a single command.
//!
//! ## Usage
//!
//! ```bash
//! # Fetch a font twice; the second answer comes from the cache
//! obiwan fetch https://fonts.gstatic.com/s/roboto.woff2 --destination font --repeat 2
//!
//! # Ask the worker for a greeting
//! obiwan message GET_GREETING
//!
//! # Show every cache the worker knows about
//! obiwan report --json
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use obiwan_common::{init_logging, LogConfig, LogFormat};
use obiwan_page::{AppState, AppStore, ServiceWorkerBridge};
use obiwan_sw::testing::StubFetcher;
use obiwan_sw::{
    ClientMessage, Destination, FetchDisposition, Fetcher, HttpFetcher, Request, Response,
    ServiceWorkerController, ServiceWorkerGlobalScope, WorkerConfig, WorkerRuntime,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "obiwan")]
#[command(about = "Run the Obi-Wan offline worker from the command line")]
struct Cli {
    /// Worker configuration file (JSON); falls back to $OBIWAN_CONFIG
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the production document root when no configuration is given
    #[arg(long, global = true)]
    production: bool,

    /// Fail every network fetch
    #[arg(long, global = true)]
    offline: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => LogFormat::Pretty,
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs through the worker
    Fetch {
        /// URLs, absolute or relative to the worker scope
        #[arg(required = true)]
        urls: Vec<String>,
        /// Request destination (document, script, style, worker, image, font, manifest)
        #[arg(short, long)]
        destination: Option<Destination>,
        /// Send as a top-level navigation
        #[arg(long)]
        navigate: bool,
        /// Fetch each URL this many times
        #[arg(short, long, default_value = "1")]
        repeat: usize,
    },

    /// Send a protocol message and wait for the reply
    Message {
        #[arg(value_parser = ["SKIP_WAITING", "CLIENTS_CLAIM", "REFRESH", "GET_GREETING"])]
        kind: String,
    },

    /// Print the state of every cache
    Report {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into()))
        .context("failed to initialize logging")?;

    let config = load_config(&cli)?;

    let fetcher: Arc<dyn Fetcher> = if cli.offline {
        info!("Offline: every network fetch fails");
        Arc::new(StubFetcher::offline())
    } else {
        Arc::new(HttpFetcher::new()?)
    };

    let page_url = config.scope_url()?;
    let scope = ServiceWorkerGlobalScope::new(config.clone(), fetcher.clone())?;
    let runtime = WorkerRuntime::spawn(scope);
    let controller = runtime.controller();

    let store = AppStore::new();
    let (bridge, _listener) =
        ServiceWorkerBridge::connect(store.clone(), controller.clone(), page_url).await?;

    controller.install().await.context("install failed")?;
    controller.activate().await.context("activate failed")?;
    wait_for(&store, REPLY_TIMEOUT, |s| s.client_message_allowed).await?;
    println!("{}", store.status_line());

    match cli.command {
        Commands::Fetch {
            urls,
            destination,
            navigate,
            repeat,
        } => {
            for url in &urls {
                let url = config.resolve(url)?;
                for _ in 0..repeat.max(1) {
                    let request = if navigate {
                        Request::navigate(url.clone())
                    } else {
                        Request::get(url.clone()).with_destination(destination.unwrap_or_default())
                    };
                    fetch(&controller, fetcher.as_ref(), request).await?;
                }
            }
        }

        Commands::Message { kind } => {
            let message = ClientMessage::parse(&serde_json::json!({ "type": kind }))
                .context("unknown message type")?;
            bridge.send(message)?;
            match message {
                ClientMessage::GetGreeting => {
                    wait_for(&store, REPLY_TIMEOUT, |s| !s.greeting.is_empty()).await?;
                    println!("{}", store.state().greeting);
                }
                ClientMessage::Refresh => {
                    wait_for(&store, REPLY_TIMEOUT, |s| s.reload_requested).await?;
                    println!("Caches cleared");
                }
                ClientMessage::SkipWaiting | ClientMessage::ClientsClaim => {
                    println!("Worker is {}", runtime.scope().state().await);
                }
            }
        }

        Commands::Report { json } => {
            let report = runtime.scope().cache_report().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for status in &report {
                    let state = if status.exists { "present" } else { "absent" };
                    println!("{:<36} {:<8} {} entries", status.name, state, status.entries);
                }
            }
        }
    }

    bridge.disconnect();
    runtime.shutdown().await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    if cli.config.is_none() && cli.production {
        return Ok(WorkerConfig::production());
    }
    WorkerConfig::load(cli.config.as_deref())
        .inspect_err(|e| error!(category = e.category(), error = %e, "Configuration rejected"))
        .context("failed to load configuration")
}

/// Fetch through the worker, going to the network when it declines.
async fn fetch(
    controller: &ServiceWorkerController,
    network: &dyn Fetcher,
    request: Request,
) -> Result<()> {
    let outcome = controller.fetch(request.clone()).await?;
    let (response, via) = match outcome.disposition {
        FetchDisposition::Respond { response, route } => {
            let via = route.map_or_else(|| "precache".to_string(), |r| r.to_string());
            (response, via)
        }
        FetchDisposition::Passthrough => {
            let response = network
                .fetch(&request)
                .await
                .unwrap_or_else(|_| Response::network_error());
            (response, "passthrough".to_string())
        }
    };
    outcome.event.settled().await;

    let source = if response.from_cache { "cache" } else { "network" };
    if response.is_error() {
        println!("ERR {:<16} {:<8} {}", via, source, request.url);
    } else {
        println!(
            "{:<3} {:<16} {:<8} {:>8}B {}",
            response.status,
            via,
            source,
            response.size(),
            request.url
        );
    }
    debug!(headers = ?response.headers, "Response headers");
    Ok(())
}

/// Wait until the page state satisfies `done`.
async fn wait_for(
    store: &AppStore,
    limit: Duration,
    done: impl Fn(&AppState) -> bool,
) -> Result<()> {
    let mut rx = store.subscribe();
    let reached = tokio::time::timeout(limit, rx.wait_for(|s| done(s)))
        .await
        .map(|seen| seen.is_ok());
    match reached {
        Ok(true) => Ok(()),
        Ok(false) => bail!("page store closed"),
        Err(_) => bail!("timed out waiting for the worker"),
    }
}
