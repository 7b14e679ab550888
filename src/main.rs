use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use session_telemetry::telemetry::event::{ClickPayload, TreeNodeEdit};
use session_telemetry::{
    DurableStore, FileStore, HttpStore, PageVisitTracker, SignalHub, TelemetryConfig, TelemetryService,
    TokioScheduler, Visibility,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Drives a telemetry session from stdin commands.
#[derive(Parser, Debug)]
#[command(name = "session-telemetry", version)]
struct Args {
    /// Directory for the file-backed store
    #[arg(long, default_value = "logs/telemetry")]
    data_dir: PathBuf,

    /// Send records to a remote store instead of the data directory
    #[arg(long)]
    endpoint: Option<String>,

    /// Start a session for this participant right away
    #[arg(long)]
    participant: Option<String>,
}

const HELP: &str = "commands: start [participant] | click <element> <page> [text] | \
edit <node> <page> <value> | visit <page> | hide | flush | end | logging on|off | stats | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let args = Args::parse();
    let config = TelemetryConfig::from_env().context("invalid telemetry configuration")?;

    let store: Arc<dyn DurableStore> = match &args.endpoint {
        Some(url) => {
            tracing::info!("Writing telemetry to {}", url);
            Arc::new(HttpStore::new(url.clone()).context("building HTTP client failed")?)
        }
        None => {
            tracing::info!("Writing telemetry under {}", args.data_dir.display());
            Arc::new(FileStore::new(args.data_dir.clone()))
        }
    };

    let hub = SignalHub::new();
    let ctrl_c = hub.bridge_ctrl_c();

    let service = TelemetryService::builder(store)
        .config(config)
        .scheduler(Arc::new(TokioScheduler))
        .lifecycle(Arc::new(hub.clone()))
        .build()?;
    let mut visits = PageVisitTracker::new(service.clone());

    if args.participant.is_some() {
        service.start(args.participant.clone()).await;
    }

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; shutting down");
                break;
            }
        };
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else { continue };
        let rest: Vec<&str> = parts.collect();

        match (command, rest.as_slice()) {
            ("start", who) => match service.start(who.first().map(|s| s.to_string())).await {
                Some(id) => println!("session {}", id),
                None => println!("logging is off; no session started"),
            },
            ("logging", ["on"]) => service.set_enabled(true).await,
            ("logging", ["off"]) => service.set_enabled(false).await,
            ("click", [element, page, text @ ..]) => {
                let mut click = ClickPayload::new(element.to_uppercase(), *page);
                if !text.is_empty() {
                    click = click.with_text(&text.join(" "));
                }
                service.enqueue_click(click);
            }
            ("edit", [node, page, value @ ..]) => {
                service.enqueue_tree_node_edit(TreeNodeEdit::new(*page, *node, value.join(" ")));
            }
            ("visit", [page]) => visits.enter(*page).await,
            ("hide", []) => hub.set_visibility(Visibility::Hidden),
            ("flush", []) => service.flush().await,
            ("end", []) => {
                visits.leave().await;
                service.end().await;
            }
            ("stats", []) => {
                let stats = service.stats();
                println!(
                    "{:?}\npending={} delivery_ratio={:.2}",
                    stats,
                    service.pending_len(),
                    stats.delivery_ratio()
                );
            }
            ("quit", []) | ("exit", []) => break,
            _ => println!("{}", HELP),
        }
    }

    visits.leave().await;
    service.shutdown().await;
    ctrl_c.abort();
    tracing::info!("Telemetry driver stopped.");
    Ok(())
}
