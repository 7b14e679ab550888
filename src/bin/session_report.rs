use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use session_telemetry::report::{ReportFormat, SessionReport, Vocabulary};
use session_telemetry::{FileStore, SessionId};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Turns stored sessions into readable reports.
#[derive(Parser, Debug)]
#[command(name = "session-report", version)]
struct Args {
    /// Directory the telemetry driver wrote to
    #[arg(long, default_value = "logs/telemetry")]
    data_dir: PathBuf,

    /// Where reports are written
    #[arg(long, default_value = "logs/reports")]
    out: PathBuf,

    /// Only report on this session (all formats unless --format is given)
    session: Option<String>,

    /// json, csv or txt
    #[arg(long)]
    format: Option<ReportFormat>,

    /// Print the session ids found and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let args = Args::parse();
    let store = FileStore::new(args.data_dir.clone());
    let vocab = Vocabulary::default();

    if args.list {
        for id in store.list_sessions().await? {
            println!("{}", id);
        }
        return Ok(());
    }

    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("creating {}", args.out.display()))?;

    match &args.session {
        Some(id) => {
            let formats = match args.format {
                Some(f) => vec![f],
                None => vec![ReportFormat::Json, ReportFormat::Csv, ReportFormat::Text],
            };
            let export = store
                .load_session(&SessionId::from(id.as_str()))
                .await
                .with_context(|| format!("loading session {}", id))?;
            let report = SessionReport::build(&export, &vocab);
            for format in formats {
                write_report(&args.out, &report, format).await?;
            }
        }
        None => {
            let ids = store.list_sessions().await?;
            if ids.is_empty() {
                bail!("no sessions found under {}", args.data_dir.display());
            }
            let format = args.format.unwrap_or(ReportFormat::Text);
            let mut written = 0;
            for id in &ids {
                let export = match store.load_session(id).await {
                    Ok(export) => export,
                    Err(e) => {
                        tracing::warn!("Skipping session {}: {}", id, e);
                        continue;
                    }
                };
                let report = SessionReport::build(&export, &vocab);
                if !report.has_data() {
                    tracing::info!("Session {} has no interactions; skipped", id);
                    continue;
                }
                write_report(&args.out, &report, format).await?;
                written += 1;
            }
            tracing::info!("Wrote {} of {} session reports", written, ids.len());
        }
    }

    Ok(())
}

async fn write_report(dir: &Path, report: &SessionReport, format: ReportFormat) -> anyhow::Result<()> {
    let body = report.render(format)?;
    let path = dir.join(format!("session_{}.{}", report.session_id, format.extension()));
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}
