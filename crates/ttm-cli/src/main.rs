use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use ttm_client::{PreviewApi, PreviewSync, SessionSnapshot, SyncConfig, SyncPhase};

#[derive(Parser)]
#[command(name = "ttm")]
#[command(about = "TopTierModels studio CLI", long_about = None)]
struct Cli {
    /// Studio hub base url; falls back to TTM_STUDIO_URL.
    #[arg(long, default_value = "")]
    base_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a preview session live, printing every transition
    Watch { preview_id: String },
    /// Fetch a preview once and print it as JSON
    Show { preview_id: String },
    /// Promote a preview to the published site
    Publish {
        preview_id: String,
        /// Also fire the site rebuild hook
        #[arg(long, default_value_t = false)]
        rebuild: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = SyncConfig::parse(&resolve_base_url(&cli.base_url))?;

    match cli.command {
        Commands::Watch { preview_id } => watch(config, &preview_id).await,
        Commands::Show { preview_id } => show(config, &preview_id).await,
        Commands::Publish {
            preview_id,
            rebuild,
        } => publish(config, &preview_id, rebuild).await,
    }
}

fn resolve_base_url(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var("TTM_STUDIO_URL") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "http://127.0.0.1:3001".to_string()
}

async fn watch(config: SyncConfig, preview_id: &str) -> Result<()> {
    let session = PreviewSync::observe(config, preview_id)?;
    let mut snapshots = session.snapshots();
    println!("watching preview {preview_id} (ctrl-c to stop)");
    print_snapshot(&snapshots.borrow().clone());

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                print_snapshot(&snapshots.borrow().clone());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let summary = match (&snapshot.state, snapshot.phase) {
        (_, SyncPhase::Unavailable) => "preview unavailable (not found or expired)".to_string(),
        (None, _) => "waiting for first data".to_string(),
        (Some(state), _) => format!(
            "\"{}\" [{}] overall {:.1} ({} chars social)",
            state.article_data.title,
            state.scores_data.tier,
            state.scores_data.overall_score,
            state.linkedin_data.character_count,
        ),
    };
    println!("[{}] {}", snapshot.status, summary);
}

async fn show(config: SyncConfig, preview_id: &str) -> Result<()> {
    let api = PreviewApi::new(config)?;
    match api.fetch_preview(preview_id).await? {
        Some(state) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        None => Err(anyhow!("preview not found: {preview_id}")),
    }
}

async fn publish(config: SyncConfig, preview_id: &str, rebuild: bool) -> Result<()> {
    let api = PreviewApi::new(config)?;
    match api.publish(preview_id, rebuild).await {
        Ok(receipt) => {
            println!("{}", receipt.message);
            println!("live at: {}", receipt.live_url);
            Ok(())
        }
        Err(err) => Err(anyhow!("publish failed: {err}")),
    }
}
