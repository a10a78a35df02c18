use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use lp_planner::config::{Settings, SettingsArgs};
use lp_planner::constants;
use lp_planner::export::build_pptx;
use lp_planner::pipeline::LpPlanner;
use lp_planner::reference::UploadedReferences;
use lp_planner::{chat, web_server};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat web server.
    Serve {
        #[arg(long, env = "LP_HOST", default_value = constants::DEFAULT_HOST, help = "Address to bind.")]
        host: String,
        #[arg(long, env = "LP_PORT", default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat in the terminal.
    Chat,
    /// Produce one LP plan and diagram without starting a chat.
    Plan {
        /// Product or service theme, e.g. "クラウドセキュリティサービス".
        theme: String,
        #[arg(long, help = "CSV file with target survey data.")]
        csv: Option<PathBuf>,
        #[arg(long, help = "SVG file used as a layout reference.")]
        svg: Option<PathBuf>,
        #[arg(long, help = "Write the SVG here instead of stdout.")]
        out: Option<PathBuf>,
        #[arg(long, help = "Also write a PowerPoint deck (title, diagram, analysis slides).")]
        pptx: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default level, e.g. RUST_LOG=lp_planner=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings: Settings = cli.settings.into();
    info!(
        text = %format!("{}/{}", settings.text.provider, settings.text.model),
        diagram = %format!("{}/{}", settings.diagram.provider, settings.diagram.model),
        "lp-planner starting with command: {:?}",
        cli.command
    );

    match cli.command {
        Commands::Serve { host, port } => {
            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(&host, port, settings).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                    web_server_handle.abort();
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }
        }
        Commands::Chat => {
            chat::run_chat(settings).await.context("Chat session failed")?;
        }
        Commands::Plan {
            theme,
            csv,
            svg,
            out,
            pptx,
        } => {
            run_plan(&settings, &theme, csv, svg, out, pptx).await?;
        }
    }

    info!("lp-planner finished.");
    Ok(())
}

async fn run_plan(
    settings: &Settings,
    theme: &str,
    csv: Option<PathBuf>,
    svg: Option<PathBuf>,
    out: Option<PathBuf>,
    pptx: Option<PathBuf>,
) -> Result<()> {
    let planner = LpPlanner::from_settings(settings)?;

    let mut references = UploadedReferences::default();
    if let Some(path) = csv {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if references.replace_csv(&bytes, settings.csv_sample_rows).is_err() {
            warn!(path = %path.display(), "Continuing without CSV reference");
        }
    }
    if let Some(path) = svg {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if references.replace_svg(&bytes).is_err() {
            warn!(path = %path.display(), "Continuing without SVG reference");
        }
    }

    let outcome = planner.plan(theme, &references).await?;
    println!("{}", outcome.transcript_entry());

    match out {
        Some(path) => {
            tokio::fs::write(&path, &outcome.diagram)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Diagram written");
        }
        None => println!("\n{}", outcome.diagram),
    }

    if let Some(path) = pptx {
        let deck = build_pptx(&outcome, Local::now()).context("Failed to build PowerPoint deck")?;
        tokio::fs::write(&path, deck)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "PowerPoint deck written");
    }
    Ok(())
}
