use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub mod api;
pub mod controller;
pub mod download_manager;
pub mod error;
pub mod events;
pub mod info;
pub mod models;
pub mod notifier;
pub mod session;
pub mod settings;
pub mod url_utils;
pub mod view;

pub use api::{ApiConfig, DownloadApi, HttpApi};
pub use controller::{Controller, ControllerConfig};
pub use download_manager::{AttemptHandle, DownloadPhase, PollConfig};
pub use error::{ClientError, ErrorCode};
pub use events::{ControllerEvent, EventSink, PollStopReason};
pub use models::{
    DownloadFormat, DownloadRequest, JobOutcome, JobStatus, ProgressReport, VideoInfo,
};
pub use settings::Settings;
pub use view::{Notification, NotificationKind, View, ViewModel};

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "fetchdeck", version)]
#[command(about = "Fetch video info and download MP3/MP4 files from a conversion server")]
struct Cli {
    /// Server base URL (overrides settings and FETCHDECK_SERVER).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show title, uploader, duration and thumbnail for a URL.
    Info { url: String },

    /// Convert a URL on the server and save the result.
    Download {
        url: String,

        /// "audio" (MP3) or "video" (MP4).
        #[arg(short, long, value_parser = parse_format)]
        format: Option<DownloadFormat>,

        /// Directory for the retrieved file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only print the file URL instead of retrieving it.
        #[arg(long, default_value_t = false)]
        no_save: bool,
    },
}

fn parse_format(s: &str) -> Result<DownloadFormat, String> {
    s.parse()
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), level)));
    // The fmt subscriber also installs the `log` bridge used across the crate.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Entry point for the `fetchdeck` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(server) = &cli.server {
        settings = settings.with_server(server.clone());
    }
    log::info!("Using server {}", settings.server.base_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Info { url } => cmd_info(&settings, &url).await,
            Commands::Download {
                url,
                format,
                output,
                no_save,
            } => {
                let format = format.unwrap_or(settings.general.default_format);
                let output = output.unwrap_or_else(|| settings.general.download_dir.clone());
                cmd_download(&settings, &url, format, (!no_save).then_some(output)).await
            }
        }
    })
}

type Session = (Controller<HttpApi>, HttpApi, UnboundedReceiver<ControllerEvent>);

fn build_controller(settings: &Settings) -> Result<Session> {
    let api = HttpApi::new(ApiConfig::from_settings(settings)?)?;
    let (events, rx) = EventSink::channel();
    let config = ControllerConfig::from_settings(settings);
    let controller = Controller::new(api.clone(), config, events);
    Ok((controller, api, rx))
}

fn print_info(info: &VideoInfo) {
    println!("Title:     {}", info.title);
    println!("Uploader:  {}", info.uploader);
    println!("Duration:  {}", info.duration);
    println!("Thumbnail: {}", info.thumbnail_url);
}

async fn cmd_info(settings: &Settings, url: &str) -> Result<()> {
    let (controller, _api, _rx) = build_controller(settings)?;
    let info = controller.fetch_info(url).await;
    controller.shutdown().await;
    print_info(&info?);
    Ok(())
}

async fn cmd_download(
    settings: &Settings,
    url: &str,
    format: DownloadFormat,
    save_dir: Option<PathBuf>,
) -> Result<()> {
    let (controller, api, rx) = build_controller(settings)?;
    controller.select_format(format).await;

    let info = match controller.fetch_info(url).await {
        Ok(info) => info,
        Err(e) => {
            controller.shutdown().await;
            return Err(e.into());
        }
    };
    print_info(&info);

    let renderer = tokio::spawn(render_progress(rx));
    let handle = match controller.download().await {
        Ok(Some(handle)) => handle,
        Ok(None) => {
            renderer.abort();
            controller.shutdown().await;
            bail!("download did not start");
        }
        Err(e) => {
            renderer.abort();
            controller.shutdown().await;
            return Err(e.into());
        }
    };

    let outcome = handle.outcome().await;
    renderer.abort();
    controller.shutdown().await;
    eprintln!();

    match outcome {
        JobOutcome::Completed { filename, file_url } => match save_dir {
            Some(dir) => {
                let path = api
                    .save_file(&filename, &dir)
                    .await
                    .with_context(|| format!("retrieve {file_url}"))?;
                println!("Saved:     {}", path.display());
                Ok(())
            }
            None => {
                println!("File:      {}", file_url);
                Ok(())
            }
        },
        JobOutcome::Failed(e) => Err(anyhow!(e)).context("download failed"),
        JobOutcome::Cancelled => bail!("download was cancelled"),
    }
}

/// Terminal adapter: renders progress and banners from controller events.
async fn render_progress(mut rx: UnboundedReceiver<ControllerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ControllerEvent::JobStarted { job_id, .. } => {
                eprintln!("Job {} started", job_id);
            }
            ControllerEvent::ViewChanged { view } => {
                if let (Some(text), Some(bar)) = (&view.loading_text, &view.progress) {
                    eprint!("\r{:<48} {:>22}", text, bar.text);
                }
            }
            ControllerEvent::FileReady { file_url, .. } => {
                eprintln!("\nReady at {}", file_url);
            }
            ControllerEvent::Notification { notification, .. } => {
                let tag = match notification.kind {
                    NotificationKind::Error => "error",
                    NotificationKind::Success => "ok",
                    NotificationKind::Info => "info",
                };
                eprintln!("\n[{}] {}", tag, notification.message);
            }
            _ => {}
        }
    }
}
