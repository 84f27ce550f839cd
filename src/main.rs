mod config;
mod coordinator;
mod downloader;
mod downloads;
mod error;
mod events;
mod fetch;
mod resize;
mod service;

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::service::ThumbnailService;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let mut settings = Settings::new().expect("Failed to load configuration");

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .with_thread_names(true);
    match &settings.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("Failed to open log file");
            subscriber.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }

    settings.urls.extend(std::env::args().skip(1));
    info!("Starting thumbnailer with {} urls...", settings.urls.len());
    if settings.urls.is_empty() {
        warn!("No image urls configured; nothing to do");
    }

    let service = ThumbnailService::new(&settings);

    let mut rx = service.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        debug!("event: {}", json);
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = service.make_thumbnails(&settings.urls).await;
    drop(service);
    let _ = forwarder.await;

    match result {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize report: {}", e),
            }
            if !report.is_clean() {
                warn!(
                    "{} downloads and {} resizes failed",
                    report.downloads.failed(),
                    report.resizes.failed()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("make_thumbnails failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
