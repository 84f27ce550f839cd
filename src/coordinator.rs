use crate::downloader::{Downloader, MAX_CONCURRENT_DOWNLOADS};
use crate::downloads::{DownloadReport, DownloadStats, FailedDownload, StagedImage};
use crate::error::{Error, FetchError, Result};
use crate::events::{self, Event, EventSender};
use crate::fetch::ImageSource;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

type Outcome = (usize, String, std::result::Result<StagedImage, FetchError>);

/// Runs a batch of downloads on a fixed pool of workers and waits for all of them.
///
/// Every batch run through one coordinator draws from the same permit pool, so
/// overlapping batches still respect the concurrency ceiling.
#[derive(Clone)]
pub struct DownloadCoordinator {
    source: Arc<dyn ImageSource>,
    staging_dir: PathBuf,
    tx: EventSender,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl DownloadCoordinator {
    pub fn new(source: Arc<dyn ImageSource>, staging_dir: PathBuf, tx: EventSender) -> Self {
        Self {
            source,
            staging_dir,
            tx,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS)),
            workers: MAX_CONCURRENT_DOWNLOADS,
        }
    }

    pub async fn download_images(&self, urls: &[String]) -> Result<DownloadReport> {
        if urls.is_empty() {
            return Ok(DownloadReport::default());
        }
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| Error::filesystem(&self.staging_dir, e))?;

        info!("Beginning download of {} images", urls.len());
        let start = Instant::now();

        let stats = DownloadStats::new();
        let downloader = Downloader::new(
            self.source.clone(),
            self.staging_dir.clone(),
            stats.clone(),
            self.tx.clone(),
            self.permits.clone(),
        );

        let (job_tx, job_rx) = mpsc::channel::<(usize, String)>(self.workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        // Outcomes leave the worker as soon as they exist so a later panic loses nothing.
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<Outcome>();

        let mut workers = JoinSet::new();
        for _ in 0..self.workers.min(urls.len()) {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let downloader = downloader.clone();
            workers.spawn(async move {
                loop {
                    let job = job_rx.lock().await.recv().await;
                    let Some((index, url)) = job else {
                        break;
                    };
                    let result = downloader.fetch(&url).await;
                    let _ = outcome_tx.send((index, url, result));
                }
            });
        }
        // Only workers may keep the queue open, so sends fail if every worker died.
        drop(job_rx);
        drop(outcome_tx);

        for (index, url) in urls.iter().enumerate() {
            if job_tx.send((index, url.clone())).await.is_err() {
                error!("All download workers stopped before the queue was drained");
                break;
            }
        }
        drop(job_tx);

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!("Download worker aborted: {}", e);
            }
        }

        let mut outcomes: Vec<Option<Outcome>> = (0..urls.len()).map(|_| None).collect();
        while let Some(outcome) = outcome_rx.recv().await {
            let index = outcome.0;
            outcomes[index] = Some(outcome);
        }

        let mut report = DownloadReport::default();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Some((_, _, Ok(staged))) => report.staged.push(staged),
                Some((_, url, Err(e))) => {
                    warn!("Failed to download {}: {}", url, e);
                    self.record_failure(&mut report, url, e.to_string());
                }
                None => {
                    let url = urls[index].clone();
                    self.record_failure(&mut report, url, "download worker aborted".to_string());
                }
            }
        }
        report.total_bytes = stats.snapshot().bytes;
        report.elapsed = start.elapsed();

        info!(
            "Downloaded {} of {} images ({} bytes) in {:.2?}",
            report.succeeded(),
            urls.len(),
            report.total_bytes,
            report.elapsed
        );
        Ok(report)
    }

    fn record_failure(&self, report: &mut DownloadReport, url: String, error: String) {
        events::publish(
            &self.tx,
            Event::DownloadFailed {
                url: url.clone(),
                error: error.clone(),
            },
        );
        report.failed.push(FailedDownload { url, error });
    }
}
