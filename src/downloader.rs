use crate::downloads::{DownloadStats, StagedImage};
use crate::error::FetchError;
use crate::events::{self, Event, EventSender};
use crate::fetch::ImageSource;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Upper bound on downloads performing network I/O at the same time.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Fetches single images into the staging area.
///
/// Clones share the permit pool, the byte accounting and the event bus, so one
/// `Downloader` can be handed to every worker of a batch. Bodies are streamed to a
/// hidden `.<id>.part` file and only renamed onto the staged name once complete.
#[derive(Clone)]
pub struct Downloader {
    source: Arc<dyn ImageSource>,
    permits: Arc<Semaphore>,
    staging_dir: PathBuf,
    stats: DownloadStats,
    tx: EventSender,
}

impl Downloader {
    pub fn new(
        source: Arc<dyn ImageSource>,
        staging_dir: PathBuf,
        stats: DownloadStats,
        tx: EventSender,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            source,
            permits,
            staging_dir,
            stats,
            tx,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<StagedImage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let filename = filename_from_url(&parsed).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "path has no usable final segment".to_string(),
        })?;
        let dest = self.staging_dir.join(&filename);

        // Released on every return path when the guard drops.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Io(std::io::Error::other("download permit pool closed")))?;

        let id = Uuid::new_v4().to_string();
        info!("Downloading image from {} (ID: {})", url, id);
        events::publish(
            &self.tx,
            Event::DownloadStarted {
                id: id.clone(),
                url: url.to_string(),
            },
        );

        let partial = self.staging_dir.join(format!(".{}.part", id));
        let fetched = async {
            self.source.fetch_to(&parsed, &partial).await?;
            let size = tokio::fs::metadata(&partial).await?.len();
            tokio::fs::rename(&partial, &dest).await?;
            Ok::<u64, FetchError>(size)
        }
        .await;
        let size = match fetched {
            Ok(size) => size,
            Err(e) => {
                warn!("Download {} failed: {}", id, e);
                if let Err(rm) = tokio::fs::remove_file(&partial).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Could not remove partial download {:?}: {}", partial, rm);
                }
                return Err(e);
            }
        };
        self.stats.record(size);

        info!("Image [size: {} bytes] saved to {:?} (ID: {})", size, dest, id);
        events::publish(
            &self.tx,
            Event::DownloadFinished {
                id,
                filename: filename.clone(),
                size,
            },
        );

        Ok(StagedImage {
            filename,
            path: dest,
            size,
            source_url: url.to_string(),
        })
    }
}

/// Staging filename for a URL: its final path segment, percent-decoded.
///
/// Dot-prefixed names are reserved for in-progress downloads.
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let decoded = percent_decode_str(segment).decode_utf8().ok()?;
    if decoded.is_empty() || decoded.starts_with('.') || decoded.contains(['/', '\\']) {
        return None;
    }
    Some(decoded.into_owned())
}
