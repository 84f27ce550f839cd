use crate::config::Settings;
use crate::coordinator::DownloadCoordinator;
use crate::downloads::DownloadReport;
use crate::error::Result;
use crate::events::{self, Event, EventSender};
use crate::fetch::{HttpSource, ImageSource};
use crate::resize::{ResizePipeline, ResizeReport};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ThumbnailReport {
    pub downloads: DownloadReport,
    pub resizes: ResizeReport,
    pub elapsed: Duration,
}

impl ThumbnailReport {
    pub fn is_clean(&self) -> bool {
        self.downloads.failed.is_empty() && self.resizes.failed.is_empty()
    }
}

/// Downloads a batch of images, then turns them into thumbnails.
pub struct ThumbnailService {
    coordinator: DownloadCoordinator,
    pipeline: ResizePipeline,
    tx: EventSender,
}

impl ThumbnailService {
    pub fn new(settings: &Settings) -> Self {
        Self::with_source(settings, Arc::new(HttpSource::new()))
    }

    pub fn with_source(settings: &Settings, source: Arc<dyn ImageSource>) -> Self {
        let (tx, _) = events::channel(256);
        let staging_dir = settings.staging_dir();
        let output_dir = settings.output_dir();
        Self {
            coordinator: DownloadCoordinator::new(source, staging_dir.clone(), tx.clone()),
            pipeline: ResizePipeline::new(staging_dir, output_dir, tx.clone()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub async fn download_images(&self, urls: &[String]) -> Result<DownloadReport> {
        self.coordinator.download_images(urls).await
    }

    pub async fn perform_resizing(&self) -> Result<ResizeReport> {
        self.pipeline.perform_resizing().await
    }

    pub async fn make_thumbnails(&self, urls: &[String]) -> Result<ThumbnailReport> {
        info!("START make_thumbnails");
        let start = Instant::now();

        let downloads = self.download_images(urls).await?;
        events::publish(
            &self.tx,
            Event::PhaseBarrier {
                staged: downloads.succeeded(),
                failed: downloads.failed(),
            },
        );
        let resizes = self.perform_resizing().await?;

        let elapsed = start.elapsed();
        info!("END make_thumbnails in {:.2?}", elapsed);
        Ok(ThumbnailReport {
            downloads,
            resizes,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn settings(home: &Path) -> Settings {
        Settings {
            home_dir: home.to_path_buf(),
            log_level: "debug".to_string(),
            log_file: None,
            urls: Vec::new(),
        }
    }

    fn count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    async fn serve(server: &MockServer, route: &str, body: Vec<u8>, delay_ms: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body)
                    .set_delay(Duration::from_millis(delay_ms)),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_make_thumbnails_end_to_end() {
        let server = MockServer::start().await;
        serve(&server, "/img/first.png", png_bytes(400, 200), 50).await;
        serve(&server, "/img/second.png", png_bytes(120, 240), 150).await;

        let home = tempdir().unwrap();
        let service = ThumbnailService::new(&settings(home.path()));
        let mut rx = service.subscribe();

        let urls = vec![
            format!("{}/img/first.png", server.uri()),
            format!("{}/img/second.png", server.uri()),
        ];
        let report = service.make_thumbnails(&urls).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.downloads.succeeded(), 2);
        assert_eq!(report.resizes.succeeded(), 2);
        assert_eq!(count(&home.path().join("incoming")), 0);
        assert_eq!(count(&home.path().join("outgoing")), 6);
        assert!(home.path().join("outgoing/second_64.png").exists());

        // No resize may start before the last download has finished.
        let mut finished = 0;
        let mut barrier_seen = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::DownloadFinished { .. } => {
                    assert!(!barrier_seen, "download finished after the phase barrier");
                    finished += 1;
                }
                Event::PhaseBarrier { staged, .. } => {
                    assert_eq!(finished, 2);
                    assert_eq!(staged, 2);
                    barrier_seen = true;
                }
                Event::ResizeStarted { .. } => {
                    assert!(barrier_seen, "resize started before downloads completed");
                    assert_eq!(finished, 2);
                }
                _ => {}
            }
        }
        assert!(barrier_seen);
    }

    #[tokio::test]
    async fn test_partial_failures_are_reported() {
        let server = MockServer::start().await;
        serve(&server, "/ok.png", png_bytes(64, 64), 0).await;
        serve(&server, "/garbage.png", b"<html>nope</html>".to_vec(), 0).await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let home = tempdir().unwrap();
        let service = ThumbnailService::new(&settings(home.path()));
        let urls = vec![
            format!("{}/ok.png", server.uri()),
            format!("{}/gone.png", server.uri()),
            format!("{}/garbage.png", server.uri()),
        ];
        let report = service.make_thumbnails(&urls).await.unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.downloads.succeeded(), 2);
        assert_eq!(report.downloads.failed(), 1);
        assert_eq!(report.resizes.succeeded(), 1);
        assert_eq!(report.resizes.failed(), 1);
        assert_eq!(count(&home.path().join("outgoing")), 3);
        assert!(home.path().join("incoming/garbage.png").exists());
    }

    #[tokio::test]
    async fn test_empty_url_list_touches_nothing() {
        let home = tempdir().unwrap();
        let service = ThumbnailService::new(&settings(home.path()));

        let report = service.make_thumbnails(&[]).await.unwrap();
        assert!(report.is_clean());
        assert!(!home.path().join("incoming").exists());
        assert!(!home.path().join("outgoing").exists());
    }
}
