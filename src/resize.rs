use crate::error::{Error, ResizeError, Result};
use crate::events::{self, Event, EventSender};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Widths, in pixels, of the variants produced for every staged image.
pub const TARGET_WIDTHS: [u32; 3] = [32, 64, 200];

/// Height that keeps the `width`/`height` aspect ratio at `target_width`.
pub fn target_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = (target_width as f64 * height as f64 / width as f64).round();
    (scaled as u32).max(1)
}

/// Resizes `img` to `target_width`, preserving its aspect ratio.
pub fn resize_to_width(img: &DynamicImage, target_width: u32) -> DynamicImage {
    let height = target_height(img.width(), img.height(), target_width);
    img.resize_exact(target_width, height, FilterType::Lanczos3)
}

/// `<stem>_<width><.ext>` for a staged filename.
pub fn variant_filename(filename: &str, width: u32) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_else(|| filename.into());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, width, ext.to_string_lossy()),
        None => format!("{}_{}", stem, width),
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ThumbnailVariant {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct FailedResize {
    pub filename: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ResizeReport {
    pub processed: Vec<String>,
    pub variants: Vec<ThumbnailVariant>,
    pub failed: Vec<FailedResize>,
    pub elapsed: Duration,
}

impl ResizeReport {
    pub fn succeeded(&self) -> usize {
        self.processed.len()
    }

    pub fn failed(&self) -> usize {
        self.failed.len()
    }
}

/// Turns everything in the staging area into thumbnails, one image at a time.
#[derive(Clone)]
pub struct ResizePipeline {
    staging_dir: PathBuf,
    output_dir: PathBuf,
    tx: EventSender,
}

impl ResizePipeline {
    pub fn new(staging_dir: PathBuf, output_dir: PathBuf, tx: EventSender) -> Self {
        Self {
            staging_dir,
            output_dir,
            tx,
        }
    }

    pub async fn perform_resizing(&self) -> Result<ResizeReport> {
        let staged = self.staged_files()?;
        if staged.is_empty() {
            return Ok(ResizeReport::default());
        }
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Error::filesystem(&self.output_dir, e))?;

        info!("Beginning resize of {} images", staged.len());
        let start = Instant::now();
        let mut report = ResizeReport::default();

        for path in staged {
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            events::publish(
                &self.tx,
                Event::ResizeStarted {
                    filename: filename.clone(),
                },
            );

            let output_dir = self.output_dir.clone();
            let source = path.clone();
            let result = tokio::task::spawn_blocking(move || make_variants(&source, &output_dir))
                .await
                .map_err(ResizeError::from)
                .and_then(|r| r);

            match result {
                Ok(variants) => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        error!("Could not remove staged image {:?}: {}", path, e);
                        self.record_failure(&mut report, filename, ResizeError::Io(e));
                        report.variants.extend(variants);
                        continue;
                    }
                    events::publish(
                        &self.tx,
                        Event::ResizeFinished {
                            filename: filename.clone(),
                            variants: variants.len(),
                        },
                    );
                    report.processed.push(filename);
                    report.variants.extend(variants);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", filename, e);
                    self.record_failure(&mut report, filename, e);
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            "Created {} thumbnails from {} images in {:.2?} ({} failed)",
            report.variants.len(),
            report.succeeded(),
            report.elapsed,
            report.failed()
        );
        Ok(report)
    }

    fn staged_files(&self) -> Result<Vec<PathBuf>> {
        if !self.staging_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.staging_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::filesystem(&self.staging_dir, e.into()))?;
            // Dot files are downloads still being written.
            let in_progress = entry.file_name().to_string_lossy().starts_with('.');
            if entry.file_type().is_file() && !in_progress {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn record_failure(&self, report: &mut ResizeReport, filename: String, e: ResizeError) {
        events::publish(
            &self.tx,
            Event::ResizeFailed {
                filename: filename.clone(),
                error: e.to_string(),
            },
        );
        report.failed.push(FailedResize {
            filename,
            error: e.to_string(),
        });
    }
}

/// Decodes `source` once and writes one variant per target width.
///
/// Either every variant is written or none is left behind.
fn make_variants(
    source: &Path,
    output_dir: &Path,
) -> std::result::Result<Vec<ThumbnailVariant>, ResizeError> {
    let filename = source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let reader = ImageReader::open(source)?.with_guessed_format()?;
    let decoded_format = reader.format();
    let original = reader.decode().map_err(|e| ResizeError::Decode {
        path: source.to_path_buf(),
        source: e,
    })?;
    debug!(
        "Decoded {} ({}x{})",
        filename,
        original.width(),
        original.height()
    );

    let mut variants: Vec<ThumbnailVariant> = Vec::with_capacity(TARGET_WIDTHS.len());
    for width in TARGET_WIDTHS {
        let resized = resize_to_width(&original, width);
        let dest = output_dir.join(variant_filename(&filename, width));
        let format = ImageFormat::from_path(&dest)
            .ok()
            .or(decoded_format)
            .unwrap_or(ImageFormat::Png);

        if let Err(e) = resized.save_with_format(&dest, format) {
            for written in &variants {
                let _ = std::fs::remove_file(&written.path);
            }
            let _ = std::fs::remove_file(&dest);
            return Err(ResizeError::Encode { path: dest, source: e });
        }

        variants.push(ThumbnailVariant {
            source: filename.clone(),
            width: resized.width(),
            height: resized.height(),
            path: dest,
        });
    }
    Ok(variants)
}
