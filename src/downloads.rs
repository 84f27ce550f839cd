use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A fully written download sitting in the staging area.
#[derive(Clone, Debug, Serialize)]
pub struct StagedImage {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub source_url: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct DownloadTotals {
    pub files: u64,
    pub bytes: u64,
}

/// Byte accounting shared by every download of one batch.
#[derive(Clone, Debug, Default)]
pub struct DownloadStats {
    inner: Arc<Mutex<DownloadTotals>>,
}

impl DownloadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: u64) {
        let mut totals = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        totals.files += 1;
        totals.bytes += bytes;
    }

    pub fn snapshot(&self) -> DownloadTotals {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FailedDownload {
    pub url: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DownloadReport {
    pub staged: Vec<StagedImage>,
    pub failed: Vec<FailedDownload>,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl DownloadReport {
    pub fn succeeded(&self) -> usize {
        self.staged.len()
    }

    pub fn failed(&self) -> usize {
        self.failed.len()
    }
}
