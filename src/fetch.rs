use crate::error::FetchError;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

/// Transport that writes the body behind a URL to a local file.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Streams `url` into `dest`, returning the number of bytes written.
    async fn fetch_to(&self, url: &Url, dest: &Path) -> Result<u64, FetchError>;
}

#[derive(Clone, Default)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageSource for HttpSource {
    async fn fetch_to(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let mut file = File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(item) = stream.next().await {
            let chunk = item?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!("streamed {} bytes from {} to {:?}", written, url, dest);
        Ok(written)
    }
}
