use crate::{
    error::{ClassifierError, Result},
    preprocessing::RawImage,
};
use async_trait::async_trait;
use std::io::Cursor;

const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<RawImage>;
}

#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| e.to_string())?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(format!(
                    "body of {} bytes exceeds the {} byte limit",
                    length, self.max_bytes
                ));
            }
        }

        // Content-Length may be absent or wrong; enforce the cap while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(format!("body exceeds the {} byte limit", self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::default(), DEFAULT_MAX_IMAGE_BYTES)
    }
}

#[async_trait]
impl ImageSource for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<RawImage> {
        let fetch_failed = |reason: String| ClassifierError::FetchFailed {
            url: url.to_string(),
            reason,
        };

        let body = self.download(url).await.map_err(fetch_failed)?;
        tracing::debug!("Fetched {} bytes from {}", body.len(), url);

        // CPU-bound; must not stall the caller's timeout.
        tokio::task::spawn_blocking(move || decode_image(&body))
            .await
            .map_err(|e| fetch_failed(format!("decode task failed: {}", e)))?
            .map_err(fetch_failed)
    }
}

/// Decodes an encoded image (format sniffed from its content) into RGB.
pub fn decode_image(data: &[u8]) -> std::result::Result<RawImage, String> {
    let image_reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let image = image_reader
        .decode()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    Ok(image.to_rgb8())
}
