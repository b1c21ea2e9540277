use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::feed::{FetchError, Fetcher};

/// JPEG quality used when none is configured.
pub const DEFAULT_IMAGE_QUALITY: u8 = 30;

/// Media type of every compressed asset.
pub const IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// Hex characters kept from the source-URL digest.
const ASSET_ID_LEN: usize = 32;

/// Per-image failure. Never fails a page: the image is dropped instead.
#[derive(Debug, Error)]
pub enum AssetError {
    /// Image could not be downloaded
    #[error("Image fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Bytes are not a decodable image, or re-encoding failed
    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    /// The blocking encode task panicked or was cancelled
    #[error("Image encode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A re-encoded image ready to be embedded in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedAsset {
    /// Derived from the source URL, so equal sources share an id
    pub id: String,
    pub source: String,
    pub media_type: &'static str,
    /// Base64 of the JPEG bytes
    pub data: String,
}

impl CompressedAsset {
    /// Path of the asset inside the book's content directory.
    pub fn path(&self) -> String {
        format!("images/{}.jpg", self.id)
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

/// Stable asset id for an image source URL: truncated hex SHA-256.
pub fn asset_id(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(ASSET_ID_LEN);
    hex
}

/// Decode any supported image format and re-encode it as JPEG.
///
/// CPU-bound; call from a blocking thread.
pub fn encode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = decoded.to_rgb8();

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(out)
}

/// Fetches images and turns them into [`CompressedAsset`]s.
#[derive(Clone)]
pub struct ImageCompressor {
    fetcher: Fetcher,
    quality: u8,
}

impl ImageCompressor {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            quality: DEFAULT_IMAGE_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Fetch `source_url` and re-encode it.
    ///
    /// # Errors
    ///
    /// Any [`AssetError`]; callers are expected to log and skip the image.
    pub async fn compress(&self, source_url: &str) -> Result<CompressedAsset, AssetError> {
        let bytes = self.fetcher.fetch(source_url).await?;
        let original_len = bytes.len();

        let quality = self.quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&bytes, quality)).await??;

        tracing::debug!(
            url = %source_url,
            original_bytes = original_len,
            compressed_bytes = jpeg.len(),
            "Compressed image"
        );

        Ok(CompressedAsset {
            id: asset_id(source_url),
            source: source_url.to_string(),
            media_type: IMAGE_MEDIA_TYPE,
            data: STANDARD.encode(jpeg),
        })
    }
}

type AssetCell = Arc<OnceCell<Option<Arc<CompressedAsset>>>>;

/// Deduplicating front for an [`ImageCompressor`], shared by every page of
/// one conversion.
///
/// Holds one once-cell per source URL: concurrent requests for the same URL
/// wait on a single fetch, and a failure is remembered as `None` so it is not
/// retried by later pages.
pub struct AssetStore {
    compressor: ImageCompressor,
    cells: Mutex<HashMap<String, AssetCell>>,
}

impl AssetStore {
    pub fn new(compressor: ImageCompressor) -> Self {
        Self {
            compressor,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// The asset for `source_url`, compressing it on first request.
    ///
    /// Returns `None` if the image could not be fetched or encoded; the
    /// failure is logged once.
    pub async fn resolve(&self, source_url: &str) -> Option<Arc<CompressedAsset>> {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(source_url.to_string()).or_default())
        };

        cell.get_or_init(|| async {
            match self.compressor.compress(source_url).await {
                Ok(asset) => Some(Arc::new(asset)),
                Err(e) => {
                    tracing::warn!(url = %source_url, error = %e, "Skipping image");
                    None
                }
            }
        })
        .await
        .clone()
    }

    /// Every successfully compressed asset, ordered by id.
    pub fn assets(&self) -> Vec<Arc<CompressedAsset>> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        let mut assets: Vec<_> = cells
            .values()
            .filter_map(|cell| cell.get().cloned().flatten())
            .collect();
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn test_compressor() -> ImageCompressor {
        ImageCompressor::new(Fetcher::new(reqwest::Client::new()).allow_private_hosts(true))
    }

    #[test]
    fn test_asset_id_is_stable_hex() {
        let id = asset_id("http://x/img.png");
        assert_eq!(id.len(), ASSET_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, asset_id("http://x/img.png"));
        assert_ne!(id, asset_id("http://x/other.png"));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let jpeg = encode_jpeg(&png_bytes(), DEFAULT_IMAGE_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_encode_jpeg_rejects_garbage() {
        assert!(encode_jpeg(b"definitely not an image", 30).is_err());
    }

    #[tokio::test]
    async fn test_compress_round_trips_base64() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
            .mount(&mock_server)
            .await;

        let url = format!("{}/a.png", mock_server.uri());
        let asset = test_compressor().compress(&url).await.unwrap();

        assert_eq!(asset.id, asset_id(&url));
        assert_eq!(asset.media_type, "image/jpeg");
        assert_eq!(asset.path(), format!("images/{}.jpg", asset.id));
        let bytes = asset.decode().unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_compress_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = test_compressor()
            .compress(&format!("{}/missing.png", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(AssetError::Fetch(FetchError::HttpStatus(404)))));
    }

    #[tokio::test]
    async fn test_store_fetches_each_url_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(png_bytes())
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = Arc::new(AssetStore::new(test_compressor()));
        let url = format!("{}/img.png", mock_server.uri());

        let (a, b) = tokio::join!(store.resolve(&url), store.resolve(&url));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.assets().len(), 1);
    }

    #[tokio::test]
    async fn test_store_remembers_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not an image"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = AssetStore::new(test_compressor());
        let url = format!("{}/broken.png", mock_server.uri());

        assert!(store.resolve(&url).await.is_none());
        assert!(store.resolve(&url).await.is_none());
        assert!(store.assets().is_empty());
    }
}
