//! Cover image storage.
//!
//! Uploaded covers are decoded, scaled down to fit a square bounding box and
//! re-encoded as JPEG before being written to the upload directory. Stored
//! covers are addressed by public URL: `<public_url>/images/<file>`.

use crate::error::{AppError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// Path prefix under which stored covers are served.
pub const PUBLIC_PREFIX: &str = "/images";

/// Longest stem kept from the uploaded file name.
const MAX_STEM_LEN: usize = 64;

/// Decode `data`, shrink it to fit `max_dimension` and encode it as JPEG.
///
/// Images already inside the box keep their size.
pub fn optimize(data: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::Processing(format!("Failed to read image: {}", e)))?
        .decode()
        .map_err(|e| AppError::Processing(format!("Failed to decode image: {}", e)))?;

    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut jpeg_data = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| AppError::Processing(format!("Failed to encode JPEG: {}", e)))?;

    Ok(jpeg_data)
}

/// Unique file name for an upload: `<millis>-<random>-<stem>.jpg`.
pub fn stored_name(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let mut clean: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    if clean.is_empty() {
        clean.push_str("cover");
    }

    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}.jpg",
        chrono::Utc::now().timestamp_millis(),
        &unique[..8],
        clean
    )
}

/// Filesystem-backed cover store.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    public_base: String,
    max_dimension: u32,
    quality: u8,
}

impl ImageStore {
    /// Create the store, making sure the upload directory exists.
    pub fn new(
        dir: impl Into<PathBuf>,
        public_url: &str,
        max_dimension: u32,
        quality: u8,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            public_base: format!("{}{}", public_url.trim_end_matches('/'), PUBLIC_PREFIX),
            max_dimension,
            quality,
        })
    }

    /// Upload directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Optimize and persist an uploaded image, returning its public URL.
    pub async fn store(&self, data: Vec<u8>, original_name: &str) -> Result<String> {
        let max_dimension = self.max_dimension;
        let quality = self.quality;
        let input_len = data.len();

        let encoded = tokio::task::spawn_blocking(move || optimize(&data, max_dimension, quality))
            .await
            .map_err(|e| AppError::Internal(format!("Image task failed: {}", e)))??;

        let name = stored_name(original_name);
        tokio::fs::write(self.dir.join(&name), &encoded).await?;

        tracing::debug!(
            file = %name,
            input_bytes = input_len,
            stored_bytes = encoded.len(),
            "Stored cover image"
        );

        Ok(format!("{}/{}", self.public_base, name))
    }

    /// Resolve a reference to a path inside the upload directory.
    ///
    /// Only the last path segment is used, so a reference can never point
    /// outside the directory.
    pub fn path_for(&self, reference: &str) -> Option<PathBuf> {
        let name = reference
            .split(['?', '#'])
            .next()?
            .rsplit('/')
            .next()?;

        if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
            return None;
        }

        Some(self.dir.join(name))
    }

    /// Delete a stored image.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let path = self.path_for(reference).ok_or_else(|| {
            AppError::InvalidInput(format!("Not a stored image reference: {}", reference))
        })?;

        tokio::fs::remove_file(&path).await?;
        tracing::debug!(path = %path.display(), "Removed cover image");
        Ok(())
    }

    /// Remove an image in the background; failures are only logged.
    pub fn spawn_removal(&self, reference: String) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.remove(&reference).await {
                tracing::warn!(image = %reference, error = %e, "Failed to remove cover image");
            }
        })
    }
}
