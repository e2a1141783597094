use async_trait::async_trait;
use image::ImageFormat;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Encodings the detect endpoint accepts
const ACCEPTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::Bmp,
];

/// Produces still images on demand. Awaited as the trigger of each pipeline run.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn capture_image(&self) -> Result<Vec<u8>, PipelineError>;
}

/// Reads a captured still from disk.
pub struct FileImageSource {
    path: PathBuf,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    async fn capture_image(&self) -> Result<Vec<u8>, PipelineError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            PipelineError::CaptureFailed(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        check_encoding(&bytes)?;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "Image captured");
        Ok(bytes)
    }
}

/// Reject buffers the service would refuse before they cost a request.
pub fn check_encoding(bytes: &[u8]) -> Result<ImageFormat, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::CaptureFailed("image is empty".to_string()));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| PipelineError::CaptureFailed(format!("unrecognised image data: {}", e)))?;

    if ACCEPTED_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(PipelineError::CaptureFailed(format!(
            "unsupported image format {:?}",
            format
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";

    #[test]
    fn test_check_encoding() {
        assert_eq!(check_encoding(PNG_MAGIC).unwrap(), ImageFormat::Png);
        assert_eq!(check_encoding(JPEG_MAGIC).unwrap(), ImageFormat::Jpeg);
        assert!(check_encoding(&[]).is_err());
        assert!(check_encoding(b"plain text, not an image").is_err());
    }

    #[tokio::test]
    async fn test_file_source_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jpg");
        std::fs::write(&path, JPEG_MAGIC).unwrap();

        let source = FileImageSource::new(&path);
        let bytes = source.capture_image().await.unwrap();
        assert_eq!(bytes, JPEG_MAGIC);
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileImageSource::new(dir.path().join("missing.jpg"));

        let err = source.capture_image().await.unwrap_err();
        assert!(matches!(err, PipelineError::CaptureFailed(_)));
    }
}
