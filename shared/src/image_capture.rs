//! Photo intake: size ceiling, format sniffing, data-URL encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::ImageData;
use crate::MAX_IMAGE_BYTES;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image is {size} bytes, limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("unable to decode image: {reason}")]
    DecodeFailed { reason: String },
}

impl ImageError {
    fn decode(reason: impl Into<String>) -> Self {
        Self::DecodeFailed {
            reason: reason.into(),
        }
    }
}

/// A file picked by the reporter, already read into memory.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPhoto {
    pub image: ImageData,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
}

#[derive(Debug, Clone)]
pub struct ImageCapture {
    max_bytes: usize,
}

impl Default for ImageCapture {
    fn default() -> Self {
        Self::new(MAX_IMAGE_BYTES)
    }
}

impl ImageCapture {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[instrument(skip(self, file), fields(name = %file.name, size = file.bytes.len()))]
    pub async fn accept(&self, file: SelectedFile) -> Result<CapturedPhoto, ImageError> {
        self.check_size(file.bytes.len() as u64)?;
        tokio::task::spawn_blocking(move || encode(&file.bytes))
            .await
            .map_err(|e| ImageError::decode(format!("encoding task failed: {e}")))?
    }

    /// Reads a photo from disk, refusing oversized files before reading them.
    #[instrument(skip(self))]
    pub async fn accept_path(&self, path: &Path) -> Result<CapturedPhoto, ImageError> {
        let path: PathBuf = path.to_path_buf();
        let max = self.max_bytes as u64;

        tokio::task::spawn_blocking(move || {
            let size = std::fs::metadata(&path)
                .map_err(|e| ImageError::decode(format!("{}: {e}", path.display())))?
                .len();
            if size > max {
                return Err(ImageError::TooLarge { size, max });
            }
            let bytes = std::fs::read(&path)
                .map_err(|e| ImageError::decode(format!("{}: {e}", path.display())))?;
            if bytes.len() as u64 > max {
                return Err(ImageError::TooLarge {
                    size: bytes.len() as u64,
                    max,
                });
            }
            encode(&bytes)
        })
        .await
        .map_err(|e| ImageError::decode(format!("encoding task failed: {e}")))?
    }

    fn check_size(&self, size: u64) -> Result<(), ImageError> {
        let max = self.max_bytes as u64;
        if size > max {
            return Err(ImageError::TooLarge { size, max });
        }
        Ok(())
    }
}

fn encode(bytes: &[u8]) -> Result<CapturedPhoto, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::decode("file is empty"));
    }

    let format = image::guess_format(bytes).map_err(|e| ImageError::decode(e.to_string()))?;
    let (width, height) = image::ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| ImageError::decode(e.to_string()))?;
    let mime_type = format.to_mime_type();

    debug!(mime_type, width, height, "photo accepted");

    Ok(CapturedPhoto {
        image: ImageData::from_base64(mime_type, &STANDARD.encode(bytes)),
        mime_type,
        width,
        height,
        byte_len: bytes.len(),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([34, 139, 34]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 80, 20]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }
}
