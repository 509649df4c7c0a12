//! Attendance QR decoding: upload validation, image decoding with fallbacks,
//! and payload normalization.

pub mod decoder;
pub mod payload;
pub mod preprocess;

use std::path::Path;

use image::GrayImage;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::models::attendance::ScanPayload;
use decoder::{QrDecoder, default_decoders};

const ALLOWED_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "bmp", "gif"];
const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/bmp", "image/gif"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRejection {
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("could not read image: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrError {
    #[error(transparent)]
    ImageRejected(#[from] ImageRejection),

    #[error(
        "No QR code found in image. Make sure the code is clearly visible and undamaged, \
         the image is well lit and the camera is in focus."
    )]
    NotDetected,

    #[error("invalid QR data: {0}")]
    InvalidPayload(String),
}

/// Which image an attempt ran against.
#[derive(Debug, Clone, Copy)]
enum Pass {
    Raw,
    Enhanced,
}

pub struct QrScanner {
    decoders: Vec<Box<dyn QrDecoder>>,
    max_upload_bytes: usize,
}

impl QrScanner {
    pub fn new(max_upload_bytes: usize) -> Self {
        Self::with_decoders(default_decoders(), max_upload_bytes)
    }

    pub fn with_decoders(decoders: Vec<Box<dyn QrDecoder>>, max_upload_bytes: usize) -> Self {
        Self {
            decoders,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Cheap checks on an upload before any decoding work.
    pub fn validate(&self, bytes: &[u8], filename: &str, content_type: &str) -> Result<(), QrError> {
        if bytes.len() > self.max_upload_bytes {
            return Err(ImageRejection::TooLarge {
                size: bytes.len(),
                max: self.max_upload_bytes,
            }
            .into());
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ImageRejection::UnsupportedType(format!(
                "extension '.{extension}' (allowed: {})",
                ALLOWED_EXTENSIONS.join(", ")
            ))
            .into());
        }

        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(ImageRejection::UnsupportedType(format!(
                "MIME type '{mime}' (allowed: {})",
                ALLOWED_MIME_TYPES.join(", ")
            ))
            .into());
        }

        Ok(())
    }

    /// Runs every decoder on the raw image, then every decoder on the
    /// enhanced image, and returns the first text found.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, QrError> {
        let raw = load_gray(bytes)?;
        if let Some(text) = self.attempt(&raw, Pass::Raw) {
            return Ok(text);
        }

        debug!("Raw decode failed, retrying on enhanced image");
        let enhanced = preprocess::enhance(&raw);
        if let Some(text) = self.attempt(&enhanced, Pass::Enhanced) {
            return Ok(text);
        }

        warn!("No QR code detected in image");
        Err(QrError::NotDetected)
    }

    fn attempt(&self, image: &GrayImage, pass: Pass) -> Option<String> {
        self.decoders.iter().find_map(|decoder| {
            let text = decoder.decode(image)?;
            info!(decoder = decoder.name(), ?pass, "QR code detected");
            Some(text)
        })
    }

    pub fn parse(&self, raw: &str) -> Result<ScanPayload, QrError> {
        payload::parse(raw)
    }

    /// validate, decode, parse.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn scan_file(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<ScanPayload, QrError> {
        self.validate(bytes, filename, content_type)?;
        let text = self.decode(bytes)?;
        let payload = self.parse(&text)?;
        info!(team_id = %payload.team_id, "QR payload parsed");
        Ok(payload)
    }
}

fn load_gray(bytes: &[u8]) -> Result<GrayImage, QrError> {
    let image = image::load_from_memory(bytes)
        .map_err(|err| ImageRejection::Unreadable(err.to_string()))?;
    Ok(image.to_luma8())
}
