//! Image collaborator boundary.
//!
//! The pipeline never touches pixels itself. It filters attachments by
//! MIME type, hands each one to an `ImageProcessor`, and collects the
//! resulting `ProcessedImage`s. Slots are assigned later by placement.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::model::{Attachment, ProcessedImage, Warning};
use crate::pipeline::Outcome;

/// MIME types accepted by the image processor.
pub const SUPPORTED_IMAGE_FORMATS: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

pub fn is_supported(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    SUPPORTED_IMAGE_FORMATS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(essence))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// 1-100.
    pub quality: u8,
    /// Output encoding, e.g. `jpeg`.
    pub format: String,
    pub watermark: Option<String>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            quality: 85,
            format: "jpeg".into(),
            watermark: None,
        }
    }
}

/// An attachment on disk, ready for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSource {
    pub email_id: String,
    pub attachment: Attachment,
    pub path: PathBuf,
}

/// Turns a raw attachment into a publishable image.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process(
        &self,
        source: &ImageSource,
        options: &ProcessingOptions,
    ) -> Result<ProcessedImage, PipelineError>;
}

/// Process every supported attachment in `sources`, in order.
///
/// Unsupported types and per-image failures become warnings. Only
/// cancellation aborts the run.
pub async fn process_attachments(
    processor: &dyn ImageProcessor,
    sources: &[ImageSource],
    options: &ProcessingOptions,
    cancel: &CancellationToken,
) -> Result<Outcome<Vec<ProcessedImage>>, PipelineError> {
    let mut images = Vec::with_capacity(sources.len());
    let mut warnings = Vec::new();

    for source in sources {
        let attachment = &source.attachment;
        if !is_supported(&attachment.mime_type) {
            debug!(attachment_id = %attachment.id, mime_type = %attachment.mime_type, "Skipping non-image attachment");
            warnings.push(Warning::UnsupportedImage {
                attachment_id: attachment.id.clone(),
                mime_type: attachment.mime_type.clone(),
            });
            continue;
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        match processor.process(source, options).await {
            Ok(image) => images.push(image),
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(attachment_id = %attachment.id, error = %e, "Image processing failed");
                warnings.push(Warning::ImageSkipped {
                    attachment_id: attachment.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        processed = images.len(),
        skipped = warnings.len(),
        "Attachment processing complete"
    );
    Ok(Outcome::new(images, warnings))
}

/// Stores attachment bytes unchanged in `output_dir`.
///
/// Dimensions are read from PNG, GIF and JPEG headers when present.
#[derive(Debug, Clone)]
pub struct PassthroughProcessor {
    output_dir: PathBuf,
}

impl PassthroughProcessor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl ImageProcessor for PassthroughProcessor {
    async fn process(
        &self,
        source: &ImageSource,
        options: &ProcessingOptions,
    ) -> Result<ProcessedImage, PipelineError> {
        let attachment = &source.attachment;
        if options.watermark.is_some() {
            debug!(attachment_id = %attachment.id, "Passthrough processor ignores watermark");
        }

        let bytes = tokio::fs::read(&source.path).await.map_err(|e| {
            PipelineError::Validation(format!("cannot read {}: {e}", source.path.display()))
        })?;

        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            PipelineError::Validation(format!("cannot create {}: {e}", self.output_dir.display()))
        })?;

        let processed_name = format!("{}-{}", attachment.id, safe_file_name(&attachment.filename));
        let target = self.output_dir.join(&processed_name);
        tokio::fs::write(&target, &bytes).await.map_err(|e| {
            PipelineError::Validation(format!("cannot write {}: {e}", target.display()))
        })?;

        let (width, height) = dimensions(&bytes).unwrap_or((0, 0));
        debug!(
            attachment_id = %attachment.id,
            path = %target.display(),
            width,
            height,
            "Stored image"
        );

        Ok(ProcessedImage {
            id: attachment.id.clone(),
            original_name: attachment.filename.clone(),
            processed_name,
            path: target.to_string_lossy().into_owned(),
            size: bytes.len() as u64,
            width,
            height,
            position: 0,
            is_featured: false,
            alt_text: None,
            caption: None,
        })
    }
}

/// Last path component of `name`, with anything odd replaced.
pub fn safe_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "image".into()
    } else {
        cleaned
    }
}

/// Pixel dimensions from an encoded image header.
fn dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") && bytes.len() >= 24 {
        let w = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
        let h = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        return Some((w, h));
    }
    if bytes.starts_with(b"GIF8") && bytes.len() >= 10 {
        let w = u16::from_le_bytes([bytes[6], bytes[7]]) as u32;
        let h = u16::from_le_bytes([bytes[8], bytes[9]]) as u32;
        return Some((w, h));
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return jpeg_dimensions(bytes);
    }
    None
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = bytes[i + 1];
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        // SOF0..SOF15, except DHT (C4), JPG (C8) and DAC (CC).
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            let h = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]) as u32;
            let w = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]) as u32;
            return Some((w, h));
        }
        i += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
        bytes
    }

    fn source(dir: &Path, id: &str, name: &str, mime: &str, bytes: &[u8]) -> ImageSource {
        let path = dir.join(format!("raw-{id}"));
        std::fs::write(&path, bytes).unwrap();
        ImageSource {
            email_id: "m1".into(),
            attachment: Attachment {
                id: id.into(),
                filename: name.into(),
                mime_type: mime.into(),
                size: bytes.len() as u64,
                is_image: mime.starts_with("image/"),
            },
            path,
        }
    }

    #[test]
    fn mime_filter() {
        assert!(is_supported("image/jpeg"));
        assert!(is_supported("IMAGE/PNG; name=x.png"));
        assert!(!is_supported("image/svg+xml"));
        assert!(!is_supported("application/pdf"));
    }

    #[test]
    fn reads_header_dimensions() {
        assert_eq!(dimensions(&png(640, 480)), Some((640, 480)));
        assert_eq!(dimensions(b"GIF89a\x10\x00\x20\x00"), Some((16, 32)));
        let jpeg = [
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, 0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01,
            0x00, 0x02, 0x00, 0x03,
        ];
        assert_eq!(dimensions(&jpeg), Some((512, 256)));
        assert_eq!(dimensions(b"nope"), None);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("zdjęcie 1.jpg"), "zdjęcie_1.jpg");
        assert_eq!(safe_file_name(".."), "image");
    }

    #[tokio::test]
    async fn passthrough_stores_and_skips() {
        let raw = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let sources = vec![
            source(raw.path(), "a1", "hero.png", "image/png", &png(800, 600)),
            source(raw.path(), "a2", "notes.pdf", "application/pdf", b"%PDF"),
        ];
        let mut missing = source(raw.path(), "a3", "gone.jpg", "image/jpeg", b"x");
        missing.path = raw.path().join("does-not-exist");
        let mut sources = sources;
        sources.push(missing);

        let processor = PassthroughProcessor::new(out.path());
        let outcome = process_attachments(
            &processor,
            &sources,
            &ProcessingOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.value.len(), 1);
        let image = &outcome.value[0];
        assert_eq!(image.id, "a1");
        assert_eq!(image.original_name, "hero.png");
        assert_eq!((image.width, image.height), (800, 600));
        assert!(Path::new(&image.path).exists());
        assert!(matches!(outcome.warnings[0], Warning::UnsupportedImage { .. }));
        assert!(matches!(outcome.warnings[1], Warning::ImageSkipped { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts() {
        let raw = tempfile::tempdir().unwrap();
        let sources = vec![source(raw.path(), "a1", "x.png", "image/png", &png(1, 1))];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = process_attachments(
            &PassthroughProcessor::new(raw.path().join("out")),
            &sources,
            &ProcessingOptions::default(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
