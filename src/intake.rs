use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PromptCraftError;

const MAX_ACTIVE_IMAGES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeSource {
    FilePicker,
    DragDrop,
    Clipboard,
}

impl IntakeSource {
    fn label(self) -> &'static str {
        match self {
            IntakeSource::FilePicker => "file_picker",
            IntakeSource::DragDrop => "drag_drop",
            IntakeSource::Clipboard => "clipboard",
        }
    }
}

/// A user-supplied file before it has been accepted.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(name: Option<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name,
            content_type: content_type.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, PromptCraftError> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            PromptCraftError::ImageReadError(format!("{}: {}", path.display(), err))
        })?;
        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(content_type_for_extension)
            .unwrap_or("application/octet-stream");
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string());
        Ok(Self::new(name, content_type, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.content_type.trim().to_ascii_lowercase().starts_with("image/")
    }
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

pub fn data_url(mime_type: &str, encoded: &str) -> String {
    format!("data:{};base64,{}", mime_type, encoded)
}

fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| err.to_string())?
        .into_dimensions()
        .map_err(|err| err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub id: String,
    pub raw_bytes: Vec<u8>,
    pub encoded_payload: String,
    pub mime_type: String,
    pub display_ref: String,
}

impl UploadedImage {
    fn decode(file: &IncomingFile) -> Result<Self, PromptCraftError> {
        if file.bytes.is_empty() {
            return Err(PromptCraftError::ImageReadError(
                "the file is empty".to_string(),
            ));
        }

        let sniffed = detect_mime_type(&file.bytes)
            .filter(|mime_type| mime_type.starts_with("image/"))
            .map(|mime_type| normalize_image_mime_type(&mime_type));

        // Formats the decoder lacks (gif, heic, avif, ...) are accepted on the sniffed type alone.
        let dimensions = match probe_dimensions(&file.bytes) {
            Ok(dimensions) => Some(dimensions),
            Err(err) if sniffed.is_some() => {
                debug!(
                    mime_type = ?sniffed,
                    "Skipping dimension probe for unsupported format: {}", err
                );
                None
            }
            Err(err) => return Err(PromptCraftError::ImageReadError(err)),
        };

        let mime_type =
            sniffed.unwrap_or_else(|| normalize_image_mime_type(&file.content_type));

        let encoded_payload = general_purpose::STANDARD.encode(&file.bytes);
        let display_ref = data_url(&mime_type, &encoded_payload);
        debug!(
            name = ?file.name,
            mime_type = %mime_type,
            dimensions = ?dimensions,
            bytes = file.bytes.len(),
            "Decoded uploaded image"
        );

        Ok(UploadedImage {
            id: uuid::Uuid::new_v4().simple().to_string(),
            raw_bytes: file.bytes.clone(),
            encoded_payload,
            mime_type,
            display_ref,
        })
    }

    /// Rebuilds an image from its persisted base64 payload.
    pub fn restore(id: &str, base64_data: &str, mime_type: &str) -> anyhow::Result<Self> {
        let raw_bytes = general_purpose::STANDARD.decode(base64_data.trim())?;
        if raw_bytes.is_empty() {
            return Err(anyhow::anyhow!("stored image payload is empty"));
        }
        let mime_type = normalize_image_mime_type(mime_type);
        Ok(UploadedImage {
            id: id.to_string(),
            raw_bytes,
            encoded_payload: base64_data.trim().to_string(),
            display_ref: data_url(&mime_type, base64_data.trim()),
            mime_type,
        })
    }
}

/// Holds the single active reference image and broadcasts changes to observers.
#[derive(Debug)]
pub struct ImageIntake {
    active: Option<UploadedImage>,
    sender: watch::Sender<Option<UploadedImage>>,
}

impl Default for ImageIntake {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageIntake {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            active: None,
            sender,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UploadedImage>> {
        self.sender.subscribe()
    }

    pub fn active(&self) -> Option<&UploadedImage> {
        self.active.as_ref()
    }

    pub fn count(&self) -> usize {
        usize::from(self.active.is_some())
    }

    /// Accepts at most one image. Non-image files are ignored; `Ok(None)` means
    /// nothing changed.
    pub fn accept(
        &mut self,
        source: IntakeSource,
        files: Vec<IncomingFile>,
    ) -> Result<Option<&UploadedImage>, PromptCraftError> {
        let total = files.len();
        let candidates: Vec<IncomingFile> = files.into_iter().filter(|f| f.is_image()).collect();
        if candidates.is_empty() {
            if total > 0 {
                debug!(
                    source = source.label(),
                    "Ignoring {} non-image file(s)", total
                );
            }
            return Ok(None);
        }

        if self.count() + candidates.len() > MAX_ACTIVE_IMAGES {
            warn!(
                source = source.label(),
                active = self.count(),
                candidates = candidates.len(),
                "Rejected image upload over the single-image limit"
            );
            return Err(PromptCraftError::TooManyImages);
        }

        let image = UploadedImage::decode(&candidates[0]).map_err(|err| {
            warn!(source = source.label(), "Image decode failed: {}", err);
            err
        })?;
        info!(
            source = source.label(),
            id = %image.id,
            mime_type = %image.mime_type,
            "Accepted reference image"
        );
        self.active = Some(image);
        self.publish();
        Ok(self.active.as_ref())
    }

    /// Returns `true` when an image with `id` was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let matches = self.active.as_ref().map(|image| image.id == id).unwrap_or(false);
        if !matches {
            return false;
        }
        self.active = None;
        self.publish();
        info!(id, "Removed reference image");
        true
    }

    pub fn restore(&mut self, image: UploadedImage) {
        self.active = Some(image);
        self.publish();
    }

    pub fn clear(&mut self) {
        if self.active.take().is_some() {
            self.publish();
        }
    }

    fn publish(&self) {
        self.sender.send_replace(self.active.clone());
    }
}
