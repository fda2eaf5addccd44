//! Turns uploaded files into [`EncodedImage`]s.
//!
//! Uploads arrive either as raw bytes (drag-and-drop / picker `PUT`) or as the
//! `data:<mime>;base64,<payload>` string a browser `FileReader` produces. Both
//! funnel through [`encode_bytes`], which sniffs the real format and checks that
//! the image header decodes before anything is handed to the generation client.

use std::io::Cursor;

use base64::Engine;
use image::ImageReader;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::error::DecodeError;
use crate::models::EncodedImage;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Reads `reader` to the end and encodes it.
pub async fn ingest_reader<R>(mut reader: R, declared_mime: Option<&str>) -> Result<EncodedImage, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.map_err(|e| {
        warn!("⚠️ Upload read failed: {}", e);
        DecodeError
    })?;
    encode_bytes(&buf, declared_mime)
}

/// Parses a `data:` URL as produced by `FileReader.readAsDataURL`.
pub fn ingest_data_url(data_url: &str) -> Result<EncodedImage, DecodeError> {
    let rest = data_url.trim().strip_prefix("data:").ok_or(DecodeError)?;
    let (mime, payload) = rest.split_once(";base64,").ok_or(DecodeError)?;
    if mime.is_empty() || payload.is_empty() {
        return Err(DecodeError);
    }
    let bytes = BASE64.decode(payload.trim()).map_err(|e| {
        debug!("data url payload is not base64: {}", e);
        DecodeError
    })?;
    encode_bytes(&bytes, Some(mime))
}

/// Validates `bytes` as an image and builds the transport representation.
///
/// The MIME type comes from the file's magic bytes. A declared type is only used
/// to reject uploads the browser already knows are not images.
pub fn encode_bytes(bytes: &[u8], declared_mime: Option<&str>) -> Result<EncodedImage, DecodeError> {
    if let Some(declared) = declared_mime {
        let essence = declared.split(';').next().unwrap_or_default().trim();
        if !essence.is_empty() && essence != "application/octet-stream" && !essence.starts_with("image/") {
            warn!("⚠️ Rejected upload declared as {}", essence);
            return Err(DecodeError);
        }
    }

    let mime_type = sniff_mime(bytes)?;
    let image = EncodedImage::new(mime_type, BASE64.encode(bytes));
    info!("🖼️ Ingested {} image ({} bytes)", image.mime_type, bytes.len());
    Ok(image)
}

fn sniff_mime(bytes: &[u8]) -> Result<&'static str, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError);
    }
    let format = image::guess_format(bytes).map_err(|_| DecodeError)?;
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| {
            debug!("{:?} header did not decode: {}", format, e);
            DecodeError
        })?;
    debug!("sniffed {:?} {}x{}", format, width, height);
    Ok(format.to_mime_type())
}
