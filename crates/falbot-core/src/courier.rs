//! Downloads completed artifacts to scoped temp files and hands them to
//! the chat transport.

use std::io::Write;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::channel::ChatTransport;
use crate::error::DeliveryError;
use crate::types::{Artifact, Recipient};
use crate::util::http;

/// Map a MIME type to a filename extension. Parameters after `;` are
/// ignored.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    match essence {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/svg+xml" => Some("svg"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/quicktime" => Some("mov"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        "audio/flac" => Some("flac"),
        _ => None,
    }
}

/// Extension fallback from the URL path, for backends that omit or
/// mislabel the content type.
fn extension_for_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 => Some(ext),
        _ => None,
    }
}

fn extension_for(artifact: &Artifact) -> String {
    extension_for_mime(&artifact.content_type)
        .map(|s| s.to_string())
        .or_else(|| extension_for_url(&artifact.url).map(|s| s.to_string()))
        .unwrap_or_else(|| "bin".to_string())
}

/// Trait seam for artifact delivery, mocked in pipeline tests.
#[async_trait]
pub trait Courier: Send + Sync {
    async fn deliver(
        &self,
        artifact: &Artifact,
        to: &Recipient,
        transport: &dyn ChatTransport,
    ) -> Result<(), DeliveryError>;
}

/// Production courier: streamed HTTP download into a named temp file,
/// then upload through the transport. The temp file is released on every
/// exit path by its guard.
pub struct HttpCourier;

impl HttpCourier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpCourier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Courier for HttpCourier {
    async fn deliver(
        &self,
        artifact: &Artifact,
        to: &Recipient,
        transport: &dyn ChatTransport,
    ) -> Result<(), DeliveryError> {
        let ext = extension_for(artifact);
        let mut file = tempfile::Builder::new()
            .prefix("falbot-")
            .suffix(&format!(".{}", ext))
            .tempfile()?;

        let response = http::client().get(&artifact.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                url: artifact.url.clone(),
            });
        }

        let mut stream = response.bytes_stream();
        let mut bytes = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            bytes += chunk.len();
            file.write_all(&chunk)?;
        }
        file.flush()?;
        debug!(url = %artifact.url, bytes, path = %file.path().display(), "artifact downloaded");

        transport
            .send_file(to, file.path())
            .await
            .map_err(|e| {
                warn!(to = %to, "artifact upload failed: {}", e);
                DeliveryError::Upload(e.to_string())
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/png"), Some("png"));
        assert_eq!(extension_for_mime("image/svg+xml"), Some("svg"));
        assert_eq!(extension_for_mime("image/jpeg; charset=binary"), Some("jpg"));
        assert_eq!(extension_for_mime("video/mp4"), Some("mp4"));
        assert_eq!(extension_for_mime("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for_mime("application/x-unknown"), None);
    }

    #[test]
    fn test_extension_for_url_fallback() {
        assert_eq!(extension_for_url("https://cdn.fal.media/files/a/out.webp"), Some("webp"));
        assert_eq!(extension_for_url("https://cdn/x/clip.mp4?token=abc"), Some("mp4"));
        assert_eq!(extension_for_url("https://cdn/x/noext"), None);
    }

    #[test]
    fn test_extension_resolution_order() {
        let known = Artifact { url: "https://cdn/a.webp".into(), content_type: "image/png".into() };
        assert_eq!(extension_for(&known), "png");

        let unknown_mime = Artifact { url: "https://cdn/a.webp".into(), content_type: "application/octet-stream".into() };
        assert_eq!(extension_for(&unknown_mime), "webp");

        let nothing = Artifact { url: "https://cdn/a".into(), content_type: "application/octet-stream".into() };
        assert_eq!(extension_for(&nothing), "bin");
    }
}
