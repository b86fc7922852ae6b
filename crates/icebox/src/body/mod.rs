//! Message body storage policy.
//!
//! Decides once per message whether a payload is embedded inline, stored
//! out-of-line, or dropped, based on size and content type. Inline bodies
//! keep small text payloads self-contained and searchable; large payloads
//! go out-of-line to avoid bloating records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

use icebox_core::emit;
use icebox_core::metrics::events::{BodyDisposition, BodyHandled};

use crate::backend::Backend;
use crate::config::BodyStoreConfig;
use crate::error::{BodyError, BodyNotFoundSnafu, BodyStorageSnafu};
use crate::model::{BodyEntry, BodyRef};
use snafu::ResultExt;

/// Content type fragments always treated as binary.
const BINARY_CONTENT_MARKERS: &[&str] = &["octet-stream", "image/", "audio/", "video/"];

/// Outcome of the size/content-type policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyPlan {
    TooLarge,
    TryInline,
    OutOfLine,
}

/// Stores message payloads according to the configured policy.
pub struct BodyStore {
    backend: Arc<dyn Backend>,
    config: BodyStoreConfig,
}

impl BodyStore {
    pub fn new(backend: Arc<dyn Backend>, config: BodyStoreConfig) -> Self {
        Self { backend, config }
    }

    fn classify(&self, size: usize, content_type: &str) -> BodyPlan {
        if size > self.config.max_body_size_bytes {
            return BodyPlan::TooLarge;
        }
        if size < self.config.inline_threshold_bytes && !is_binary(content_type) {
            return BodyPlan::TryInline;
        }
        BodyPlan::OutOfLine
    }

    /// Apply the body policy to one message payload.
    ///
    /// Inline decoding is strict UTF-8; a decode failure falls through to
    /// out-of-line storage, never to an error.
    pub async fn store(
        &self,
        id: Uuid,
        content_type: &str,
        body: Bytes,
        expires_at: DateTime<Utc>,
    ) -> Result<BodyRef, BodyError> {
        if body.is_empty() {
            return Ok(BodyRef::NotStored);
        }

        let size = body.len();
        match self.classify(size, content_type) {
            BodyPlan::TooLarge => {
                trace!(%id, size, "Body exceeds maximum size, not stored");
                emit!(BodyHandled {
                    disposition: BodyDisposition::NotStored,
                    bytes: size as u64,
                });
                Ok(BodyRef::NotStored)
            }
            BodyPlan::TryInline => match std::str::from_utf8(&body) {
                Ok(text) => {
                    emit!(BodyHandled {
                        disposition: BodyDisposition::Inline,
                        bytes: size as u64,
                    });
                    Ok(BodyRef::Inline {
                        text: text.to_string(),
                    })
                }
                Err(_) => {
                    trace!(%id, "Inline decode failed, storing out-of-line");
                    self.store_out_of_line(id, content_type, body, expires_at)
                        .await
                }
            },
            BodyPlan::OutOfLine => {
                self.store_out_of_line(id, content_type, body, expires_at)
                    .await
            }
        }
    }

    async fn store_out_of_line(
        &self,
        id: Uuid,
        content_type: &str,
        body: Bytes,
        expires_at: DateTime<Utc>,
    ) -> Result<BodyRef, BodyError> {
        let size = body.len();
        // Binary content types stay binary even when the bytes happen to
        // decode as UTF-8
        let text = if is_binary(content_type) {
            None
        } else {
            std::str::from_utf8(&body).ok().map(str::to_string)
        };

        let entry = BodyEntry {
            id,
            content_type: content_type.to_string(),
            size,
            binary: text.is_none().then(|| body.clone()),
            text,
            expires_at,
        };

        self.backend
            .store_body(entry)
            .await
            .context(BodyStorageSnafu)?;

        emit!(BodyHandled {
            disposition: BodyDisposition::Stored,
            bytes: size as u64,
        });

        Ok(BodyRef::Stored {
            url: format!("/messages/{id}/body"),
            size,
            content_type: content_type.to_string(),
        })
    }

    /// Fetch a stored body by id.
    pub async fn fetch(&self, id: Uuid) -> Result<BodyEntry, BodyError> {
        self.backend
            .body(id)
            .await
            .context(BodyStorageSnafu)?
            .ok_or_else(|| BodyNotFoundSnafu { id: id.to_string() }.build())
    }
}

fn is_binary(content_type: &str) -> bool {
    BINARY_CONTENT_MARKERS
        .iter()
        .any(|marker| content_type.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::model::{MessageKind, record_id};
    use chrono::TimeDelta;

    fn store_with(max: usize, inline: usize) -> BodyStore {
        BodyStore::new(
            Arc::new(MemoryBackend::new(0)),
            BodyStoreConfig {
                max_body_size_bytes: max,
                inline_threshold_bytes: inline,
            },
        )
    }

    fn expiry() -> DateTime<Utc> {
        Utc::now() + TimeDelta::days(30)
    }

    fn body_id(name: &str) -> Uuid {
        record_id(name, MessageKind::Processed)
    }

    #[test]
    fn test_binary_content_detection() {
        assert!(is_binary("application/octet-stream"));
        assert!(is_binary("image/png"));
        assert!(is_binary("audio/mpeg"));
        assert!(is_binary("video/mp4"));
        assert!(!is_binary("application/json"));
        assert!(!is_binary("text/xml"));
    }

    #[tokio::test]
    async fn test_oversized_body_not_stored() {
        let store = store_with(8, 4);
        let body = Bytes::from(vec![b'x'; 16]);

        let r = store
            .store(body_id("m1"), "application/json", body, expiry())
            .await
            .unwrap();
        assert_eq!(r, BodyRef::NotStored);
    }

    #[tokio::test]
    async fn test_small_text_embedded_inline() {
        let store = store_with(1024, 64);

        let r = store
            .store(
                body_id("m1"),
                "application/json",
                Bytes::from_static(b"{\"ok\":true}"),
                expiry(),
            )
            .await
            .unwrap();
        assert_eq!(
            r,
            BodyRef::Inline {
                text: "{\"ok\":true}".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_small_binary_goes_out_of_line() {
        let store = store_with(1024, 64);
        let id = body_id("m1");

        let r = store
            .store(
                id,
                "application/octet-stream",
                Bytes::from_static(&[1, 2, 3]),
                expiry(),
            )
            .await
            .unwrap();
        assert!(matches!(r, BodyRef::Stored { size: 3, .. }));

        let entry = store.fetch(id).await.unwrap();
        assert_eq!(entry.binary.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(entry.text.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_falls_through_to_out_of_line() {
        let store = store_with(1024, 64);
        let id = body_id("m1");

        // Small and nominally text, but not valid UTF-8
        let r = store
            .store(id, "text/plain", Bytes::from_static(&[0xff, 0xfe]), expiry())
            .await
            .unwrap();
        assert!(matches!(r, BodyRef::Stored { .. }));
    }

    #[tokio::test]
    async fn test_large_text_goes_out_of_line_with_text() {
        let store = store_with(1024, 4);
        let id = body_id("m1");

        let r = store
            .store(id, "text/plain", Bytes::from_static(b"hello world"), expiry())
            .await
            .unwrap();
        assert!(matches!(r, BodyRef::Stored { .. }));

        let entry = store.fetch(id).await.unwrap();
        assert_eq!(entry.text.as_deref(), Some("hello world"));
        assert!(entry.binary.is_none());
    }

    #[tokio::test]
    async fn test_empty_body_not_stored() {
        let store = store_with(1024, 64);
        let r = store
            .store(body_id("m1"), "text/plain", Bytes::new(), expiry())
            .await
            .unwrap();
        assert_eq!(r, BodyRef::NotStored);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let store = store_with(1024, 64);
        let err = store.fetch(body_id("missing")).await.unwrap_err();
        assert!(matches!(err, BodyError::BodyNotFound { .. }));
    }
}
