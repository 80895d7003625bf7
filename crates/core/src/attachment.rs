//! Image attachments held by the composer until send.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::AttachmentError;
use crate::model::ContentBlock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAttachment {
    pub id: String,
    /// Self-contained `data:<mime>;base64,<payload>` URL.
    pub data_url: String,
    pub mime_type: String,
}

/// Wire shape of an attachment inside a `chat.send` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub mime_type: String,
    pub content: String,
}

impl ChatAttachment {
    pub fn from_data_url(data_url: impl Into<String>) -> Result<Self, AttachmentError> {
        let data_url = data_url.into();
        let (mime_type, _) = split_data_url(&data_url).ok_or(AttachmentError::MalformedDataUrl)?;
        if !mime_type.starts_with("image/") {
            return Err(AttachmentError::UnsupportedType(mime_type.to_string()));
        }
        Ok(Self {
            id: ulid::Ulid::new().to_string(),
            mime_type: mime_type.to_string(),
            data_url,
        })
    }

    /// Read an image from disk and encode it as a data URL.
    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let mime_type = mime_for_path(path)
            .ok_or_else(|| AttachmentError::UnsupportedType(path.display().to_string()))?;
        let bytes = std::fs::read(path).map_err(|source| AttachmentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let data_url = format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes));
        Ok(Self {
            id: ulid::Ulid::new().to_string(),
            data_url,
            mime_type: mime_type.to_string(),
        })
    }

    /// Base64 payload of the data URL, without the `data:` header.
    pub fn base64_payload(&self) -> &str {
        split_data_url(&self.data_url)
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn to_payload(&self) -> AttachmentPayload {
        AttachmentPayload {
            kind: "image".to_string(),
            mime_type: self.mime_type.clone(),
            content: self.base64_payload().to_string(),
        }
    }

    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::Image {
            mime_type: self.mime_type.clone(),
            data: self.base64_payload().to_string(),
        }
    }
}

fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    if mime.is_empty() {
        return None;
    }
    Some((mime, payload))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_payload() {
        let att = ChatAttachment::from_data_url("data:image/png;base64,QUJD").expect("valid");
        assert_eq!(att.mime_type, "image/png");
        assert_eq!(att.base64_payload(), "QUJD");
        let payload = att.to_payload();
        assert_eq!(payload.kind, "image");
        assert_eq!(payload.content, "QUJD");
        let wire = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(wire["mimeType"], "image/png");
        assert_eq!(wire["type"], "image");
    }

    #[test]
    fn test_rejects_non_image_and_malformed() {
        assert!(matches!(
            ChatAttachment::from_data_url("data:text/plain;base64,QQ=="),
            Err(AttachmentError::UnsupportedType(_))
        ));
        assert!(matches!(
            ChatAttachment::from_data_url("https://example.com/a.png"),
            Err(AttachmentError::MalformedDataUrl)
        ));
    }

    #[test]
    fn test_from_path_encodes_file() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("shot.PNG");
        std::fs::write(&path, b"ABC").expect("write");
        let att = ChatAttachment::from_path(&path).expect("attach");
        assert_eq!(att.data_url, "data:image/png;base64,QUJD");
        assert!(ChatAttachment::from_path(&dir.path().join("notes.txt")).is_err());
    }
}
