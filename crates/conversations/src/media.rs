//! Media content-type rules shared by inbound processing, outbound sends and
//! uploads.

use {
    parley_common::{Error, Result},
    parley_store::MessageType,
};

/// Content types the channel accepts, with the message type each maps to.
const ALLOWED: &[(&str, MessageType)] = &[
    ("image/jpeg", MessageType::Image),
    ("image/png", MessageType::Image),
    ("image/webp", MessageType::Image),
    ("video/mp4", MessageType::Video),
    ("video/3gpp", MessageType::Video),
    ("audio/aac", MessageType::Audio),
    ("audio/amr", MessageType::Audio),
    ("audio/mp4", MessageType::Audio),
    ("audio/mpeg", MessageType::Audio),
    ("audio/ogg", MessageType::Audio),
    ("application/pdf", MessageType::Document),
    ("application/msword", MessageType::Document),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        MessageType::Document,
    ),
    ("application/vnd.ms-excel", MessageType::Document),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        MessageType::Document,
    ),
    ("application/vnd.ms-powerpoint", MessageType::Document),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        MessageType::Document,
    ),
    ("text/plain", MessageType::Document),
    ("text/csv", MessageType::Document),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("video/mp4", "mp4"),
    ("video/3gpp", "3gp"),
    ("audio/aac", "aac"),
    ("audio/amr", "amr"),
    ("audio/mp4", "m4a"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("application/pdf", "pdf"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("text/plain", "txt"),
    ("text/csv", "csv"),
];

/// Lowercase essence of a content type: `Image/JPEG; q=1` → `image/jpeg`.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Message type for an allow-listed content type.
pub fn message_type_for(content_type: &str) -> Option<MessageType> {
    let ct = essence(content_type);
    ALLOWED
        .iter()
        .find(|(allowed, _)| *allowed == ct)
        .map(|(_, ty)| *ty)
}

pub fn is_allowed(content_type: &str) -> bool {
    message_type_for(content_type).is_some()
}

/// File extension used when storing an upload.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let ct = essence(content_type);
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ct)
        .map(|(_, ext)| *ext)
}

/// Content type guessed from a URL or file name extension.
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let ext = match ext.as_str() {
        "jpeg" => "jpg",
        other => other,
    };
    EXTENSIONS
        .iter()
        .find(|(_, known)| *known == ext)
        .map(|(ct, _)| *ct)
}

/// Text stored for a media message that arrived without a caption.
pub fn placeholder_text(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Text => "",
        MessageType::Image => "Image message",
        MessageType::Video => "Video message",
        MessageType::Audio => "Audio message",
        MessageType::Document => "Document message",
    }
}

/// Check the media part of an outbound send.
///
/// Returns the effective content type, if one is known.
pub fn validate_outbound(
    message_type: MessageType,
    media_url: Option<&str>,
    content_type: Option<&str>,
) -> Result<Option<String>> {
    let Some(raw_url) = media_url else {
        if message_type == MessageType::Text {
            return Ok(None);
        }
        return Err(Error::media(format!(
            "{message_type} messages require a media URL"
        )));
    };
    if message_type == MessageType::Text {
        return Err(Error::media("text messages cannot carry media"));
    }

    let url = url::Url::parse(raw_url)
        .map_err(|e| Error::media(format!("invalid media URL {raw_url:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::media("media URL must be an absolute http(s) URL"));
    }

    let effective = match content_type {
        Some(ct) => Some(essence(ct)),
        None => content_type_for_path(url.path()).map(str::to_string),
    };
    if let Some(ct) = &effective {
        match message_type_for(ct) {
            None => {
                return Err(Error::media(format!("content type {ct} is not supported")));
            },
            Some(derived) if derived != message_type => {
                return Err(Error::media(format!(
                    "content type {ct} is {derived}, not {message_type}"
                )));
            },
            Some(_) => {},
        }
    }
    Ok(effective)
}

/// Check an uploaded file and derive its message type.
pub fn validate_upload(content_type: &str, size: usize, max_bytes: usize) -> Result<MessageType> {
    if size == 0 {
        return Err(Error::media("uploaded file is empty"));
    }
    if size > max_bytes {
        return Err(Error::media(format!(
            "uploaded file is {size} bytes, limit is {max_bytes}"
        )));
    }
    message_type_for(content_type)
        .ok_or_else(|| Error::media(format!("content type {content_type} is not supported")))
}
