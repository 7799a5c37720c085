//! Media upload endpoint.
//!
//! `POST /api/media` accepts a raw binary body. `Content-Type` is required and
//! must be on the media allow-list; `X-Filename` optionally names the file.
//! Stored files are served back under `/media/{file}`.

use {
    axum::{
        Json,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    },
    parley_common::Error,
    parley_conversations::media::{essence, extension_for, validate_upload},
    parley_store::MessageType,
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{error::ApiResult, server::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedMedia {
    pub url: String,
    pub content_type: String,
    pub size: usize,
    pub derived_message_type: MessageType,
}

pub async fn upload_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadedMedia>)> {
    let settings = &state.gateway.media;
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(essence)
        .ok_or_else(|| Error::media("Content-Type header is required"))?;

    let message_type = validate_upload(&content_type, body.len(), settings.max_bytes)?;

    let id = uuid::Uuid::new_v4().simple().to_string();
    let ext = extension_for(&content_type).unwrap_or("bin");
    let filename = match headers
        .get("x-filename")
        .and_then(|v| v.to_str().ok())
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
    {
        Some(name) if name.contains('.') => format!("{id}-{name}"),
        Some(name) => format!("{id}-{name}.{ext}"),
        None => format!("{id}.{ext}"),
    };

    tokio::fs::create_dir_all(&settings.dir)
        .await
        .map_err(Error::persistence)?;
    let path = settings.dir.join(&filename);
    if let Err(e) = tokio::fs::write(&path, &body).await {
        warn!(path = %path.display(), error = %e, "failed to save uploaded media");
        return Err(Error::persistence(e).into());
    }

    info!(filename = %filename, content_type = %content_type, size = body.len(), "media uploaded");
    Ok((
        StatusCode::CREATED,
        Json(UploadedMedia {
            url: format!("{}/media/{filename}", settings.public_base),
            content_type,
            size: body.len(),
            derived_message_type: message_type,
        }),
    ))
}

/// Keep only characters that are safe in a single path segment.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>()
        .trim_start_matches('.')
        .chars()
        .take(100)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_paths_and_unsafe_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\report final.pdf"), "reportfinal.pdf");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("photo (1).jpg"), "photo1.jpg");
    }
}
