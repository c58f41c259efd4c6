//! Serves stored attachments back out of the download directory.

use super::*;

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
];
const AUDIO_EXTENSIONS: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("opus", "audio/opus"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
];
const VIDEO_EXTENSIONS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
];
const DOCUMENT_EXTENSIONS: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("txt", "text/plain; charset=utf-8"),
    ("json", "application/json"),
    ("zip", "application/zip"),
];
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub(super) fn content_type_for_file(name: &str) -> &'static str {
    let Some((_, extension)) = name.rsplit_once('.') else {
        return FALLBACK_CONTENT_TYPE;
    };
    let extension = extension.to_ascii_lowercase();
    [
        IMAGE_EXTENSIONS,
        AUDIO_EXTENSIONS,
        VIDEO_EXTENSIONS,
        DOCUMENT_EXTENSIONS,
    ]
    .iter()
    .flat_map(|table| table.iter())
    .find(|(candidate, _)| *candidate == extension)
    .map(|(_, content_type)| *content_type)
    .unwrap_or(FALLBACK_CONTENT_TYPE)
}

pub(super) async fn handle_file_download(
    State(state): State<Arc<BridgeGatewayState>>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, BridgeApiError> {
    if !relay_core::is_servable_file_name(&name) {
        return Err(BridgeApiError::not_found(format!("file '{name}' not found")));
    }
    let path = state.download_dir().join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for_file(&name))],
            bytes,
        )
            .into_response()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(BridgeApiError::not_found(format!("file '{name}' not found")))
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to read stored file");
            Err(BridgeApiError::internal(format!("failed to read '{name}'")))
        }
    }
}
