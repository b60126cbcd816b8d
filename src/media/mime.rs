//! MIME sniffing for downloaded media blobs.

/// Detect a MIME type from magic bytes. Falls back to `application/octet-stream`
/// when nothing matches.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(b"\xFF\xD8\xFF") {
        "image/jpeg"
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.starts_with(b"\x1A\x45\xDF\xA3") {
        "video/webm"
    } else if data.len() >= 12 && &data[4..8] == b"ftyp" {
        "video/mp4"
    } else if data.starts_with(b"\x1F\x8B") {
        // TGS animated stickers are gzip-compressed Lottie JSON.
        "application/gzip"
    } else if data.starts_with(b"OggS") {
        "audio/ogg"
    } else if data.starts_with(b"ID3") || data.starts_with(b"\xFF\xFB") {
        "audio/mpeg"
    } else if data.starts_with(b"%PDF") {
        "application/pdf"
    } else {
        "application/octet-stream"
    }
}

/// File extension (with dot) for a MIME type, for cache blob filenames.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "video/webm" => ".webm",
        "video/mp4" => ".mp4",
        "application/gzip" => ".tgs",
        "audio/ogg" => ".ogg",
        "audio/mpeg" => ".mp3",
        "application/pdf" => ".pdf",
        _ => mime_guess::get_mime_extensions_str(mime)
            .and_then(|exts| exts.first())
            .map(|ext| match *ext {
                "jpe" | "jpeg" => ".jpg",
                _ => ".bin",
            })
            .unwrap_or(".bin"),
    }
}
