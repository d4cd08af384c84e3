use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

const FALLBACK_MIMETYPE: &str = "application/octet-stream";

/// A downloaded asset, ready for upload to the network.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub bytes: Bytes,
    pub mimetype: String,
}

impl MediaAsset {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub async fn fetch_media(client: &Client, url: &str) -> Result<MediaAsset> {
    if url.trim().is_empty() {
        return Err(Error::Validation("media url is empty".to_string()));
    }
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Connector(format!(
            "media download failed: {} {}",
            resp.status(),
            url
        )));
    }
    let header = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Err(Error::Connector(format!("media download was empty: {url}")));
    }
    let mimetype = sniff_mimetype(header.as_deref(), &bytes);
    Ok(MediaAsset { bytes, mimetype })
}

/// Prefers a concrete `Content-Type`, then magic bytes.
pub fn sniff_mimetype(header: Option<&str>, data: &[u8]) -> String {
    if let Some(value) = header {
        let essence = value.split(';').next().unwrap_or_default().trim().to_lowercase();
        if !essence.is_empty() && essence != FALLBACK_MIMETYPE && essence.contains('/') {
            return essence;
        }
    }

    let detected = if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.len() >= 8 && &data[4..8] == b"ftyp" {
        "video/mp4"
    } else if data.starts_with(b"%PDF-") {
        "application/pdf"
    } else if data.starts_with(b"OggS") {
        "audio/ogg"
    } else {
        FALLBACK_MIMETYPE
    };
    detected.to_string()
}
