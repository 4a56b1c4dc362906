//! Object key layout
//!
//! - `domain/<host>/<yyyy>/<mm>/<dd>/pages/<session>/<url-hash>.json`
//! - `domain/<host>/<yyyy>/<mm>/<dd>/screenshots/<session>/<url-hash>.<ext>`
//! - `sessions/<session>/media/<type>/<yyyy-mm-dd>/<hash8>_<file-name>`
//! - `sessions/<session>/media-metadata.json`
//! - `sessions/<yyyy>/<mm>/<dd>/<session>/session.json`

use crate::media::MediaType;
use crate::url::domain_or_unknown;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Maximum length of a stored file name
const MAX_FILE_NAME_LEN: usize = 255;

/// Hex SHA-256 of a URL, used as a stable object name
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Hex SHA-256 of downloaded bytes
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Replaces characters that are unsafe in object keys and file names
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        sanitized = sanitized.replace('.', "_");
    }

    sanitized.chars().take(MAX_FILE_NAME_LEN).collect()
}

fn domain_prefix(url: &str, at: DateTime<Utc>) -> String {
    format!("domain/{}/{}", domain_or_unknown(url), at.format("%Y/%m/%d"))
}

/// Key of a page record
pub fn page_record_key(url: &str, session_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/pages/{}/{}.json",
        domain_prefix(url, at),
        session_id,
        url_hash(url)
    )
}

/// Key of a page capture
pub fn screenshot_key(url: &str, session_id: &str, extension: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/screenshots/{}/{}.{}",
        domain_prefix(url, at),
        session_id,
        url_hash(url),
        extension
    )
}

/// Key of a downloaded media file
pub fn media_key(
    session_id: &str,
    media_type: MediaType,
    hash: &str,
    file_name: &str,
    at: DateTime<Utc>,
) -> String {
    let short_hash: String = hash.chars().take(8).collect();
    format!(
        "{}{}/{}/{}_{}",
        session_media_prefix(session_id),
        media_type,
        at.format("%Y-%m-%d"),
        short_hash,
        sanitize_file_name(file_name)
    )
}

/// Prefix shared by every media file of a session
pub fn session_media_prefix(session_id: &str) -> String {
    format!("sessions/{}/media/", session_id)
}

/// Key of a session's media metadata document
pub fn media_metadata_key(session_id: &str) -> String {
    format!("sessions/{}/media-metadata.json", session_id)
}

/// Key of a session's summary document
pub fn session_metadata_key(session_id: &str, at: DateTime<Utc>) -> String {
    format!("sessions/{}/{}/session.json", at.format("%Y/%m/%d"), session_id)
}
