//! Media detection: classifies a page's media-bearing elements

use super::types::{MediaFileDescriptor, MediaType, MediaTypeConfig};
use crate::browser::{MediaElement, Page};
use crate::url::path_extension;
use url::Url;

/// Detects downloadable media on a loaded page
///
/// Element enumeration failures are logged and yield no files; detection
/// never fails the page.
///
/// # Arguments
///
/// * `page` - The loaded page
/// * `source_url` - URL of the page, used to resolve relative sources
/// * `media_types` - The types the session collects, in priority order
pub async fn detect(
    page: &dyn Page,
    source_url: &str,
    media_types: &[MediaTypeConfig],
) -> Vec<MediaFileDescriptor> {
    if media_types.is_empty() {
        return Vec::new();
    }

    let elements = match page.media_elements().await {
        Ok(elements) => elements,
        Err(e) => {
            tracing::warn!("Media detection failed on {}: {}", source_url, e);
            return Vec::new();
        }
    };

    let files = classify_elements(&elements, source_url, media_types);
    tracing::debug!("Detected {} media files on {}", files.len(), source_url);
    files
}

/// Resolves and classifies raw media elements
///
/// Each element's URL is resolved against `source_url` and its path
/// extension matched against every configured type's allowed set; the first
/// matching type wins and candidates matching none are dropped.
pub fn classify_elements(
    elements: &[MediaElement],
    source_url: &str,
    media_types: &[MediaTypeConfig],
) -> Vec<MediaFileDescriptor> {
    let Ok(base) = Url::parse(source_url) else {
        tracing::warn!("Cannot resolve media against invalid source URL: {}", source_url);
        return Vec::new();
    };

    let allowed: Vec<(MediaType, _)> = media_types
        .iter()
        .map(|config| (config.media_type, config.allowed_extensions()))
        .collect();

    elements
        .iter()
        .filter_map(|element| {
            let url = base.join(&element.src).ok()?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return None;
            }

            let extension = path_extension(&url)?;
            let media_type = allowed
                .iter()
                .find(|(_, extensions)| extensions.contains(&extension))
                .map(|(media_type, _)| *media_type)?;

            Some(MediaFileDescriptor {
                file_name: file_name_for(&url, &extension),
                url: url.to_string(),
                media_type,
                extension,
                source_url: source_url.to_string(),
                size: None,
                storage_path: None,
                content_hash: None,
                downloaded_at: None,
            })
        })
        .collect()
}

/// Last path segment, with `.ext` appended if it has no dot
pub fn file_name_for(url: &Url, extension: &str) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown");

    if segment.contains('.') {
        segment.to_string()
    } else {
        format!("{}.{}", segment, extension)
    }
}
