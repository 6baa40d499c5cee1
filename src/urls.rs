//! URL component helpers shared by the fetch operations and the pipeline.

use anyhow::{Context, Result};
use url::Url;

/// Parse a locator into a `Url`, with context on failure.
pub fn parse(locator: &str) -> Result<Url> {
    Url::parse(locator).with_context(|| format!("invalid URL: {locator}"))
}

/// The host portion of a locator, if it parses as an absolute URL.
pub fn host(locator: &str) -> Option<String> {
    Url::parse(locator)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Last path segment of a URL — the remote file name.
pub fn file_name(locator: &str) -> Result<String> {
    let url = parse(locator)?;
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    Ok(name.to_string())
}

/// File extension of a URL's last path segment, lowercased.
///
/// Query strings and fragments are already stripped by the parser, so
/// `https://cdn/x.png?ex=abc` yields `png`.
pub fn file_extension(locator: &str) -> Result<String> {
    let name = file_name(locator)?;
    let ext = name.rsplit('.').next().unwrap_or_default();
    Ok(ext.to_ascii_lowercase())
}

/// Base URL of a resource: scheme + host + path minus the last segment.
///
/// Used to resolve relative image references found in a remotely hosted
/// project file against the project's own location.
pub fn base_url(locator: &str) -> Result<String> {
    let url = parse(locator)?;
    let path = url.path();
    let base_path = match path.rsplit_once('/') {
        Some((head, _)) => head,
        None => "",
    };
    let mut base = url.clone();
    base.set_path(base_path);
    base.set_query(None);
    base.set_fragment(None);
    // A root-level resource leaves a bare "/" path behind.
    Ok(base.to_string().trim_end_matches('/').to_string())
}
