//! Image download operation: browser-profile GET with bare-GET fallback.
//!
//! Some CDNs reject unadorned requests, others reject the opposite, so a
//! download is tried first with a browser-like header profile (rotating
//! the `Sec-Fetch-Site` hint) and then once more with a completely bare
//! request. A 429 anywhere along the way stops immediately and surfaces
//! the rate-limit headers to the retry loop.

use crate::fetch::{AttemptOutcome, RateLimitSignal};
use crate::urls;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use tracing::debug;

const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
                      image/avif,image/webp,image/png,image/svg+xml,*/*;q=0.8";

/// Hosts the downloader refuses outright (handled as per-item failures).
const UNSUPPORTED_HOST_MARKERS: &[&str] = &["imgur"];

/// Browser-like header profile. `mode` rotates the `Sec-Fetch-Site`
/// hint: 0 = none, 1 = cross-site, 2 = same-site.
fn browser_headers(host: &str, mode: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Accept", HeaderValue::from_static(ACCEPT));
    headers.insert("Accept-Encoding", HeaderValue::from_static("gzip,deflate,br,zstd"));
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));
    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert("Host", value);
    }
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    let site = match mode {
        1 => "cross-site",
        2 => "same-site",
        _ => "none",
    };
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static(site));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers.insert("User-Agent", HeaderValue::from_static(BROWSER_UA));
    headers
}

/// GET with the browser profile, rotating `Sec-Fetch-Site` up to three
/// times on non-200. Stops early on 429 so the rate-limit signal reaches
/// the retry loop instead of burning header variants.
pub async fn get_with_browser_profile(
    client: &Client,
    locator: &str,
) -> Result<Response, reqwest::Error> {
    let host = urls::host(locator).unwrap_or_default();
    let mut response = client
        .get(locator)
        .headers(browser_headers(&host, 0))
        .send()
        .await?;

    for mode in 1..3 {
        if response.status().as_u16() == 200 || response.status().as_u16() == 429 {
            break;
        }
        response = client
            .get(locator)
            .headers(browser_headers(&host, mode))
            .send()
            .await?;
    }
    Ok(response)
}

/// Downloads one image per call; shared by all workers of a batch.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    /// Directory downloaded files are written to.
    image_dir: PathBuf,
    /// Relative folder prefix written back into the document.
    image_folder: String,
    overwrite: bool,
}

impl Downloader {
    pub fn new(
        client: Client,
        image_dir: impl Into<PathBuf>,
        image_folder: impl Into<String>,
        overwrite: bool,
    ) -> Self {
        Self {
            client,
            image_dir: image_dir.into(),
            image_folder: image_folder.into(),
            overwrite,
        }
    }

    /// One download attempt for `(key, locator)`, classified for the
    /// retry loop. Never panics and never returns an error directly.
    pub async fn fetch_one(&self, key: &str, locator: &str) -> AttemptOutcome {
        if let Some(host) = urls::host(locator) {
            if UNSUPPORTED_HOST_MARKERS.iter().any(|m| host.contains(m)) {
                return AttemptOutcome::Failed(format!("unsupported host: {host}"));
            }
        }

        let extension = match urls::file_extension(locator) {
            Ok(ext) => ext,
            Err(e) => return AttemptOutcome::Failed(format!("{e:#}")),
        };
        let file_name = format!("image_{key}.{extension}");
        let path = self.image_dir.join(&file_name);

        // Already on disk from an earlier run: repoint without touching
        // the network.
        if path.exists() && !self.overwrite {
            debug!("reusing existing file for {key}: {}", path.display());
            return AttemptOutcome::Done(self.local_locator(&file_name));
        }

        let response = match get_with_browser_profile(&self.client, locator).await {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::Failed(format!("transport error: {e}")),
        };

        match response.status().as_u16() {
            200 => self.save(response, &path, &file_name).await,
            429 => AttemptOutcome::RateLimited(RateLimitSignal::from_headers(response.headers())),
            _ => self.bare_get(locator, &path, &file_name).await,
        }
    }

    /// Fallback: a completely bare GET for servers that reject the
    /// browser profile.
    async fn bare_get(&self, locator: &str, path: &Path, file_name: &str) -> AttemptOutcome {
        let response = match self.client.get(locator).send().await {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::Failed(format!("transport error: {e}")),
        };
        match response.status().as_u16() {
            200 => self.save(response, path, file_name).await,
            429 => AttemptOutcome::RateLimited(RateLimitSignal::from_headers(response.headers())),
            status => AttemptOutcome::Failed(format!("status {status}")),
        }
    }

    async fn save(&self, response: Response, path: &Path, file_name: &str) -> AttemptOutcome {
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return AttemptOutcome::Failed(format!("body read error: {e}")),
        };
        if let Err(e) = tokio::fs::write(path, &bytes).await {
            return AttemptOutcome::Failed(format!("write {}: {e}", path.display()));
        }
        AttemptOutcome::Done(self.local_locator(file_name))
    }

    fn local_locator(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.image_folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_headers_modes() {
        let h0 = browser_headers("cdn.example.com", 0);
        assert_eq!(h0.get("Sec-Fetch-Site").unwrap(), "none");
        assert_eq!(h0.get("Host").unwrap(), "cdn.example.com");
        let h1 = browser_headers("cdn.example.com", 1);
        assert_eq!(h1.get("Sec-Fetch-Site").unwrap(), "cross-site");
        let h2 = browser_headers("cdn.example.com", 2);
        assert_eq!(h2.get("Sec-Fetch-Site").unwrap(), "same-site");
    }

    #[tokio::test]
    async fn test_unsupported_host_fails_per_item() {
        let downloader = Downloader::new(Client::new(), "/tmp", "images", false);
        let outcome = downloader
            .fetch_one("k", "https://i.imgur.com/abc.png")
            .await;
        assert!(matches!(outcome, AttemptOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_existing_file_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let key = "deadbeef";
        std::fs::write(dir.path().join(format!("image_{key}.png")), b"x").unwrap();

        let downloader = Downloader::new(Client::new(), dir.path(), "images", false);
        let outcome = downloader
            .fetch_one(key, "https://unreachable.invalid/pic.png")
            .await;
        match outcome {
            AttemptOutcome::Done(locator) => {
                assert_eq!(locator, format!("images/image_{key}.png"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }
}
