//! Embedded image passes: `data:` URI extraction and file embedding.
//!
//! Both directions are local disk work, run sequentially — the fetch
//! engine is only for network batches.

use crate::document;
use crate::hash::hash_locator;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Decode a `data:image/...;base64,...` URI into bytes and a file
/// extension (`svg+xml` collapses to `svg`).
pub fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, String)> {
    let (header, payload) = uri
        .split_once(',')
        .context("data URI has no payload separator")?;
    let subtype = header
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split(';').next())
        .context("data URI is not an image")?;
    let extension = if subtype.eq_ignore_ascii_case("svg+xml") {
        "svg".to_string()
    } else {
        subtype.to_ascii_lowercase()
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .context("invalid base64 payload")?;
    Ok((bytes, extension))
}

/// Encode image bytes as a `data:` URI with the given subtype.
pub fn encode_data_uri(bytes: &[u8], subtype: &str) -> String {
    format!("data:image/{subtype};base64,{}", STANDARD.encode(bytes))
}

/// Extract every embedded `data:image` URI from the document to a file
/// under `image_dir`, returning the rewrite map to relative locators.
///
/// A malformed URI degrades per item: logged, left unchanged.
pub async fn extract_embedded(
    doc: &Value,
    image_dir: &Path,
    image_folder: &str,
) -> Result<HashMap<String, String>> {
    let embedded = document::collect(doc, document::is_data_uri);
    let mut updates = HashMap::with_capacity(embedded.len());

    for (key, uri) in embedded {
        let (bytes, extension) = match decode_data_uri(&uri) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("skipping embedded image {key}: {e:#}");
                continue;
            }
        };
        let file_name = format!("image_{key}.{extension}");
        let path = image_dir.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        updates.insert(key, format!("{image_folder}/{file_name}"));
    }
    Ok(updates)
}

/// Encode every file under `image_dir` as a data URI, keyed by the hash
/// of the relative locator it replaces (`{image_folder}/{name}` — the
/// value a previous download pass wrote into the document).
pub async fn embed_images(image_dir: &Path, image_folder: &str) -> Result<HashMap<String, String>> {
    if !image_dir.exists() {
        bail!("no image directory at {}", image_dir.display());
    }

    let mut updates = HashMap::new();
    let mut entries = tokio::fs::read_dir(image_dir)
        .await
        .with_context(|| format!("reading {}", image_dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let subtype = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => continue,
        };
        let bytes = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("reading {}", entry.path().display()))?;
        let locator = format!("{image_folder}/{name}");
        updates.insert(hash_locator(&locator), encode_data_uri(&bytes, &subtype));
    }
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_round_trip() {
        let uri = encode_data_uri(b"pixels", "png");
        assert!(uri.starts_with("data:image/png;base64,"));
        let (bytes, ext) = decode_data_uri(&uri).unwrap();
        assert_eq!(bytes, b"pixels");
        assert_eq!(ext, "png");
    }

    #[test]
    fn test_decode_svg_xml_extension() {
        let uri = encode_data_uri(b"<svg/>", "svg+xml");
        let (_, ext) = decode_data_uri(&uri).unwrap();
        assert_eq!(ext, "svg");
    }

    #[test]
    fn test_decode_rejects_non_image() {
        assert!(decode_data_uri("data:text/plain;base64,aGk=").is_err());
        assert!(decode_data_uri("not a data uri").is_err());
    }

    #[tokio::test]
    async fn test_extract_embedded_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let uri = encode_data_uri(b"pngbytes", "png");
        let doc = json!({ "card": { "image": uri } });

        let updates = extract_embedded(&doc, dir.path(), "images").await.unwrap();
        assert_eq!(updates.len(), 1);
        let (key, locator) = updates.iter().next().unwrap();
        assert_eq!(locator, &format!("images/image_{key}.png"));
        let written = std::fs::read(dir.path().join(format!("image_{key}.png"))).unwrap();
        assert_eq!(written, b"pngbytes");
    }

    #[tokio::test]
    async fn test_extract_skips_malformed_uri() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({ "card": { "image": "data:image/png;base64,!!notbase64!!" } });
        let updates = extract_embedded(&doc, dir.path(), "images").await.unwrap();
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn test_embed_images_keys_by_relative_locator() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("image_abc.webp"), b"webpbytes").unwrap();

        let updates = embed_images(dir.path(), "images").await.unwrap();
        let key = hash_locator("images/image_abc.webp");
        let uri = &updates[&key];
        assert!(uri.starts_with("data:image/webp;base64,"));
        let (bytes, _) = decode_data_uri(uri).unwrap();
        assert_eq!(bytes, b"webpbytes");
    }
}
