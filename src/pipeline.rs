// Copyright 2026 relink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pass sequencing: load a project document, run the enabled rewrite
//! passes in order, write it back out.
//!
//! Each pass is independent and collect/fetch/rewrite shaped: extract a
//! `{hash -> locator}` map from the tree, resolve new locators (over the
//! network or locally), then bulk-rewrite every node whose current value
//! hashes into the map. Pass order: refresh expiring CDN links first
//! (optionally chaining straight into the download batch), then
//! embedded-image extraction, then downloads, then embedding, then
//! prefix rewriting.

use crate::config::Config;
use crate::data_uri;
use crate::document::{self, IMAGE_FIELD};
use crate::fetch::download::{get_with_browser_profile, Downloader};
use crate::fetch::orchestrator::{build_client, run_batch};
use crate::fetch::refresh::Refresher;
use crate::fetch::run_with_retry;
use crate::limiter::AdaptiveLimiter;
use crate::progress::Progress;
use crate::urls;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Substring identifying the CDN whose attachment links expire and can
/// be refreshed. Refresh collects locators containing it; the download
/// pass excludes them.
const CDN_HOST_MARKER: &str = "discordapp";

/// Run every enabled pass over the configured project document.
pub async fn run(config: &Config, quiet: bool) -> Result<()> {
    config.validate()?;
    let progress = Progress::new(quiet);

    let mut doc = load_document(config, &progress).await?;
    if doc.is_null() || doc.as_object().is_some_and(|o| o.is_empty()) {
        bail!("empty project document");
    }

    if config.disable_images {
        warn!("disable_images set: blanking every image field");
        document::clear_field(&mut doc, IMAGE_FIELD);
        return write_document(config, &doc).await;
    }

    let image_dir = config.image_dir();
    tokio::fs::create_dir_all(&image_dir)
        .await
        .with_context(|| format!("creating {}", image_dir.display()))?;

    if config.refresh_links {
        refresh_pass(config, &mut doc, &progress).await?;
    }

    if config.base64_to_image {
        let updates =
            data_uri::extract_embedded(&doc, &image_dir, &config.image_folder).await?;
        if updates.is_empty() {
            info!("no embedded images found");
        } else {
            document::rewrite(&mut doc, &updates);
        }
    }

    if config.download_images {
        download_pass(config, &mut doc, &progress).await?;
    }

    if config.image_to_base64 {
        if config.base64_to_image {
            warn!("base64_to_image and image_to_base64 cannot both be set; skipping embedding");
        } else {
            info!("embedding local images as data URIs");
            let updates = data_uri::embed_images(&image_dir, &config.image_folder).await?;
            document::rewrite(&mut doc, &updates);
            return write_document(config, &doc).await;
        }
    }

    if config.update_prefixes {
        info!(
            "rewriting prefix {:?} -> {:?}",
            config.old_prefix, config.new_prefix
        );
        document::rewrite_prefix(&mut doc, &config.old_prefix, &config.new_prefix);
    }

    write_document(config, &doc).await
}

/// Refresh expiring CDN links, optionally chaining the refreshed URLs
/// straight into a download batch so the document ends up pointing at
/// local files in one rewrite.
async fn refresh_pass(config: &Config, doc: &mut Value, progress: &Progress) -> Result<()> {
    let refs = document::collect(doc, |locator| {
        document::is_remote_url(locator) && locator.contains(CDN_HOST_MARKER)
    });
    if refs.is_empty() {
        info!("no CDN links found, skipping refresh");
        return Ok(());
    }

    let client = build_client(config.batch_timeout())?;
    let refresher = Refresher::new(
        client,
        config.refresh_endpoint.clone(),
        config.token.clone(),
    );
    let limiter = Arc::new(AdaptiveLimiter::new(config.refresh_concurrency));

    let mut updates = run_batch(
        "refreshing links",
        &refs,
        limiter,
        config.batch_timeout(),
        progress,
        |key, locator, limiter| {
            let refresher = refresher.clone();
            async move {
                run_with_retry(&key, &locator, &limiter, || refresher.fetch_one(&locator)).await
            }
        },
    )
    .await?;

    // Keys still correlate to the original locators in the document, so
    // downloading the refreshed URLs yields a map that rewrites the
    // untouched nodes directly to local files.
    if config.download_images {
        updates = download_batch(config, updates, progress).await?;
    }

    document::rewrite(doc, &updates);
    Ok(())
}

/// Download every remote non-CDN image and repoint the document at the
/// local copies.
async fn download_pass(config: &Config, doc: &mut Value, progress: &Progress) -> Result<()> {
    let refs = document::collect(doc, |locator| {
        document::is_remote_url(locator) && !locator.contains(CDN_HOST_MARKER)
    });
    if refs.is_empty() {
        info!("no remote image URLs found, skipping download");
        return Ok(());
    }
    let updates = download_batch(config, refs, progress).await?;
    document::rewrite(doc, &updates);
    Ok(())
}

async fn download_batch(
    config: &Config,
    refs: HashMap<String, String>,
    progress: &Progress,
) -> Result<HashMap<String, String>> {
    let client = build_client(config.batch_timeout())?;
    let downloader = Downloader::new(
        client,
        config.image_dir(),
        config.image_folder.clone(),
        config.overwrite_images,
    );
    let limiter = Arc::new(AdaptiveLimiter::new(config.download_concurrency));

    let results = run_batch(
        "downloading images",
        &refs,
        limiter,
        config.batch_timeout(),
        progress,
        |key, locator, limiter| {
            let downloader = downloader.clone();
            async move {
                run_with_retry(&key, &locator, &limiter, || {
                    downloader.fetch_one(&key, &locator)
                })
                .await
            }
        },
    )
    .await?;
    Ok(results)
}

/// Load the project document from disk, or from the configured project
/// URL with relative image references resolved against its base.
async fn load_document(config: &Config, progress: &Progress) -> Result<Value> {
    if config.project_url.starts_with("http") {
        return load_remote_document(config, progress).await;
    }
    let path = config.project_path();
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading project {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing project {}", path.display()))
}

async fn load_remote_document(config: &Config, progress: &Progress) -> Result<Value> {
    info!("downloading remote project from {}", config.project_url);
    let spinner = progress.spinner("fetching project");
    let client = build_client(config.batch_timeout())?;

    let mut response = get_with_browser_profile(&client, &config.project_url)
        .await
        .context("fetching remote project")?;
    if response.status().as_u16() != 200 {
        // Some hosts reject the browser profile outright; try bare.
        response = client
            .get(&config.project_url)
            .send()
            .await
            .context("fetching remote project")?;
    }
    if response.status().as_u16() != 200 {
        bail!(
            "failed to download project: status {}",
            response.status().as_u16()
        );
    }

    let mut doc: Value = response
        .json()
        .await
        .context("parsing remote project JSON")?;
    spinner.finish_and_clear();

    let base = urls::base_url(&config.project_url)?;
    let resolved = document::collect_relative(&doc, &base);
    if resolved.is_empty() {
        info!("no relative image references to resolve");
    } else {
        info!("resolving {} relative references against {base}", resolved.len());
        document::rewrite(&mut doc, &resolved);
    }
    Ok(doc)
}

/// Serialize the document (sorted keys, pretty or minified) to the
/// output path. Refuses to clobber anything that isn't a JSON file.
async fn write_document(config: &Config, doc: &Value) -> Result<()> {
    let path = config.output_path();
    if path.exists() {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            bail!("refusing to overwrite non-JSON output {}", path.display());
        }
        info!("replacing existing output {}", path.display());
    }

    let rendered = if config.minify {
        serde_json::to_string(doc)?
    } else {
        serde_json::to_string_pretty(doc)?
    };
    tokio::fs::write(&path, rendered)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}
