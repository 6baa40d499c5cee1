//! CDN attachment-link refresh operation.
//!
//! Expiring CDN links are exchanged for fresh ones through a fixed
//! refresh endpoint: one POST per locator with bearer-token
//! authorization, response carrying the refreshed URL.

use crate::fetch::{AttemptOutcome, RateLimitSignal};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default refresh endpoint; overridable through the run config.
pub const DEFAULT_REFRESH_ENDPOINT: &str = "https://discord.com/api/v9/attachments/refresh-urls";

#[derive(Serialize)]
struct RefreshRequest<'a> {
    attachment_urls: [&'a str; 1],
}

#[derive(Deserialize)]
struct RefreshResponse {
    refreshed_urls: Vec<RefreshedUrl>,
}

#[derive(Deserialize)]
struct RefreshedUrl {
    refreshed: String,
}

/// Refreshes one expiring link per call; shared by all workers of a batch.
#[derive(Clone)]
pub struct Refresher {
    client: Client,
    endpoint: String,
    token: String,
}

impl Refresher {
    pub fn new(client: Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// One refresh attempt, classified for the retry loop.
    pub async fn fetch_one(&self, locator: &str) -> AttemptOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&RefreshRequest {
                attachment_urls: [locator],
            })
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::Failed(format!("transport error: {e}")),
        };

        match response.status().as_u16() {
            200 => match response.json::<RefreshResponse>().await {
                Ok(body) => match body.refreshed_urls.into_iter().next() {
                    Some(entry) => AttemptOutcome::Done(entry.refreshed),
                    None => AttemptOutcome::Failed("empty refresh response".to_string()),
                },
                Err(e) => AttemptOutcome::Failed(format!("malformed refresh response: {e}")),
            },
            429 => AttemptOutcome::RateLimited(RateLimitSignal::from_headers(response.headers())),
            status => AttemptOutcome::Failed(format!("status {status}")),
        }
    }
}
