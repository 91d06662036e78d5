//! Internet Archive gateway.
//!
//! Submits each URL to the Wayback Machine `save` endpoint and reports where
//! the snapshot landed.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::header::CONTENT_LOCATION;
use tokio::task::JoinSet;
use url::Url;

use wayback_core::{
    config::Config,
    errors::Error,
    ports::{Archiver, Collect},
    Result,
};

pub const ARCHIVE_NAME: &str = "Internet Archive";

/// Recorded in place of a snapshot location when a single URL fails.
pub const ARCHIVE_FAILED: &str = "Archive failed.";

#[derive(Clone, Debug)]
pub struct InternetArchive {
    http: reqwest::Client,
    endpoint: Url,
}

impl InternetArchive {
    pub fn new(cfg: &Config) -> Result<Self> {
        Self::with_endpoint(&cfg.ia_endpoint, cfg.archive_timeout)
    }

    pub fn with_endpoint(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid IA endpoint {endpoint:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wayback/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("ia http client: {e}")))?;
        Ok(Self { http, endpoint })
    }

    fn base(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    /// Save one URL and return the snapshot location.
    pub async fn save(&self, target: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/save/{target}", self.base()))
            .send()
            .await
            .map_err(|e| Error::External(format!("ia request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::External(format!("ia save {target} failed: {status}")));
        }

        if let Some(loc) = resp
            .headers()
            .get(CONTENT_LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return Ok(self.absolute(loc));
        }

        // Redirected straight onto the snapshot.
        let last = resp.url();
        if last.path().starts_with("/web/") {
            return Ok(last.to_string());
        }

        Err(Error::External(format!(
            "ia save {target}: no snapshot location in response"
        )))
    }

    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            return location.to_string();
        }
        format!("{}/{}", self.base(), location.trim_start_matches('/'))
    }
}

#[async_trait]
impl Archiver for InternetArchive {
    async fn archive(&self, urls: &[String]) -> Result<Vec<Collect>> {
        let mut set = JoinSet::new();
        for url in urls {
            let this = self.clone();
            let url = url.clone();
            set.spawn(async move {
                let saved = this.save(&url).await;
                (url, saved)
            });
        }

        let mut dst = BTreeMap::new();
        let mut failed = 0usize;
        while let Some(joined) = set.join_next().await {
            let (url, saved) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("[ia] save task failed: {e}");
                    failed += 1;
                    continue;
                }
            };
            match saved {
                Ok(location) => {
                    tracing::debug!("[ia] {url} -> {location}");
                    dst.insert(url, location);
                }
                Err(e) => {
                    tracing::warn!("[ia] {e}");
                    failed += 1;
                    dst.insert(url, ARCHIVE_FAILED.to_string());
                }
            }
        }

        if !urls.is_empty() && failed >= urls.len() {
            return Err(Error::Archive(format!(
                "{ARCHIVE_NAME}: all {} url(s) failed",
                urls.len()
            )));
        }

        Ok(vec![Collect {
            arc: ARCHIVE_NAME.to_string(),
            ext: format!("{}/", self.base()),
            dst,
        }])
    }
}
