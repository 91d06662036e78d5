//! GitHub adapter: publishes archive results as repository issues.
//!
//! The authenticated user needs `public_repo` scope (`repo` for private
//! repositories).

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;

use wayback_core::{
    config::GitHubConfig,
    domain::ReplyTarget,
    errors::Error,
    ports::{Collect, Outlet},
    Result,
};

pub const OUTLET: &str = "github";
const API_BASE: &str = "https://api.github.com";

#[derive(Clone, Debug)]
pub struct GitHubClient {
    cfg: GitHubConfig,
    api_base: String,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(cfg: GitHubConfig) -> Result<Self> {
        Self::with_api_base(cfg, API_BASE)
    }

    pub fn with_api_base(cfg: GitHubConfig, api_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("wayback/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("github http client: {e}")))?;
        Ok(Self {
            cfg,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Create an issue titled `Published at <local time>` and return its number.
    pub async fn create_issue(&self, body: &str) -> Result<u64> {
        let title = format!("Published at {}", Local::now().format("%Y-%m-%dT%H:%M:%S"));
        let url = format!(
            "{}/repos/{}/{}/issues",
            self.api_base, self.cfg.owner, self.cfg.repo
        );

        let resp = self
            .http
            .post(url)
            .basic_auth(&self.cfg.owner, Some(&self.cfg.token))
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "title": title, "body": body }))
            .send()
            .await
            .map_err(|e| Error::External(format!("github request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "github create issue failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("github json error: {e}")))?;

        Ok(v.get("number").and_then(|n| n.as_u64()).unwrap_or_default())
    }
}

/// Markdown rendering used for issue bodies.
pub fn render(results: &[Collect]) -> String {
    let mut out = String::new();
    for col in results {
        out.push_str(&format!("**[{}]({})**:\n", col.arc, col.ext));
        for (src, dst) in &col.dst {
            out.push_str(&format!("> origin: {src}\n> archived: {dst}\n\n"));
        }
        out.push('\n');
    }
    out
}

#[async_trait]
impl Outlet for GitHubClient {
    fn name(&self) -> &'static str {
        OUTLET
    }

    async fn publish(&self, results: &[Collect], _reply: Option<&ReplyTarget>) -> Result<()> {
        let body = render(results);
        if body.trim().is_empty() {
            return Err(Error::External("github: nothing to render".to_string()));
        }
        let number = self.create_issue(&body).await?;
        tracing::debug!(
            "[github] created issue {}/{}#{number}",
            self.cfg.owner,
            self.cfg.repo
        );
        Ok(())
    }
}
