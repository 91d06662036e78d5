//! Mastodon adapter (REST API).
//!
//! Implements the `wayback-core` conversation source over the direct-message
//! conversations API, and the `mastodon` outlet that replies with toots.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use url::Url;

pub mod render;

use wayback_core::{
    config::Config,
    domain::{Conversation, ConversationId, ReplyTarget, Status, StatusId},
    errors::Error,
    ports::{Collect, ConversationSource, Outlet},
    Result,
};

/// Outlet name; the service uses it as the reply origin.
pub const OUTLET: &str = "mastodon";

/// Conversations fetched per poll (Mastodon caps this at 40).
const FETCH_LIMIT: u32 = 40;

#[derive(Clone, Debug)]
pub struct MastodonClient {
    http: reqwest::Client,
    server: Url,
    access_token: String,
    visibility: String,
}

#[derive(Debug, Deserialize)]
struct ApiConversation {
    id: String,
    #[serde(default)]
    accounts: Vec<ApiAccount>,
    last_status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    id: String,
    #[serde(default)]
    content: String,
    account: Option<ApiAccount>,
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    acct: String,
}

#[derive(Debug, Serialize)]
struct NewStatus<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<&'a str>,
    visibility: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostedStatus {
    id: String,
}

impl From<ApiConversation> for Conversation {
    fn from(c: ApiConversation) -> Self {
        let fallback_sender = c.accounts.first().map(|a| a.acct.clone());
        let last_status = c.last_status.map(|s| Status {
            id: StatusId(s.id),
            content: s.content,
            sender: s
                .account
                .map(|a| a.acct)
                .or(fallback_sender)
                .unwrap_or_default(),
        });
        Conversation {
            id: ConversationId(c.id),
            last_status,
        }
    }
}

impl MastodonClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let server = Url::parse(&cfg.mastodon_server)
            .map_err(|e| Error::Config(format!("invalid WAYBACK_MASTODON_SERVER: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("mastodon http client: {e}")))?;

        Ok(Self {
            http,
            server,
            access_token: cfg.mastodon_access_token.clone(),
            visibility: cfg.mastodon_visibility.clone(),
        })
    }

    fn map_err(e: reqwest::Error) -> Error {
        Error::External(format!("mastodon error: {e}"))
    }

    /// `{server}/api/v1/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.server.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("{} cannot be a base URL", self.server)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.access_token)
    }

    async fn check(resp: Response, what: &str) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::External(format!(
            "mastodon {what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    /// Post one status and return its id.
    pub async fn post_status(
        &self,
        text: &str,
        in_reply_to: Option<&StatusId>,
        visibility: &str,
    ) -> Result<StatusId> {
        let body = NewStatus {
            status: text,
            in_reply_to_id: in_reply_to.map(|s| s.0.as_str()),
            visibility,
        };
        let resp = self
            .request(Method::POST, self.endpoint(&["statuses"])?)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_err)?;
        let posted: PostedStatus = Self::check(resp, "post status")
            .await?
            .json()
            .await
            .map_err(Self::map_err)?;
        Ok(StatusId(posted.id))
    }

    /// Post `chunks` as a thread, each toot replying to the previous one.
    async fn post_thread(
        &self,
        chunks: &[String],
        reply: Option<&ReplyTarget>,
        visibility: &str,
    ) -> Result<()> {
        let mut parent = reply.map(|r| r.status_id.clone());
        for chunk in chunks {
            let id = self.post_status(chunk, parent.as_ref(), visibility).await?;
            tracing::debug!("[mastodon] posted status {id}");
            parent = Some(id);
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationSource for MastodonClient {
    async fn fetch_pending(&self) -> Result<Vec<Conversation>> {
        let mut url = self.endpoint(&["conversations"])?;
        url.query_pairs_mut()
            .append_pair("limit", &FETCH_LIMIT.to_string());

        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(Self::map_err)?;
        let convs: Vec<ApiConversation> = Self::check(resp, "get conversations")
            .await?
            .json()
            .await
            .map_err(Self::map_err)?;

        Ok(convs.into_iter().map(Conversation::from).collect())
    }

    async fn clear_notifications(&self) -> Result<()> {
        let resp = self
            .request(Method::POST, self.endpoint(&["notifications", "clear"])?)
            .send()
            .await
            .map_err(Self::map_err)?;
        Self::check(resp, "clear notifications").await?;
        Ok(())
    }

    async fn mark_consumed(&self, id: &ConversationId) -> Result<()> {
        let resp = self
            .request(Method::DELETE, self.endpoint(&["conversations", &id.0])?)
            .send()
            .await
            .map_err(Self::map_err)?;
        Self::check(resp, "delete conversation").await?;
        Ok(())
    }
}

#[async_trait]
impl Outlet for MastodonClient {
    fn name(&self) -> &'static str {
        OUTLET
    }

    async fn publish(&self, results: &[Collect], reply: Option<&ReplyTarget>) -> Result<()> {
        let mention = reply.map(ReplyTarget::mention).unwrap_or_default();
        let chunks = render::toots(&mention, results);
        if chunks.is_empty() {
            return Err(Error::External("mastodon: nothing to render".to_string()));
        }
        self.post_thread(&chunks, reply, &self.visibility).await
    }

    async fn notice(&self, message: &str, reply: &ReplyTarget) -> Result<()> {
        let text = format!("{}{message}", reply.mention());
        self.post_status(&text, Some(&reply.status_id), "direct")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wayback_core::config::ShutdownMode;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &str) -> Config {
        Config {
            mastodon_server: server.to_string(),
            mastodon_client_key: "k".to_string(),
            mastodon_client_secret: "s".to_string(),
            mastodon_access_token: "token".to_string(),
            mastodon_visibility: "unlisted".to_string(),
            fetch_interval: Duration::from_secs(5),
            clear_interval: Duration::from_secs(600),
            grace_delay: Duration::from_secs(1),
            pool_size: 1,
            shutdown: ShutdownMode::Detach,
            github: None,
            ia_enabled: true,
            ia_endpoint: "https://web.archive.org".to_string(),
            archive_timeout: Duration::from_secs(1),
        }
    }

    fn target() -> ReplyTarget {
        ReplyTarget {
            status_id: StatusId("111".to_string()),
            handle: Some("alice@remote.example".to_string()),
        }
    }

    #[tokio::test]
    async fn fetch_pending_decodes_conversations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/conversations"))
            .and(query_param("limit", "40"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
              {
                "id": "7",
                "unread": true,
                "accounts": [{"id": "1", "acct": "alice@remote.example"}],
                "last_status": {
                  "id": "111",
                  "content": "<p>https://example.com</p>",
                  "account": {"id": "1", "acct": "alice@remote.example"}
                }
              },
              {"id": "8", "accounts": [], "last_status": null}
            ])))
            .mount(&server)
            .await;

        let client = MastodonClient::new(&config(&server.uri())).unwrap();
        let convs = client.fetch_pending().await.unwrap();

        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].id, ConversationId("7".to_string()));
        let status = convs[0].last_status.as_ref().unwrap();
        assert_eq!(status.id, StatusId("111".to_string()));
        assert_eq!(status.content, "<p>https://example.com</p>");
        assert_eq!(status.sender, "alice@remote.example");
        assert!(convs[1].last_status.is_none());
    }

    #[tokio::test]
    async fn fetch_error_status_maps_to_external() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/conversations"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = MastodonClient::new(&config(&server.uri())).unwrap();
        match client.fetch_pending().await {
            Err(Error::External(msg)) => assert!(msg.contains("503")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_consumed_and_clear_hit_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/conversations/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/notifications/clear"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = MastodonClient::new(&config(&server.uri())).unwrap();
        client
            .mark_consumed(&ConversationId("7".to_string()))
            .await
            .unwrap();
        client.clear_notifications().await.unwrap();
    }

    #[tokio::test]
    async fn publish_replies_with_configured_visibility() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .and(body_partial_json(json!({
              "in_reply_to_id": "111",
              "visibility": "unlisted"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "222"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut dst = BTreeMap::new();
        dst.insert(
            "https://example.com".to_string(),
            "https://web.archive.org/web/2021/https://example.com".to_string(),
        );
        let results = vec![Collect {
            arc: "Internet Archive".to_string(),
            ext: "https://web.archive.org/".to_string(),
            dst,
        }];

        let client = MastodonClient::new(&config(&server.uri())).unwrap();
        client.publish(&results, Some(&target())).await.unwrap();
    }

    #[tokio::test]
    async fn notice_is_a_direct_reply_mentioning_the_sender() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .and(body_partial_json(json!({
              "status": "@alice@remote.example URL no found",
              "in_reply_to_id": "111",
              "visibility": "direct"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "223"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = MastodonClient::new(&config(&server.uri())).unwrap();
        client.notice("URL no found", &target()).await.unwrap();
    }

    #[test]
    fn endpoint_encodes_segments_under_server_path() {
        let client = MastodonClient::new(&config("https://social.example/")).unwrap();
        assert_eq!(
            client.endpoint(&["conversations", "a/b"]).unwrap().as_str(),
            "https://social.example/api/v1/conversations/a%2Fb"
        );
    }
}
