use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    domain::{Conversation, ConversationId, ReplyTarget},
    Result,
};

/// Remote inbox the service polls (Mastodon direct messages today).
///
/// Implementations must be safe to share across the poll loop and every
/// in-flight handler; the service does not serialize calls.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn fetch_pending(&self) -> Result<Vec<Conversation>>;
    async fn clear_notifications(&self) -> Result<()>;
    async fn mark_consumed(&self, id: &ConversationId) -> Result<()>;
}

/// Archived locations produced by one archiving backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collect {
    /// Backend display name, e.g. `Internet Archive`.
    pub arc: String,
    /// Backend home page.
    pub ext: String,
    /// Origin URL -> archived location (or a failure marker).
    pub dst: BTreeMap<String, String>,
}

/// External archiving engine.
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, urls: &[String]) -> Result<Vec<Collect>>;
}

/// A single publishing destination.
#[async_trait]
pub trait Outlet: Send + Sync {
    /// Stable outlet name used for routing (`mastodon`, `github`).
    fn name(&self) -> &'static str;

    async fn publish(&self, results: &[Collect], reply: Option<&ReplyTarget>) -> Result<()>;

    /// Short text notice to the original sender. Outlets without a reply
    /// channel keep the default.
    async fn notice(&self, message: &str, reply: &ReplyTarget) -> Result<()> {
        let _ = (message, reply);
        Err(crate::Error::External(format!(
            "{} outlet does not support notices",
            self.name()
        )))
    }
}
