use std::fmt;

/// Platform-assigned conversation id (opaque string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub String);

/// Platform-assigned status (message) id, used for reply targeting.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatusId(pub String);

impl ConversationId {
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The most recent message of a conversation.
#[derive(Clone, Debug)]
pub struct Status {
    pub id: StatusId,
    /// Raw message body; Mastodon delivers HTML.
    pub content: String,
    /// Sender handle without the leading `@` (e.g. `alice` or `alice@example.social`).
    pub sender: String,
}

/// Snapshot of a pending direct-message thread, fetched once per poll.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub id: ConversationId,
    pub last_status: Option<Status>,
}

/// Where a reply should land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyTarget {
    pub status_id: StatusId,
    pub handle: Option<String>,
}

impl ReplyTarget {
    pub fn from_status(status: &Status) -> Self {
        let handle = Some(status.sender.trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty());
        Self {
            status_id: status.id.clone(),
            handle,
        }
    }

    /// `@handle ` prefix for direct replies, or empty when the sender is unknown.
    pub fn mention(&self) -> String {
        match &self.handle {
            Some(h) => format!("@{h} "),
            None => String::new(),
        }
    }
}
