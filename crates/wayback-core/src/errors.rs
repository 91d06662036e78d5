/// Core error type for the archiving bot.
///
/// Adapter crates map their transport errors into this type so the service
/// loop can tell transient remote failures apart from fatal setup problems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("archive failed: {0}")]
    Archive(String),
}

pub type Result<T> = std::result::Result<T, Error>;
