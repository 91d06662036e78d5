use crate::Result;

/// Initialize tracing for the bot.
///
/// Default: info for the wayback crates, warn for everything else.
/// Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,wayback=info,wayback_core=info,wayback_mastodon=info,wayback_github=info,wayback_ia=info,{}=info",
            service_name.replace('-', "_")
        ))
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
