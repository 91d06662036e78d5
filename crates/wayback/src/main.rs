use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wayback_core::{
    config::Config,
    pool::Pool,
    ports::{Archiver, ConversationSource, Outlet},
    publish::Publisher,
    service::Service,
};
use wayback_github::GitHubClient;
use wayback_ia::InternetArchive;
use wayback_mastodon::MastodonClient;

#[tokio::main]
async fn main() -> Result<(), wayback_core::Error> {
    wayback_core::logging::init("wayback")?;

    let cfg = Arc::new(Config::load()?);

    let mastodon = Arc::new(MastodonClient::new(&cfg)?);
    let mut outlets: Vec<Arc<dyn Outlet>> = vec![mastodon.clone() as Arc<dyn Outlet>];
    if let Some(gh) = &cfg.github {
        outlets.push(Arc::new(GitHubClient::new(gh.clone())?));
    }
    let publisher = Arc::new(Publisher::new(outlets));

    let archiver: Arc<dyn Archiver> = Arc::new(InternetArchive::new(&cfg)?);
    let source: Arc<dyn ConversationSource> = mastodon;

    let service = Service::new(
        wayback_mastodon::OUTLET,
        cfg.clone(),
        source,
        archiver,
        publisher.clone(),
        Pool::new(cfg.pool_size),
    );

    tracing::info!(
        "wayback started: server={} outlets={:?} pool={} fetch={:?} clear={:?}",
        cfg.mastodon_server,
        publisher.outlet_names(),
        cfg.pool_size,
        cfg.fetch_interval,
        cfg.clear_interval
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let stopped = service.serve(cancel).await?;
    tracing::info!(
        "wayback stopped: in_flight={} drained={} requests={} successes={} skipped={} failures={}",
        stopped.in_flight,
        stopped.drained,
        stopped.stats.requests,
        stopped.stats.successes,
        stopped.stats.skipped,
        stopped.stats.failures
    );

    Ok(())
}

/// Cancel on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown requested");
    cancel.cancel();
}
