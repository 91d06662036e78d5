//! Conversation poll loop and per-conversation handler.
//!
//! One loop waits on three events: the fetch tick, the housekeeping tick and
//! cancellation. Each fetched conversation is claimed in the in-flight
//! registry and handed to the worker pool; the handler releases the claim
//! after a short grace delay. Dispatched handlers are detached from the loop
//! unless the config asks for a drain on shutdown.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, ShutdownMode},
    domain::{Conversation, ConversationId, ReplyTarget},
    extract::{match_urls, text_content},
    pool::Pool,
    ports::{Archiver, ConversationSource},
    publish::Publisher,
    registry::InFlight,
    stats::{ServiceStats, StatsSnapshot},
    Error, Result,
};

/// Notice sent back when a message carries no link.
pub const NO_URL_NOTICE: &str = "URL no found";

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Running,
    Stopping,
    Stopped,
}

/// Running -> Stopping -> Stopped, each step taken once. `started` makes
/// sure only one loop ever owns the timers.
#[derive(Debug)]
struct Lifecycle {
    state: AtomicU8,
    started: AtomicBool,
}

impl Lifecycle {
    const RUNNING: u8 = 0;
    const STOPPING: u8 = 1;
    const STOPPED: u8 = 2;

    fn new() -> Self {
        Self {
            state: AtomicU8::new(Self::RUNNING),
            started: AtomicBool::new(false),
        }
    }

    fn state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            Self::RUNNING => State::Running,
            Self::STOPPING => State::Stopping,
            _ => State::Stopped,
        }
    }

    /// One-shot start gate: only the first `serve` gets `true`.
    fn begin_serve(&self) -> bool {
        self.state.load(Ordering::SeqCst) == Self::RUNNING
            && self
                .started
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// One-shot stop gate: only the first caller gets `true`.
    fn begin_stop(&self) -> bool {
        self.state
            .compare_exchange(
                Self::RUNNING,
                Self::STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn finish(&self) {
        self.state.store(Self::STOPPED, Ordering::SeqCst);
    }
}

/// How a single conversation ended when no error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Archived; `published` is false when an outlet rejected the result.
    Archived { published: bool },
    /// No URL in the message; the sender got a notice instead.
    NoUrl,
}

/// Returned by [`Service::serve`] after a cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stopped {
    /// Conversations still claimed when the loop returned.
    pub in_flight: usize,
    /// `true` when drain mode waited for every handler.
    pub drained: bool,
    pub stats: StatsSnapshot,
}

#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    /// Outlet name of the platform we poll; replies go there.
    origin: &'static str,
    cfg: Arc<Config>,
    source: Arc<dyn ConversationSource>,
    archiver: Arc<dyn Archiver>,
    publisher: Arc<Publisher>,
    pool: Pool,
    in_flight: InFlight,
    lifecycle: Lifecycle,
    stats: ServiceStats,
}

/// Releases the claim if the handler unwinds before its normal release.
struct Claim {
    inner: Arc<ServiceInner>,
    id: ConversationId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner.in_flight.release(&self.id);
    }
}

impl Service {
    pub fn new(
        origin: &'static str,
        cfg: Arc<Config>,
        source: Arc<dyn ConversationSource>,
        archiver: Arc<dyn Archiver>,
        publisher: Arc<Publisher>,
        pool: Pool,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                origin,
                cfg,
                source,
                archiver,
                publisher,
                pool,
                in_flight: InFlight::new(),
                lifecycle: Lifecycle::new(),
                stats: ServiceStats::default(),
            }),
        }
    }

    pub fn state(&self) -> State {
        self.inner.lifecycle.state()
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.inner.in_flight
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Poll until `cancel` fires.
    ///
    /// Cancellation is a normal stop and yields `Ok(Stopped)`. Errors are
    /// reserved for misuse: serving twice, concurrently or after a stop.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<Stopped> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_serve() {
            return Err(Error::External(format!(
                "[{}] service already serving or stopped",
                inner.origin
            )));
        }

        info!(
            "[{}] serving with {} workers, fetch every {:?}, clear every {:?}",
            inner.origin,
            inner.pool.capacity(),
            inner.cfg.fetch_interval,
            inner.cfg.clear_interval
        );

        // `interval_at` panics on a zero period.
        let fetch_every = inner.cfg.fetch_interval.max(MIN_TICK);
        let clear_every = inner.cfg.clear_interval.max(MIN_TICK);
        let now = Instant::now();
        let mut fetch_tick = interval_at(now + fetch_every, fetch_every);
        fetch_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clear_tick = interval_at(now + clear_every, clear_every);
        clear_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
              biased;
              _ = cancel.cancelled() => {
                if inner.lifecycle.begin_stop() {
                  debug!("[{}] stopping ticker...", inner.origin);
                }
                break;
              }
              _ = fetch_tick.tick() => {
                self.poll_once(&cancel).await;
              }
              _ = clear_tick.tick() => self.clear_notifications(&cancel).await,
            }
        }
        drop(fetch_tick);
        drop(clear_tick);

        info!("[{}] stopping service...", inner.origin);

        let drained = match inner.cfg.shutdown {
            ShutdownMode::Detach => false,
            ShutdownMode::Drain(timeout) => {
                let drained = inner.pool.drain(timeout).await;
                if !drained {
                    warn!(
                        "[{}] drain timed out after {timeout:?} with {} conversations in flight",
                        inner.origin,
                        inner.in_flight.len()
                    );
                }
                drained
            }
        };

        inner.lifecycle.finish();

        let stats = inner.stats.snapshot();
        info!(
            "[{}] stopped: requests={} successes={} skipped={} failures={}",
            inner.origin, stats.requests, stats.successes, stats.skipped, stats.failures
        );

        Ok(Stopped {
            in_flight: inner.in_flight.len(),
            drained,
            stats,
        })
    }

    /// Fetch pending conversations once and dispatch the unclaimed ones.
    ///
    /// Returns how many handlers were dispatched.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> usize {
        let inner = &self.inner;
        let fetched = tokio::select! {
          biased;
          _ = cancel.cancelled() => return 0,
          res = inner.source.fetch_pending() => res,
        };

        let convs = match fetched {
            Ok(convs) => convs,
            Err(e) => {
                error!("[{}] get conversations failure, error: {e}", inner.origin);
                return 0;
            }
        };
        debug!("[{}] conversations: {}", inner.origin, convs.len());

        let mut dispatched = 0;
        for conv in convs {
            if self.dispatch(conv) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Claim `conv` and hand it to the pool. `false` if it is already in flight.
    pub fn dispatch(&self, conv: Conversation) -> bool {
        let inner = &self.inner;
        if !inner.in_flight.try_acquire(&conv.id) {
            debug!("[{}] conversation {} already in flight", inner.origin, conv.id);
            return false;
        }

        let claim = Claim {
            inner: inner.clone(),
            id: conv.id.clone(),
        };
        let svc = self.clone();
        inner.pool.submit(async move {
            svc.handle(conv, claim).await;
        });
        true
    }

    async fn clear_notifications(&self, cancel: &CancellationToken) {
        let inner = &self.inner;
        debug!("[{}] clear notifications...", inner.origin);
        let res = tokio::select! {
          biased;
          _ = cancel.cancelled() => return,
          res = inner.source.clear_notifications() => res,
        };
        if let Err(e) = res {
            warn!("[{}] clear notifications failure, error: {e}", inner.origin);
        }
    }

    async fn handle(&self, conv: Conversation, claim: Claim) {
        let inner = &self.inner;
        inner.stats.request();

        match self.process(&conv).await {
            Ok(Outcome::Archived { published }) => {
                if !published {
                    warn!(
                        "[{}] conversation {} archived but not fully published",
                        inner.origin, conv.id
                    );
                }
                inner.stats.success();
            }
            Ok(Outcome::NoUrl) => inner.stats.skip(),
            Err(e) => {
                error!(
                    "[{}] process failure, conversation: {}, error: {e}",
                    inner.origin, conv.id
                );
                inner.stats.failure();
            }
        }

        if !conv.id.is_empty() {
            if let Err(e) = inner.source.mark_consumed(&conv.id).await {
                warn!(
                    "[{}] mark conversation {} consumed failure, error: {e}",
                    inner.origin, conv.id
                );
            }
        }

        // Let the platform catch up before the next fetch can claim it again.
        sleep(inner.cfg.grace_delay).await;
        drop(claim);
    }

    /// Turn one conversation into zero or one archive + publish cycle.
    pub async fn process(&self, conv: &Conversation) -> Result<Outcome> {
        let inner = &self.inner;
        let status = match conv.last_status.as_ref() {
            Some(status) if !conv.id.is_empty() => status,
            _ => {
                debug!("[{}] no status or conversation", inner.origin);
                return Err(Error::InvalidConversation(
                    "no status or conversation".to_string(),
                ));
            }
        };

        let text = text_content(&status.content);
        debug!(
            "[{}] conversation id: {} message: {text}",
            inner.origin, conv.id
        );

        let reply = ReplyTarget::from_status(status);
        let urls = match_urls(&text);
        if urls.is_empty() {
            info!("[{}] archives failure, URL no found.", inner.origin);
            inner
                .publisher
                .notice(NO_URL_NOTICE, inner.origin, &reply)
                .await;
            return Ok(Outcome::NoUrl);
        }

        let collects = inner.archiver.archive(&urls).await.map_err(|e| match e {
            Error::Archive(_) => e,
            other => Error::Archive(other.to_string()),
        })?;
        if collects.is_empty() {
            return Err(Error::Archive("archiver returned no results".to_string()));
        }

        let published = inner
            .publisher
            .publish(&collects, inner.origin, Some(&reply))
            .await;
        Ok(Outcome::Archived { published })
    }
}
