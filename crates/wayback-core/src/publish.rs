//! Fan-out of archive results to the configured outlets.

use std::sync::Arc;

use crate::{
    domain::ReplyTarget,
    ports::{Collect, Outlet},
};

pub struct Publisher {
    outlets: Vec<Arc<dyn Outlet>>,
}

impl Publisher {
    pub fn new(outlets: Vec<Arc<dyn Outlet>>) -> Self {
        Self { outlets }
    }

    pub fn outlet_names(&self) -> Vec<&'static str> {
        self.outlets.iter().map(|o| o.name()).collect()
    }

    /// Deliver `results` to `origin` as a reply, then cross-post them to every
    /// other outlet. Returns `true` only if every delivery succeeded.
    pub async fn publish(
        &self,
        results: &[Collect],
        origin: &str,
        reply: Option<&ReplyTarget>,
    ) -> bool {
        if results.is_empty() {
            tracing::warn!("[publish] nothing to publish");
            return false;
        }

        if !self.outlets.iter().any(|o| o.name() == origin) {
            tracing::warn!("[publish] origin outlet {origin} is not configured");
        }

        let ordered = self
            .outlets
            .iter()
            .filter(|o| o.name() == origin)
            .chain(self.outlets.iter().filter(|o| o.name() != origin));

        let mut all_ok = true;
        for outlet in ordered {
            let target = if outlet.name() == origin { reply } else { None };
            match outlet.publish(results, target).await {
                Ok(()) => tracing::debug!("[publish] delivered to {}", outlet.name()),
                Err(e) => {
                    tracing::error!("[publish] publish to {} failed: {e}", outlet.name());
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Send a short notice back through the `origin` outlet only.
    pub async fn notice(&self, message: &str, origin: &str, reply: &ReplyTarget) -> bool {
        let Some(outlet) = self.outlets.iter().find(|o| o.name() == origin) else {
            tracing::warn!("[publish] origin outlet {origin} is not configured, notice dropped");
            return false;
        };

        match outlet.notice(message, reply).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("[publish] notice via {origin} failed: {e}");
                false
            }
        }
    }
}
