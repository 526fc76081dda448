use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::models::ConversationQuery;
use crate::inbox::Inbox;

/// Default polling period of the inbox list.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    pub seq: u64,
    pub query: ConversationQuery,
    /// Filters generation `query` was built under.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The page was stored; carries the resolved selection.
    Applied { selected: Option<String> },
    /// A newer refresh was issued while this one was in flight.
    Stale,
}

/// Numbers list requests so only the most recently issued one may land.
#[derive(Debug, Default)]
pub struct RefreshSequencer {
    latest: u64,
}

impl RefreshSequencer {
    pub fn issue(&mut self, query: ConversationQuery, generation: u64) -> RefreshTicket {
        self.latest += 1;
        RefreshTicket { seq: self.latest, query, generation }
    }

    pub fn is_current(&self, ticket: &RefreshTicket) -> bool {
        ticket.seq == self.latest
    }

    pub fn latest(&self) -> u64 {
        self.latest
    }
}

/// Background task refreshing the inbox on a timer and on request.
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Starts polling `inbox` every `every`. `Inbox::request_refresh` wakes
/// the task early; requests made while a refresh runs collapse into one.
pub fn spawn_polling(inbox: Arc<Inbox>, every: Duration) -> Poller {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("polling inbox every {:?}", every);
        loop {
            tokio::select! {
                _ = ticker.tick() => debug!("poll interval elapsed"),
                _ = inbox.refresh_requested() => debug!("refresh requested"),
            }
            match inbox.refresh().await {
                Ok(RefreshOutcome::Applied { selected }) => {
                    debug!("poll refresh applied, selected {:?}", selected)
                }
                Ok(RefreshOutcome::Stale) => debug!("poll refresh superseded"),
                Err(e) => warn!("poll refresh failed: {}", e),
            }
        }
    });
    Poller { handle }
}
