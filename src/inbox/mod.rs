//! Conversation synchronisation core.
//!
//! [`Inbox`] owns the cached page of conversations and the selection state.
//! Every backend call suspends without holding the state lock, so list
//! refreshes, mark-read calls and sends may interleave; ordering is
//! restored at apply time by sequence numbers and in-flight guards.

pub mod cache;
pub mod command;
pub mod composer;
pub mod funnel;
pub mod read_state;
pub mod refresh;
pub mod selection;


use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{watch, Notify};
use tokio::sync::futures::Notified;

use crate::api::models::{Conversation, ConversationPage, Customer, CustomerStatus, Deal, Filters, Message};
use crate::api::store::ChannelStore;
use crate::error::{Error, Result};

use cache::{ConversationCache, Patch};
use command::{Command, CommandOutcome, DealDraft, StatusLedger};
use composer::OutboundMessage;
use funnel::{funnel_board, FunnelColumn, FunnelFilter};
use read_state::{MarkReadOutcome, ReadStateReconciler};
use refresh::{RefreshOutcome, RefreshSequencer};
use selection::SelectionState;

/// What the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxSnapshot {
    pub conversations: Vec<Conversation>,
    pub selected_conversation_id: Option<String>,
    pub loading: bool,
    pub total_pages: u32,
    pub current_page: u32,
}

#[derive(Debug, Default)]
struct InboxState {
    cache: ConversationCache,
    selection: SelectionState,
    reads: ReadStateReconciler,
    refreshes: RefreshSequencer,
    statuses: StatusLedger,
    loading: bool,
}

impl InboxState {
    fn snapshot(&self) -> InboxSnapshot {
        InboxSnapshot {
            conversations: self.cache.conversations().to_vec(),
            selected_conversation_id: self.selection.active_conversation_id.clone(),
            loading: self.loading,
            total_pages: self.cache.total_pages(),
            current_page: self.selection.current_page,
        }
    }

    fn reselect(&mut self) -> Option<String> {
        let visible = self.cache.ids();
        self.selection.reselect(&visible)
    }

    /// Points in-flight status changes at the status the backend just
    /// reported, so a failing one restores that rather than an older value.
    fn rebase_statuses(&mut self) {
        for customer_id in self.statuses.customers() {
            if let Some(status) = self.cache.confirmed_status(&customer_id) {
                self.statuses.rebase(&customer_id, status);
            }
        }
    }

    fn selected_unread(&self) -> Option<String> {
        let id = self.selection.active_conversation_id.as_deref()?;
        let conv = self.cache.get(id)?;
        (conv.unread_count > 0 && !self.reads.is_in_flight(id)).then(|| id.to_string())
    }
}

pub struct Inbox {
    store: Arc<dyn ChannelStore>,
    request_timeout: Duration,
    state: Mutex<InboxState>,
    snapshots: watch::Sender<InboxSnapshot>,
    refresh_trigger: Notify,
}

impl Inbox {
    pub fn new(store: Arc<dyn ChannelStore>, request_timeout: Duration) -> Self {
        let (snapshots, _) = watch::channel(InboxSnapshot::default());
        Self {
            store,
            request_timeout,
            state: Mutex::new(InboxState::default()),
            snapshots,
            refresh_trigger: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, InboxState> {
        // Critical sections never await, so a poisoned lock still guards
        // consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &InboxState) {
        self.snapshots.send_replace(state.snapshot());
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.request_timeout)),
        }
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        self.state().snapshot()
    }

    /// Receives a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<InboxSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn selected_conversation(&self) -> Option<Conversation> {
        let state = self.state();
        let id = state.selection.active_conversation_id.as_deref()?;
        state.cache.get(id).cloned()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state().cache.get(conversation_id).cloned()
    }

    pub fn filters(&self) -> Filters {
        self.state().selection.filters.clone()
    }

    pub fn funnel(&self, filter: &FunnelFilter) -> Vec<FunnelColumn> {
        funnel_board(self.state().cache.conversations(), filter)
    }

    /// Asks the polling task for an early refresh.
    pub fn request_refresh(&self) {
        self.refresh_trigger.notify_one();
    }

    pub(crate) fn refresh_requested(&self) -> Notified<'_> {
        self.refresh_trigger.notified()
    }

    /// Seeds the cache with a locally persisted page before the first
    /// refresh. Does not take part in request sequencing.
    pub fn warm_start(&self, page: ConversationPage) {
        let mut state = self.state();
        state.cache.replace_page(page.conversations, page.total_pages, page.current_page);
        state.reselect();
        self.publish(&state);
    }

    /// Fetches the current page and re-resolves the selection. A response
    /// overtaken by a newer request is dropped, errors included.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let ticket = {
            let mut guard = self.state();
            let state = &mut *guard;
            let ticket = state.refreshes.issue(state.selection.query(), state.selection.generation());
            state.loading = true;
            self.publish(state);
            ticket
        };
        debug!("refresh #{} requested for page {}", ticket.seq, ticket.query.page);

        let result = self.call(self.store.list_conversations(&ticket.query)).await;

        let (selected, unread) = {
            let mut guard = self.state();
            let state = &mut *guard;
            if !state.refreshes.is_current(&ticket) {
                debug!("discarding refresh #{}, #{} is newer", ticket.seq, state.refreshes.latest());
                return Ok(RefreshOutcome::Stale);
            }
            state.loading = false;
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    self.publish(state);
                    warn!("refresh #{} failed: {}", ticket.seq, e);
                    return Err(e);
                }
            };
            state.cache.replace_page(page.conversations, page.total_pages, page.current_page);
            state.selection.listed(ticket.generation);
            if state.cache.current_page() > 0 {
                state.selection.current_page = state.cache.current_page();
            }
            state.rebase_statuses();
            let selected = state.reselect();
            self.publish(state);
            (selected, state.selected_unread())
        };
        debug!("refresh #{} applied, selected {:?}", ticket.seq, selected);

        if let Some(id) = unread {
            self.mark_read(&id).await;
        }
        Ok(RefreshOutcome::Applied { selected })
    }

    /// Replaces one cached conversation with the backend's copy.
    pub async fn reload_conversation(&self, conversation_id: &str) -> Result<()> {
        let fresh = self.call(self.store.get_conversation(conversation_id)).await?;
        let mut state = self.state();
        state.cache.replace_conversation(fresh);
        state.rebase_statuses();
        self.publish(&state);
        Ok(())
    }

    /// Points the explicit selector at `explicit_id` (or clears it) and
    /// marks the resulting selection read.
    pub async fn select_conversation(&self, explicit_id: Option<String>) -> Option<String> {
        let (selected, unread) = {
            let mut state = self.state();
            state.selection.explicit_id = explicit_id;
            let selected = state.reselect();
            self.publish(&state);
            (selected, state.selected_unread())
        };
        if let Some(id) = unread {
            self.mark_read(&id).await;
        }
        selected
    }

    pub async fn set_filters(&self, filters: Filters) -> Result<RefreshOutcome> {
        let changed = self.state().selection.set_filters(filters);
        if !changed {
            return Ok(RefreshOutcome::Applied { selected: self.snapshot().selected_conversation_id });
        }
        self.refresh().await
    }

    pub async fn reset_filters(&self) -> Result<RefreshOutcome> {
        self.set_filters(Filters::default()).await
    }

    pub async fn set_page(&self, page: u32) -> Result<RefreshOutcome> {
        let changed = {
            let mut guard = self.state();
            let state = &mut *guard;
            state.selection.set_page(page, state.cache.total_pages())
        };
        if !changed {
            return Ok(RefreshOutcome::Applied { selected: self.snapshot().selected_conversation_id });
        }
        self.refresh().await
    }

    pub async fn next_page(&self) -> Result<RefreshOutcome> {
        let page = self.state().selection.current_page.saturating_add(1);
        self.set_page(page).await
    }

    pub async fn previous_page(&self) -> Result<RefreshOutcome> {
        let page = self.state().selection.current_page.saturating_sub(1);
        self.set_page(page).await
    }

    /// Zeroes the unread counter locally and tells the backend. A failed
    /// call is logged and left for the next refresh to correct.
    pub async fn mark_read(&self, conversation_id: &str) -> MarkReadOutcome {
        let patch = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(patch) = state.reads.begin(&mut state.cache, conversation_id) else {
                return MarkReadOutcome::Skipped;
            };
            self.publish(state);
            patch
        };

        let result = self.call(self.store.mark_read(conversation_id)).await;

        let mut guard = self.state();
        let state = &mut *guard;
        state.reads.finish(&mut state.cache, conversation_id, &patch);
        match result {
            Ok(()) => MarkReadOutcome::Confirmed,
            Err(e) => {
                warn!("mark-read for {} failed, keeping local state: {}", conversation_id, e);
                MarkReadOutcome::Failed
            }
        }
    }

    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::SendMessage { conversation_id, text } => {
                self.send_message(&conversation_id, &text).await.map(CommandOutcome::MessageSent)
            }
            Command::ChangeStatus { customer_id, status } => {
                self.change_customer_status(&customer_id, status).await.map(CommandOutcome::StatusChanged)
            }
            Command::CreateDeal { customer_id, deal } => {
                self.create_deal(&customer_id, &deal).await.map(CommandOutcome::DealCreated)
            }
        }
    }

    /// Appends `text` locally, sends it, then swaps in the backend's copy or
    /// removes the local one. The caller keeps its draft on error.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message> {
        let mut outbound = OutboundMessage::draft(conversation_id, text)?;
        let local = outbound
            .stage(Utc::now())
            .ok_or_else(|| Error::Validation("message already staged".into()))?;
        let patch = Patch::AppendMessage(local);
        {
            let mut state = self.state();
            state.cache.apply_optimistic(outbound.conversation_id(), patch.clone());
            self.publish(&state);
        }

        let result = self.call(self.store.send_message(outbound.conversation_id(), outbound.text())).await;

        let mut state = self.state();
        match result {
            Ok(message) => {
                if let Some(temp_id) = outbound.temp_id() {
                    state.cache.confirm_message(outbound.conversation_id(), temp_id, message.clone());
                }
                outbound.confirm();
                self.publish(&state);
                info!("message {} sent to {}", message.id, conversation_id);
                Ok(message)
            }
            Err(e) => {
                state.cache.rollback(outbound.conversation_id(), &patch);
                outbound.roll_back();
                self.publish(&state);
                warn!("send to {} failed, local copy removed: {}", conversation_id, e);
                Err(e)
            }
        }
    }

    /// Moves a customer to another funnel stage. The latest initiated change
    /// per customer decides what stays visible.
    pub async fn change_customer_status(&self, customer_id: &str, status: CustomerStatus) -> Result<Customer> {
        let (seq, patch, targets) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let targets = state.cache.conversation_ids_for_customer(customer_id);
            let current = targets
                .first()
                .and_then(|id| state.cache.get(id))
                .map_or(status, |c| c.customer.status);
            let (seq, baseline) = state.statuses.begin(customer_id, current);
            let patch = Patch::SetStatus { status, previous: baseline };
            for id in &targets {
                state.cache.apply_optimistic(id, patch.clone());
            }
            self.publish(state);
            (seq, patch, targets)
        };

        let result = self.call(self.store.update_customer_status(customer_id, status)).await;

        let mut guard = self.state();
        let state = &mut *guard;
        match result {
            Ok(customer) => {
                let latest = state.statuses.succeeded(customer_id, seq, customer.status);
                for id in &targets {
                    state.cache.settle(id, &patch);
                }
                if latest {
                    state.cache.replace_customer(customer.clone());
                } else {
                    debug!("status change #{} for {} superseded", seq, customer_id);
                    state.cache.rebase_status(customer_id, customer.status);
                }
                self.publish(state);
                Ok(customer)
            }
            Err(e) => {
                let latest = state.statuses.failed(customer_id, seq);
                for id in &targets {
                    if latest {
                        state.cache.rollback(id, &patch);
                    } else {
                        state.cache.settle(id, &patch);
                    }
                }
                self.publish(state);
                warn!("status change for {} failed: {}", customer_id, e);
                Err(e)
            }
        }
    }

    pub async fn create_deal(&self, customer_id: &str, draft: &DealDraft) -> Result<Deal> {
        let new_deal = draft.validate()?;
        let local = DealDraft::optimistic(&new_deal, Utc::now().date_naive());
        let patch = Patch::AppendDeal(local.clone());
        let targets = {
            let mut state = self.state();
            let targets = state.cache.conversation_ids_for_customer(customer_id);
            for id in &targets {
                state.cache.apply_optimistic(id, patch.clone());
            }
            self.publish(&state);
            targets
        };

        let result = self.call(self.store.create_deal(customer_id, &new_deal)).await;

        let mut state = self.state();
        match result {
            Ok(deal) => {
                for id in &targets {
                    state.cache.confirm_deal(id, &local.id, deal.clone());
                }
                self.publish(&state);
                info!("deal {} created for {}", deal.id, customer_id);
                Ok(deal)
            }
            Err(e) => {
                for id in &targets {
                    state.cache.rollback(id, &patch);
                }
                self.publish(&state);
                warn!("deal creation for {} failed: {}", customer_id, e);
                Err(e)
            }
        }
    }
}
