use std::collections::{HashMap, HashSet};

use log::debug;

use crate::api::models::{Conversation, Customer, CustomerStatus, Deal, Message, Sender};

/// A local edit applied ahead of backend confirmation.
///
/// Each variant carries what it needs to be reverted exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    AppendMessage(Message),
    ClearUnread { previous: u32 },
    SetStatus { status: CustomerStatus, previous: CustomerStatus },
    AppendDeal(Deal),
}

impl Patch {
    fn apply(&self, conv: &mut Conversation) {
        match self {
            Patch::AppendMessage(message) => conv.messages.push(message.clone()),
            Patch::ClearUnread { .. } => conv.unread_count = 0,
            Patch::SetStatus { status, .. } => conv.customer.status = *status,
            Patch::AppendDeal(deal) => conv.customer.deal_history.push(deal.clone()),
        }
    }

    fn revert(&self, conv: &mut Conversation) {
        match self {
            Patch::AppendMessage(message) => {
                if let Some(pos) = conv.messages.iter().rposition(|m| m.id == message.id) {
                    conv.messages.remove(pos);
                }
            }
            Patch::ClearUnread { previous } => conv.unread_count = *previous,
            Patch::SetStatus { previous, .. } => conv.customer.status = *previous,
            Patch::AppendDeal(deal) => {
                if let Some(pos) = conv.customer.deal_history.iter().rposition(|d| d.id == deal.id) {
                    conv.customer.deal_history.remove(pos);
                }
            }
        }
    }

    /// Whether `other` refers to the same pending edit as `self`.
    fn same_edit(&self, other: &Patch) -> bool {
        match (self, other) {
            (Patch::AppendMessage(a), Patch::AppendMessage(b)) => a.id == b.id,
            (Patch::AppendDeal(a), Patch::AppendDeal(b)) => a.id == b.id,
            (Patch::ClearUnread { .. }, Patch::ClearUnread { .. }) => true,
            (Patch::SetStatus { status: a, .. }, Patch::SetStatus { status: b, .. }) => a == b,
            _ => false,
        }
    }

    fn touches_customer(&self) -> bool {
        matches!(self, Patch::SetStatus { .. } | Patch::AppendDeal(_))
    }
}

/// The most recently fetched page of conversations plus the optimistic
/// edits that have not been confirmed or rolled back yet.
///
/// Never fails: operations on conversations that are not cached are no-ops.
#[derive(Debug, Default)]
pub struct ConversationCache {
    conversations: Vec<Conversation>,
    total_pages: u32,
    current_page: u32,
    pending: Vec<(String, Patch)>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn ids(&self) -> Vec<String> {
        self.conversations.iter().map(|c| c.id.clone()).collect()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    fn get_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn conversation_ids_for_customer(&self, customer_id: &str) -> Vec<String> {
        self.conversations
            .iter()
            .filter(|c| c.customer.id == customer_id)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn has_pending(&self, conversation_id: &str) -> bool {
        self.pending.iter().any(|(id, _)| id == conversation_id)
    }

    /// Replaces the cached page wholesale. Pending edits for conversations
    /// still on the page are re-applied on top of the fresh snapshot, the
    /// rest are dropped.
    pub fn replace_page(&mut self, conversations: Vec<Conversation>, total_pages: u32, current_page: u32) {
        self.conversations = conversations;
        self.total_pages = total_pages;
        self.current_page = current_page;

        let before = self.pending.len();
        self.reapply_pending(|_| true);
        if self.pending.len() != before {
            debug!("dropped {} optimistic edit(s) for conversations off the page", before - self.pending.len());
        }
    }

    /// Replaces a single cached conversation, keeping its pending edits.
    /// No-op when the conversation is not on the current page.
    pub fn replace_conversation(&mut self, fresh: Conversation) {
        let id = fresh.id.clone();
        let Some(conv) = self.get_mut(&id) else { return };
        *conv = fresh;
        self.reapply_pending(|pending_id| pending_id == id);
    }

    /// Lays pending edits of freshly stored conversations back on top.
    /// Their inverses are rebased onto the backend values, so a rollback
    /// restores what the backend last said. Edits whose conversation is
    /// gone are dropped.
    fn reapply_pending(&mut self, refreshed: impl Fn(&str) -> bool) {
        let fresh: HashMap<String, (u32, CustomerStatus)> = self
            .conversations
            .iter()
            .filter(|c| refreshed(&c.id))
            .map(|c| (c.id.clone(), (c.unread_count, c.customer.status)))
            .collect();
        let mut claimed = HashSet::new();

        for (id, mut patch) in std::mem::take(&mut self.pending) {
            if !refreshed(&id) {
                self.pending.push((id, patch));
                continue;
            }
            let Some(&(unread, status)) = fresh.get(&id) else { continue };
            let Some(conv) = self.conversations.iter_mut().find(|c| c.id == id) else { continue };
            let delivered = match &mut patch {
                Patch::ClearUnread { previous } => {
                    *previous = unread;
                    None
                }
                Patch::SetStatus { previous, .. } => {
                    *previous = status;
                    None
                }
                Patch::AppendMessage(local) => delivered_copy(conv, local, |pos| claimed.contains(&(id.clone(), pos))),
                Patch::AppendDeal(_) => None,
            };
            match delivered {
                // The page already carries the sent message; keep the edit
                // pending for confirmation but do not show it twice.
                Some(pos) => {
                    claimed.insert((id.clone(), pos));
                }
                None => patch.apply(conv),
            }
            self.pending.push((id, patch));
        }
    }

    pub fn apply_optimistic(&mut self, conversation_id: &str, patch: Patch) -> bool {
        let Some(conv) = self.get_mut(conversation_id) else { return false };
        patch.apply(conv);
        self.pending.push((conversation_id.to_string(), patch));
        true
    }

    /// Reverses a previously applied optimistic patch.
    pub fn rollback(&mut self, conversation_id: &str, patch: &Patch) -> bool {
        let Some(stored) = self.take_pending(conversation_id, patch) else { return false };
        let Some(conv) = self.get_mut(conversation_id) else { return false };
        // The stored copy carries `previous` values refreshed by `replace_page`.
        stored.revert(conv);
        true
    }

    /// Forgets a pending patch without reverting it.
    pub fn settle(&mut self, conversation_id: &str, patch: &Patch) {
        self.take_pending(conversation_id, patch);
    }

    fn take_pending(&mut self, conversation_id: &str, patch: &Patch) -> Option<Patch> {
        let pos = self
            .pending
            .iter()
            .position(|(id, p)| id == conversation_id && p.same_edit(patch))?;
        Some(self.pending.remove(pos).1)
    }

    /// Swaps the optimistic message `temp_id` for the backend's copy.
    pub fn confirm_message(&mut self, conversation_id: &str, temp_id: &str, message: Message) {
        self.pending.retain(|(id, p)| {
            !(id == conversation_id && matches!(p, Patch::AppendMessage(m) if m.id == temp_id))
        });
        let Some(conv) = self.get_mut(conversation_id) else { return };
        let Some(pos) = conv.messages.iter().rposition(|m| m.id == temp_id) else { return };
        if conv.messages.iter().any(|m| m.id == message.id) {
            // A refresh already delivered the authoritative copy.
            conv.messages.remove(pos);
        } else {
            conv.messages[pos] = message;
        }
    }

    /// Swaps the optimistic deal `temp_id` for the backend's copy.
    pub fn confirm_deal(&mut self, conversation_id: &str, temp_id: &str, deal: Deal) {
        self.pending.retain(|(id, p)| {
            !(id == conversation_id && matches!(p, Patch::AppendDeal(d) if d.id == temp_id))
        });
        let Some(conv) = self.get_mut(conversation_id) else { return };
        let history = &mut conv.customer.deal_history;
        let Some(pos) = history.iter().rposition(|d| d.id == temp_id) else { return };
        if history.iter().any(|d| d.id == deal.id) {
            history.remove(pos);
        } else {
            history[pos] = deal;
        }
    }

    /// Points pending status edits of `customer_id` at a newly confirmed
    /// status, so a later rollback lands there.
    pub fn rebase_status(&mut self, customer_id: &str, confirmed: CustomerStatus) {
        let ids = self.conversation_ids_for_customer(customer_id);
        for (id, patch) in self.pending.iter_mut() {
            if let Patch::SetStatus { previous, .. } = patch {
                if ids.contains(id) {
                    *previous = confirmed;
                }
            }
        }
    }

    /// The backend status pending status edits of `customer_id` fall back to.
    pub fn confirmed_status(&self, customer_id: &str) -> Option<CustomerStatus> {
        let ids = self.conversation_ids_for_customer(customer_id);
        self.pending.iter().find_map(|(id, patch)| match patch {
            Patch::SetStatus { previous, .. } if ids.contains(id) => Some(*previous),
            _ => None,
        })
    }

    /// Stores a confirmed customer snapshot on every conversation of that
    /// customer. It supersedes pending status edits; pending deals are
    /// re-applied on top.
    pub fn replace_customer(&mut self, customer: Customer) {
        let ids = self.conversation_ids_for_customer(&customer.id);
        self.pending
            .retain(|(id, p)| !(ids.contains(id) && matches!(p, Patch::SetStatus { .. })));
        for conv in self.conversations.iter_mut().filter(|c| c.customer.id == customer.id) {
            conv.customer = customer.clone();
            for (id, patch) in &self.pending {
                if *id == conv.id && patch.touches_customer() {
                    patch.apply(conv);
                }
            }
        }
    }
}

/// Position of a user message in `conv` matching the local copy `local`,
/// sent at or after it, that no other pending send has claimed.
fn delivered_copy(conv: &Conversation, local: &Message, claimed: impl Fn(usize) -> bool) -> Option<usize> {
    conv.messages.iter().enumerate().position(|(pos, m)| {
        !claimed(pos) && m.sender == Sender::User && m.text == local.text && m.timestamp >= local.timestamp
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Channel, DealStatus, Sender};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn message(id: &str, sender: Sender) -> Message {
        Message {
            id: id.into(),
            text: format!("text {id}"),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            sender,
        }
    }

    fn conversation(id: &str, customer_id: &str, unread: u32) -> Conversation {
        Conversation {
            id: id.into(),
            customer: Customer {
                id: customer_id.into(),
                name: format!("Customer {customer_id}"),
                email: format!("{customer_id}@example.com"),
                phone: String::new(),
                avatar_url: String::new(),
                joined: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                tags: vec![],
                channel: Channel::Whatsapp,
                status: CustomerStatus::New,
                deal_history: vec![],
            },
            channel: Channel::Whatsapp,
            messages: vec![message(&format!("{id}_m1"), Sender::Customer)],
            unread_count: unread,
        }
    }

    fn deal(id: &str) -> Deal {
        Deal {
            id: id.into(),
            name: "Pro plan".into(),
            status: DealStatus::InProgress,
            amount: 500.0,
            close_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        }
    }

    #[test]
    fn apply_on_missing_conversation_is_noop() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        assert!(!cache.apply_optimistic("c9", Patch::ClearUnread { previous: 3 }));
        assert!(!cache.has_pending("c9"));
    }

    #[test]
    fn rollback_restores_message_sequence_exactly() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        let before = cache.get("c1").unwrap().messages.clone();

        let patch = Patch::AppendMessage(message("tmp_1", Sender::User));
        assert!(cache.apply_optimistic("c1", patch.clone()));
        assert_eq!(cache.get("c1").unwrap().messages.len(), 2);

        assert!(cache.rollback("c1", &patch));
        assert_eq!(cache.get("c1").unwrap().messages, before);
        assert!(!cache.has_pending("c1"));
    }

    #[test]
    fn rollback_restores_previous_unread_and_status() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 4)], 1, 1);

        let unread = Patch::ClearUnread { previous: 4 };
        cache.apply_optimistic("c1", unread.clone());
        let status = Patch::SetStatus { status: CustomerStatus::Demo, previous: CustomerStatus::New };
        cache.apply_optimistic("c1", status.clone());
        assert_eq!(cache.get("c1").unwrap().unread_count, 0);
        assert_eq!(cache.get("c1").unwrap().customer.status, CustomerStatus::Demo);

        cache.rollback("c1", &status);
        cache.rollback("c1", &unread);
        assert_eq!(cache.get("c1").unwrap().unread_count, 4);
        assert_eq!(cache.get("c1").unwrap().customer.status, CustomerStatus::New);
    }

    #[test]
    fn replace_page_reapplies_pending_and_drops_off_page_edits() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0), conversation("c2", "u2", 0)], 1, 1);
        cache.apply_optimistic("c1", Patch::AppendMessage(message("tmp_a", Sender::User)));
        cache.apply_optimistic("c2", Patch::AppendMessage(message("tmp_b", Sender::User)));

        cache.replace_page(vec![conversation("c1", "u1", 0), conversation("c3", "u3", 0)], 2, 1);

        let c1 = cache.get("c1").unwrap();
        assert_eq!(c1.messages.last().unwrap().id, "tmp_a");
        assert!(cache.has_pending("c1"));
        assert!(!cache.has_pending("c2"));
        assert_eq!(cache.total_pages(), 2);
    }

    #[test]
    fn confirm_message_replaces_temp_entry_in_place() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        cache.apply_optimistic("c1", Patch::AppendMessage(message("tmp_1", Sender::User)));

        cache.confirm_message("c1", "tmp_1", message("msg_99", Sender::User));

        let ids: Vec<_> = cache.get("c1").unwrap().messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, ["c1_m1", "msg_99"]);
        assert!(!cache.has_pending("c1"));
    }

    #[test]
    fn refresh_carrying_sent_message_shows_it_once() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        let local = message("tmp_1", Sender::User);
        cache.apply_optimistic("c1", Patch::AppendMessage(local.clone()));

        let mut fresh = conversation("c1", "u1", 0);
        let delivered = Message { id: "msg_99".into(), ..local };
        fresh.messages.push(delivered.clone());
        cache.replace_page(vec![fresh], 1, 1);
        let ids: Vec<_> = cache.get("c1").unwrap().messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, ["c1_m1", "msg_99"]);
        assert!(cache.has_pending("c1"));

        cache.confirm_message("c1", "tmp_1", delivered);
        let ids: Vec<_> = cache.get("c1").unwrap().messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, ["c1_m1", "msg_99"]);
        assert!(!cache.has_pending("c1"));
    }

    #[test]
    fn identical_sends_each_claim_their_own_copy() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        let first = message("tmp_1", Sender::User);
        let second = Message { id: "tmp_2".into(), ..first.clone() };
        cache.apply_optimistic("c1", Patch::AppendMessage(first.clone()));
        cache.apply_optimistic("c1", Patch::AppendMessage(second));

        let mut fresh = conversation("c1", "u1", 0);
        fresh.messages.push(Message { id: "msg_1".into(), ..first });
        cache.replace_page(vec![fresh], 1, 1);

        let ids: Vec<_> = cache.get("c1").unwrap().messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, ["c1_m1", "msg_1", "tmp_2"]);
    }

    #[test]
    fn refresh_rebases_status_fallback_onto_backend_value() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        let patch = Patch::SetStatus { status: CustomerStatus::Won, previous: CustomerStatus::New };
        cache.apply_optimistic("c1", patch.clone());

        let mut fresh = conversation("c1", "u1", 0);
        fresh.customer.status = CustomerStatus::Qualified;
        cache.replace_page(vec![fresh], 1, 1);
        assert_eq!(cache.get("c1").unwrap().customer.status, CustomerStatus::Won);
        assert_eq!(cache.confirmed_status("u1"), Some(CustomerStatus::Qualified));

        assert!(cache.rollback("c1", &patch));
        assert_eq!(cache.get("c1").unwrap().customer.status, CustomerStatus::Qualified);
        assert_eq!(cache.confirmed_status("u1"), None);
    }

    #[test]
    fn reloaded_conversation_rebases_its_own_edits_only() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 5), conversation("c2", "u2", 2)], 1, 1);
        cache.apply_optimistic("c1", Patch::ClearUnread { previous: 5 });
        cache.apply_optimistic("c2", Patch::ClearUnread { previous: 2 });

        cache.replace_conversation(conversation("c1", "u1", 7));
        assert_eq!(cache.get("c1").unwrap().unread_count, 0);
        assert_eq!(cache.get("c2").unwrap().unread_count, 0);

        cache.rollback("c1", &Patch::ClearUnread { previous: 5 });
        cache.rollback("c2", &Patch::ClearUnread { previous: 2 });
        assert_eq!(cache.get("c1").unwrap().unread_count, 7);
        assert_eq!(cache.get("c2").unwrap().unread_count, 2);
    }

    #[test]
    fn replace_customer_keeps_pending_deal() {
        let mut cache = ConversationCache::new();
        cache.replace_page(vec![conversation("c1", "u1", 0)], 1, 1);
        cache.apply_optimistic("c1", Patch::AppendDeal(deal("tmp_deal")));

        let mut customer = cache.get("c1").unwrap().customer.clone();
        customer.deal_history.clear();
        customer.status = CustomerStatus::Won;
        cache.replace_customer(customer);

        let c1 = cache.get("c1").unwrap();
        assert_eq!(c1.customer.status, CustomerStatus::Won);
        assert_eq!(c1.customer.deal_history.len(), 1);

        cache.confirm_deal("c1", "tmp_deal", deal("deal_7"));
        assert_eq!(cache.get("c1").unwrap().customer.deal_history[0].id, "deal_7");
    }
}
