use std::collections::HashSet;

use crate::inbox::cache::{ConversationCache, Patch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// Nothing unread, or a call for the conversation is already running.
    Skipped,
    Confirmed,
    /// The backend call failed; the local zero is kept.
    Failed,
}

/// Tracks mark-read calls in flight so each unread-to-read transition
/// issues at most one backend call.
#[derive(Debug, Default)]
pub struct ReadStateReconciler {
    in_flight: HashSet<String>,
}

impl ReadStateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, conversation_id: &str) -> bool {
        self.in_flight.contains(conversation_id)
    }

    /// Zeroes the cached counter and claims the conversation. Returns `None`
    /// when nothing is unread or a call for it is already running.
    pub fn begin(&mut self, cache: &mut ConversationCache, conversation_id: &str) -> Option<Patch> {
        if self.in_flight.contains(conversation_id) {
            return None;
        }
        let unread = cache.get(conversation_id)?.unread_count;
        if unread == 0 {
            return None;
        }
        let patch = Patch::ClearUnread { previous: unread };
        cache.apply_optimistic(conversation_id, patch.clone());
        self.in_flight.insert(conversation_id.to_string());
        Some(patch)
    }

    /// Releases the claim. The optimistic zero stays either way: a failed
    /// call is corrected by the next page refresh.
    pub fn finish(&mut self, cache: &mut ConversationCache, conversation_id: &str, patch: &Patch) {
        cache.settle(conversation_id, patch);
        self.in_flight.remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Channel, Conversation, Customer, CustomerStatus};
    use chrono::NaiveDate;

    fn cache_with(unread: u32) -> ConversationCache {
        let mut cache = ConversationCache::new();
        cache.replace_page(
            vec![Conversation {
                id: "conv_07".into(),
                customer: Customer {
                    id: "cust_07".into(),
                    name: "Liam Johnson".into(),
                    email: String::new(),
                    phone: String::new(),
                    avatar_url: String::new(),
                    joined: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
                    tags: vec![],
                    channel: Channel::Messenger,
                    status: CustomerStatus::Contacted,
                    deal_history: vec![],
                },
                channel: Channel::Messenger,
                messages: vec![],
                unread_count: unread,
            }],
            1,
            1,
        );
        cache
    }

    #[test]
    fn second_begin_while_in_flight_is_refused() {
        let mut cache = cache_with(3);
        let mut reconciler = ReadStateReconciler::new();
        let patch = reconciler.begin(&mut cache, "conv_07").unwrap();
        assert_eq!(cache.get("conv_07").unwrap().unread_count, 0);
        assert!(reconciler.is_in_flight("conv_07"));

        assert!(reconciler.begin(&mut cache, "conv_07").is_none());

        reconciler.finish(&mut cache, "conv_07", &patch);
        assert!(!reconciler.is_in_flight("conv_07"));
        assert_eq!(cache.get("conv_07").unwrap().unread_count, 0);
        assert!(!cache.has_pending("conv_07"));
    }

    #[test]
    fn nothing_to_do_when_already_read_or_missing() {
        let mut cache = cache_with(0);
        let mut reconciler = ReadStateReconciler::new();
        assert!(reconciler.begin(&mut cache, "conv_07").is_none());
        assert!(reconciler.begin(&mut cache, "conv_99").is_none());
        assert!(!reconciler.is_in_flight("conv_07"));
    }
}
