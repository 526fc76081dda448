use std::collections::HashMap;

use chrono::NaiveDate;

use crate::api::models::{Customer, CustomerStatus, Deal, DealStatus, Message, NewDeal};
use crate::error::{Error, Result};
use crate::utils::temp_id;

/// Operator actions that mutate backend state. All of them go through
/// `Inbox::dispatch`, which applies the optimistic/rollback protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SendMessage { conversation_id: String, text: String },
    ChangeStatus { customer_id: String, status: CustomerStatus },
    CreateDeal { customer_id: String, deal: DealDraft },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    MessageSent(Message),
    StatusChanged(Customer),
    DealCreated(Deal),
}

/// Deal form input before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DealDraft {
    pub name: String,
    pub amount: f64,
}

impl DealDraft {
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Self { name: name.into(), amount }
    }

    pub fn validate(&self) -> Result<NewDeal> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("deal name is required".into()));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(Error::Validation("deal amount must be a non-negative number".into()));
        }
        Ok(NewDeal { name: name.to_string(), amount: self.amount })
    }

    /// Local placeholder shown until the backend returns the created deal.
    pub fn optimistic(deal: &NewDeal, today: NaiveDate) -> Deal {
        Deal {
            id: temp_id(),
            name: deal.name.clone(),
            status: DealStatus::InProgress,
            amount: deal.amount,
            close_date: today,
        }
    }
}

#[derive(Debug)]
struct StatusEntry {
    /// Cleared when the latest change fails, so whichever older change
    /// lands next is the one the backend kept.
    latest: Option<u64>,
    in_flight: usize,
    baseline: CustomerStatus,
}

/// Orders status changes per customer: the most recently initiated one
/// decides what the cache ends up showing.
#[derive(Debug, Default)]
pub struct StatusLedger {
    next_seq: u64,
    entries: HashMap<String, StatusEntry>,
}

impl StatusLedger {
    /// Registers a change. Returns its sequence number and the last
    /// confirmed status to fall back to.
    pub fn begin(&mut self, customer_id: &str, current: CustomerStatus) -> (u64, CustomerStatus) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let entry = self
            .entries
            .entry(customer_id.to_string())
            .or_insert(StatusEntry { latest: None, in_flight: 0, baseline: current });
        entry.latest = Some(seq);
        entry.in_flight += 1;
        (seq, entry.baseline)
    }

    /// Records a confirmed change. Returns whether it is still the latest.
    pub fn succeeded(&mut self, customer_id: &str, seq: u64, confirmed: CustomerStatus) -> bool {
        let Some(entry) = self.entries.get_mut(customer_id) else { return true };
        entry.baseline = confirmed;
        let latest = entry.latest.is_none_or(|l| l == seq);
        self.release(customer_id);
        latest
    }

    /// Records a failed change. Returns whether it is still the latest.
    pub fn failed(&mut self, customer_id: &str, seq: u64) -> bool {
        let mut latest = true;
        if let Some(entry) = self.entries.get_mut(customer_id) {
            latest = entry.latest.is_none_or(|l| l == seq);
            if latest {
                entry.latest = None;
            }
        }
        self.release(customer_id);
        latest
    }

    pub fn customers(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Replaces the fallback status of `customer_id` with a newer backend value.
    pub fn rebase(&mut self, customer_id: &str, confirmed: CustomerStatus) {
        if let Some(entry) = self.entries.get_mut(customer_id) {
            entry.baseline = confirmed;
        }
    }

    fn release(&mut self, customer_id: &str) {
        if let Some(entry) = self.entries.get_mut(customer_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if entry.in_flight == 0 {
                self.entries.remove(customer_id);
            }
        }
    }
}
