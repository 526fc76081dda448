use std::collections::HashSet;

use crate::api::models::{Channel, Conversation, Customer, CustomerStatus, DateRange};

/// Board columns, left to right.
pub const FUNNEL_COLUMNS: [CustomerStatus; 6] = [
    CustomerStatus::New,
    CustomerStatus::Contacted,
    CustomerStatus::Qualified,
    CustomerStatus::Demo,
    CustomerStatus::Won,
    CustomerStatus::Unqualified,
];

#[derive(Debug, Clone, PartialEq)]
pub struct FunnelCard {
    pub customer: Customer,
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunnelColumn {
    pub status: CustomerStatus,
    pub cards: Vec<FunnelCard>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunnelFilter {
    pub channel: Option<Channel>,
    /// Case-insensitive substring matched against customer tags.
    pub tag: String,
    pub joined: Option<DateRange>,
}

impl FunnelFilter {
    fn matches(&self, customer: &Customer) -> bool {
        if self.channel.is_some_and(|c| c != customer.channel) {
            return false;
        }
        let tag = self.tag.trim().to_lowercase();
        if !tag.is_empty() && !customer.tags.iter().any(|t| t.to_lowercase().contains(&tag)) {
            return false;
        }
        match self.joined {
            Some(range) => {
                customer.joined >= range.from && range.to.is_none_or(|to| customer.joined <= to)
            }
            None => true,
        }
    }
}

/// Groups the customers behind `conversations` by funnel stage. Built from
/// the same cache as the list, so optimistic status changes show up on
/// the board immediately.
pub fn funnel_board(conversations: &[Conversation], filter: &FunnelFilter) -> Vec<FunnelColumn> {
    let mut seen = HashSet::new();
    let mut columns: Vec<FunnelColumn> = FUNNEL_COLUMNS
        .iter()
        .map(|&status| FunnelColumn { status, cards: Vec::new() })
        .collect();

    for conv in conversations {
        if !seen.insert(conv.customer.id.as_str()) || !filter.matches(&conv.customer) {
            continue;
        }
        if let Some(column) = columns.iter_mut().find(|c| c.status == conv.customer.status) {
            column.cards.push(FunnelCard { customer: conv.customer.clone(), conversation_id: conv.id.clone() });
        }
    }
    columns
}
