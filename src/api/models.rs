use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Messenger,
    Instagram,
    Tiktok,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Messenger => "messenger",
            Channel::Instagram => "instagram",
            Channel::Tiktok => "tiktok",
        }
    }
}

/// Funnel stage of a customer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    New,
    Contacted,
    Qualified,
    Unqualified,
    Demo,
    Won,
}

impl CustomerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerStatus::New => "new",
            CustomerStatus::Contacted => "contacted",
            CustomerStatus::Qualified => "qualified",
            CustomerStatus::Unqualified => "unqualified",
            CustomerStatus::Demo => "demo",
            CustomerStatus::Won => "won",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Won,
    Lost,
    #[serde(rename = "In Progress")]
    InProgress,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub name: String,
    pub status: DealStatus,
    pub amount: f64,
    pub close_date: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub avatar_url: String,
    pub joined: NaiveDate,
    #[serde(default)]
    pub tags: Vec<String>,
    pub channel: Channel,
    pub status: CustomerStatus,
    #[serde(default)]
    pub deal_history: Vec<Deal>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Customer,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub customer: Customer,
    pub channel: Channel,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The newest `count` messages, oldest first.
    pub fn recent_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<Conversation>,
    pub total_pages: u32,
    pub current_page: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadFilter {
    Read,
    Unread,
}

impl ReadFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadFilter::Read => "read",
            ReadFilter::Unread => "unread",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

/// Inbox list filters as chosen by the operator.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub search: String,
    pub channel: Option<Channel>,
    pub read_state: Option<ReadFilter>,
    pub date_range: Option<DateRange>,
    pub integration_id: Option<String>,
}

/// Parameters of one `GET /conversations` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationQuery {
    pub page: u32,
    pub filters: Filters,
}

impl ConversationQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("page", self.page.to_string())];
        let search = self.filters.search.trim();
        if !search.is_empty() {
            pairs.push(("search", search.to_string()));
        }
        if let Some(channel) = self.filters.channel {
            pairs.push(("channel", channel.as_str().to_string()));
        }
        if let Some(read) = self.filters.read_state {
            pairs.push(("status", read.as_str().to_string()));
        }
        if let Some(range) = self.filters.date_range {
            pairs.push(("dateFrom", range.from.to_string()));
            if let Some(to) = range.to {
                pairs.push(("dateTo", to.to_string()));
            }
        }
        if let Some(integration) = &self.filters.integration_id {
            pairs.push(("integrationId", integration.clone()));
        }
        pairs
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NewDeal {
    pub name: String,
    pub amount: f64,
}
