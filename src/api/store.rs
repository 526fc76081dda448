use async_trait::async_trait;

use crate::api::models::{
    Conversation, ConversationPage, ConversationQuery, Customer, CustomerStatus, Deal, Message,
    NewDeal,
};
use crate::error::Result;

/// Backend operations the inbox core consumes.
///
/// The backend owns customers, conversations and unread counters; the core
/// only reads pages and issues targeted mutations.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// `GET /conversations`
    async fn list_conversations(&self, query: &ConversationQuery) -> Result<ConversationPage>;

    /// `GET /conversations/{id}`
    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation>;

    /// `PUT /conversations/{id}/read`
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;

    /// `POST /conversations/{id}/messages`
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message>;

    /// `PUT /customers/{id}/status`
    async fn update_customer_status(&self, customer_id: &str, status: CustomerStatus) -> Result<Customer>;

    /// `POST /customers/{id}/deals`
    async fn create_deal(&self, customer_id: &str, deal: &NewDeal) -> Result<Deal>;
}
