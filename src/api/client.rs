use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::api::models::{
    Conversation, ConversationPage, ConversationQuery, Customer, CustomerStatus, Deal, Message,
    NewDeal,
};
use crate::api::store::ChannelStore;
use crate::error::{Error, Result};

/// REST client for the CRM backend. Every request carries the operator's
/// bearer token.
pub struct ApiClient {
    http: HttpClient,
    base: String,
    token: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").field("base", &self.base).finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = Self::base_api(base_url);
        Url::parse(&base).map_err(|e| Error::Config(format!("invalid base url {base}: {e}")))?;
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http, base, token: token.into() })
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| Error::Config(format!("invalid endpoint {raw}: {e}")))
    }

    fn conversations_url(&self, query: &ConversationQuery) -> Result<Url> {
        let mut url = self.endpoint("conversations")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.query_pairs() {
                pairs.append_pair(key, &value);
            }
        }
        Ok(url)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = self.with_auth(req).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Http { status: resp.status().as_u16() });
        }
        Ok(resp)
    }

    async fn read_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = self.send(req).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Accepts the paged envelope, or a bare array from older backends.
fn decode_page(json: Value, requested_page: u32) -> Result<ConversationPage> {
    if json.is_array() {
        let conversations: Vec<Conversation> = serde_json::from_value(json)?;
        return Ok(ConversationPage { conversations, total_pages: 1, current_page: requested_page });
    }
    Ok(serde_json::from_value(json)?)
}

#[async_trait]
impl ChannelStore for ApiClient {
    async fn list_conversations(&self, query: &ConversationQuery) -> Result<ConversationPage> {
        let url = self.conversations_url(query)?;
        debug!("GET {}", url.path());
        let json: Value = self.read_json(self.http.get(url)).await?;
        decode_page(json, query.page)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let url = self.endpoint(&format!("conversations/{conversation_id}"))?;
        self.read_json(self.http.get(url)).await
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("conversations/{conversation_id}/read"))?;
        self.send(self.http.put(url)).await?;
        Ok(())
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message> {
        let url = self.endpoint(&format!("conversations/{conversation_id}/messages"))?;
        let body = serde_json::json!({ "text": text });
        self.read_json(self.http.post(url).json(&body)).await
    }

    async fn update_customer_status(&self, customer_id: &str, status: CustomerStatus) -> Result<Customer> {
        let url = self.endpoint(&format!("customers/{customer_id}/status"))?;
        let body = serde_json::json!({ "status": status });
        self.read_json(self.http.put(url).json(&body)).await
    }

    async fn create_deal(&self, customer_id: &str, deal: &NewDeal) -> Result<Deal> {
        let url = self.endpoint(&format!("customers/{customer_id}/deals"))?;
        self.read_json(self.http.post(url).json(deal)).await
    }
}
