use chrono::{DateTime, Utc};
use log::warn;

use crate::api::models::{Message, Sender};
use crate::error::{Error, Result};
use crate::utils::temp_id;

/// Lifecycle of one outbound message. `Confirmed` and `RolledBack` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    Draft,
    Pending,
    Confirmed,
    RolledBack,
}

impl OutboundState {
    fn can_become(self, next: OutboundState) -> bool {
        matches!(
            (self, next),
            (OutboundState::Draft, OutboundState::Pending)
                | (OutboundState::Pending, OutboundState::Confirmed)
                | (OutboundState::Pending, OutboundState::RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OutboundState::Confirmed | OutboundState::RolledBack)
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    conversation_id: String,
    text: String,
    optimistic: Option<Message>,
    state: OutboundState,
}

impl OutboundMessage {
    /// Validates the text; blank input never leaves the client.
    pub fn draft(conversation_id: &str, text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("message text is required".into()));
        }
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            optimistic: None,
            state: OutboundState::Draft,
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> OutboundState {
        self.state
    }

    pub fn temp_id(&self) -> Option<&str> {
        self.optimistic.as_ref().map(|m| m.id.as_str())
    }

    fn advance(&mut self, next: OutboundState) -> bool {
        if !self.state.can_become(next) {
            warn!("ignoring outbound transition {:?} -> {:?}", self.state, next);
            return false;
        }
        self.state = next;
        true
    }

    /// Builds the local copy shown while the send is in flight.
    pub fn stage(&mut self, now: DateTime<Utc>) -> Option<Message> {
        if !self.advance(OutboundState::Pending) {
            return None;
        }
        let message = Message {
            id: temp_id(),
            text: self.text.clone(),
            timestamp: now,
            sender: Sender::User,
        };
        self.optimistic = Some(message.clone());
        Some(message)
    }

    pub fn confirm(&mut self) -> bool {
        self.advance(OutboundState::Confirmed)
    }

    pub fn roll_back(&mut self) -> bool {
        self.advance(OutboundState::RolledBack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_rejected() {
        let err = OutboundMessage::draft("c1", "   \n").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn text_is_trimmed() {
        let draft = OutboundMessage::draft("c1", "  hello  ").unwrap();
        assert_eq!(draft.text(), "hello");
        assert_eq!(draft.state(), OutboundState::Draft);
    }

    #[test]
    fn staged_message_is_user_sent_with_temp_id() {
        let mut outbound = OutboundMessage::draft("c1", "hello").unwrap();
        let message = outbound.stage(Utc::now()).unwrap();
        assert_eq!(message.sender, Sender::User);
        assert!(message.id.starts_with("tmp_"));
        assert_eq!(outbound.temp_id(), Some(message.id.as_str()));
        assert_eq!(outbound.state(), OutboundState::Pending);
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut outbound = OutboundMessage::draft("c1", "hello").unwrap();
        assert!(!outbound.confirm());
        outbound.stage(Utc::now());
        assert!(outbound.roll_back());
        assert!(outbound.state().is_terminal());
        assert!(!outbound.confirm());
        assert!(outbound.stage(Utc::now()).is_none());
        assert_eq!(outbound.state(), OutboundState::RolledBack);
    }
}
