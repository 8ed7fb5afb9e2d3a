use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::super::domain::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
    pub html: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub provider: String,
    pub status: String,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OutboundError {
    #[error("{0} provider not configured")]
    NotConfigured(&'static str),
    #[error("provider rejected message: {0}")]
    Rejected(String),
    #[error("provider transport failed: {0}")]
    Transport(String),
}

/// Delivery capability for one channel (SMS gateway, e-mail API, in-app inbox).
pub trait OutboundProvider: Send + Sync + Debug {
    fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, OutboundError>;
    fn is_configured(&self) -> bool;
}

/// In-app inbox; always configured.
#[derive(Debug, Default)]
pub struct InternalInbox {
    sequence: AtomicU64,
    delivered: Mutex<Vec<OutboundMessage>>,
}

impl InternalInbox {
    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl OutboundProvider for InternalInbox {
    fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, OutboundError> {
        let mut guard = self
            .delivered
            .lock()
            .map_err(|_| OutboundError::Transport("internal inbox poisoned".to_string()))?;
        guard.push(message.clone());
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(DeliveryReceipt {
            message_id: format!("inbox-{id:06}"),
            provider: "internal".to_string(),
            status: "delivered".to_string(),
        })
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Channel to provider dispatch over the closed channel set.
#[derive(Debug, Clone)]
pub struct OutboundProviders {
    internal: Arc<dyn OutboundProvider>,
    sms: Option<Arc<dyn OutboundProvider>>,
    email: Option<Arc<dyn OutboundProvider>>,
}

impl Default for OutboundProviders {
    fn default() -> Self {
        Self::internal_only(Arc::new(InternalInbox::default()))
    }
}

impl OutboundProviders {
    pub fn internal_only(internal: Arc<dyn OutboundProvider>) -> Self {
        Self {
            internal,
            sms: None,
            email: None,
        }
    }

    pub fn with_sms(mut self, provider: Arc<dyn OutboundProvider>) -> Self {
        self.sms = Some(provider);
        self
    }

    pub fn with_email(mut self, provider: Arc<dyn OutboundProvider>) -> Self {
        self.email = Some(provider);
        self
    }

    pub fn internal(&self) -> &dyn OutboundProvider {
        self.internal.as_ref()
    }

    /// Provider for a channel, if one is present and configured.
    pub fn for_channel(&self, channel: Channel) -> Option<&dyn OutboundProvider> {
        let provider = match channel {
            Channel::Internal => Some(&self.internal),
            Channel::Sms => self.sms.as_ref(),
            Channel::Email => self.email.as_ref(),
        };
        provider
            .map(|candidate| candidate.as_ref())
            .filter(|candidate| candidate.is_configured())
    }
}
