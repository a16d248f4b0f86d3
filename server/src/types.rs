//! Shared data types for the InstaRelay server.
//!
//! Inbound types mirror the Instagram messaging webhook body. Outbound types
//! describe what subscribers receive. Inbound events are immutable once
//! parsed; a [`NormalizedEvent`] is built fresh for every messaging event.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Discriminator value Instagram puts in the `object` field.
pub const INSTAGRAM_OBJECT: &str = "instagram";

/// Event name used when relaying messages to subscribers.
pub const INSTAGRAM_MESSAGE_EVENT: &str = "instagram_message";

/// Top-level webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Source platform discriminator (`"instagram"`).
    pub object: String,

    /// Batched entries. Instagram may deliver several in one request.
    pub entry: Vec<Entry>,
}

impl WebhookPayload {
    /// Returns `true` if the payload originates from Instagram.
    #[must_use]
    pub fn is_instagram(&self) -> bool {
        self.object == INSTAGRAM_OBJECT
    }

    /// Total number of messaging events across all entries.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.entry.iter().map(|e| e.messaging.len()).sum()
    }

    /// Consumes the payload and yields every messaging event in delivery order.
    pub fn into_messages(self) -> impl Iterator<Item = MessagingEvent> {
        self.entry.into_iter().flat_map(|e| e.messaging)
    }
}

/// One entry of a webhook batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Instagram professional account id the entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Time the entry was sent, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    /// Messaging events. Entries for other subscribed fields carry none.
    ///
    /// Items that are not messages (read receipts, reactions, postbacks) or
    /// that do not parse are dropped here so they cannot fail the batch.
    #[serde(default, deserialize_with = "deserialize_messaging")]
    pub messaging: Vec<MessagingEvent>,
}

fn deserialize_messaging<'de, D>(deserializer: D) -> Result<Vec<MessagingEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Vec::<serde_json::Value>::deserialize(deserializer)?;

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(error = %err, "Skipping messaging item that is not a message");
                None
            }
        })
        .collect())
}

/// A single inbound direct message notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingEvent {
    pub sender: AccountRef,
    pub recipient: AccountRef,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: InboundMessage,
}

/// Minimal identity reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
}

/// Message body inside a [`MessagingEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message id, used as the key for enrichment.
    pub mid: String,

    /// Text content. Absent for attachment-only messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Message metadata returned by the Graph API message endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,

    #[serde(default)]
    pub created_time: Option<String>,

    #[serde(default)]
    pub from: Option<Participant>,

    /// Recipient list. Kept opaque; only `from` feeds the relayed event.
    #[serde(default)]
    pub to: Option<serde_json::Value>,

    #[serde(default)]
    pub message: Option<String>,
}

/// A participant of a conversation as reported by the Graph API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,

    #[serde(default)]
    pub username: Option<String>,
}

/// The event relayed to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub message: RelayedMessage,
    pub contact: Contact,
}

impl NormalizedEvent {
    /// Builds the relayed event from the inbound message and, when available,
    /// the enrichment result.
    #[must_use]
    pub fn new(event: &MessagingEvent, info: Option<&MessageInfo>) -> Self {
        let from = info.and_then(|info| info.from.as_ref());

        Self {
            message: RelayedMessage {
                sender: event.sender.id.clone(),
                recipient: event.recipient.id.clone(),
                timestamp: event.timestamp,
                content: event.message.text.clone(),
            },
            contact: Contact {
                id: from.map(|p| p.id.clone()),
                username: from.and_then(|p| p.username.clone()),
            },
        }
    }

    /// Returns `true` if contact details came from enrichment.
    #[must_use]
    pub fn is_enriched(&self) -> bool {
        self.contact.id.is_some()
    }
}

/// Base fields copied from the inbound messaging event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub sender: String,
    pub recipient: String,
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Contact details; both fields are omitted when enrichment failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}
