//! Webhook event processing.
//!
//! [`WebhookProcessor`] turns one inbound [`WebhookPayload`] into zero or more
//! `instagram_message` emissions on the [`BroadcastHub`]:
//!
//! 1. Payloads whose `object` is not `instagram` are ignored.
//! 2. Every messaging event is handled by its own task: enrich through the
//!    Graph API, build a [`NormalizedEvent`], emit it.
//! 3. Tasks are independent. A failed enrichment degrades the event to its
//!    base fields; a panicking task is logged and does not affect siblings.
//!
//! Messages are emitted in completion order, not delivery order.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastHub;
use crate::instagram::{EnrichmentOutcome, InstagramClient};
use crate::types::{MessagingEvent, NormalizedEvent, WebhookPayload, INSTAGRAM_MESSAGE_EVENT};

/// Counters describing what one call to [`WebhookProcessor::process`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// The payload was not from Instagram and was ignored.
    pub skipped: bool,
    /// Messaging events found in the payload.
    pub messages: usize,
    /// Events whose enrichment succeeded.
    pub enriched: usize,
    /// Events handed to the hub.
    pub emitted: usize,
    /// Tasks that panicked before emitting.
    pub failed: usize,
}

/// Enriches inbound messages and relays them to subscribers.
#[derive(Clone)]
pub struct WebhookProcessor {
    client: InstagramClient,
    hub: BroadcastHub,
    access_token: Option<Arc<str>>,
}

impl WebhookProcessor {
    /// Creates a processor.
    ///
    /// When `access_token` is `None` no Graph API calls are made and every
    /// message is relayed without contact details.
    #[must_use]
    pub fn new(client: InstagramClient, hub: BroadcastHub, access_token: Option<String>) -> Self {
        Self {
            client,
            hub,
            access_token: access_token.map(Arc::from),
        }
    }

    /// Processes a payload and waits for every message task to finish.
    ///
    /// Each messaging event is emitted exactly once, whatever the
    /// enrichment outcome. Submitting the same payload twice emits twice.
    pub async fn process(&self, payload: WebhookPayload) -> ProcessSummary {
        if !payload.is_instagram() {
            debug!(object = %payload.object, "Ignoring webhook for unsupported object");
            return ProcessSummary {
                skipped: true,
                ..ProcessSummary::default()
            };
        }

        let mut summary = ProcessSummary {
            messages: payload.message_count(),
            ..ProcessSummary::default()
        };

        let mut tasks = JoinSet::new();
        for event in payload.into_messages() {
            let client = self.client.clone();
            let hub = self.hub.clone();
            let access_token = self.access_token.clone();
            tasks.spawn(async move {
                relay_message(&client, &hub, access_token.as_deref(), event).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(enriched) => {
                    summary.emitted += 1;
                    if enriched {
                        summary.enriched += 1;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Message relay task failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            messages = summary.messages,
            enriched = summary.enriched,
            emitted = summary.emitted,
            failed = summary.failed,
            "Webhook payload processed"
        );

        summary
    }
}

impl fmt::Debug for WebhookProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookProcessor")
            .field("client", &self.client)
            .field("hub", &self.hub)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Enriches and emits one message. Returns `true` if enrichment succeeded.
async fn relay_message(
    client: &InstagramClient,
    hub: &BroadcastHub,
    access_token: Option<&str>,
    event: MessagingEvent,
) -> bool {
    let message_id = event.message.mid.as_str();

    let outcome = match access_token {
        Some(token) => client.enrich(message_id, token).await,
        None => EnrichmentOutcome::Unavailable("no access token configured".to_string()),
    };

    let enriched = match &outcome {
        EnrichmentOutcome::Enriched(_) => true,
        EnrichmentOutcome::Unavailable(reason) => {
            warn!(
                message_id = %message_id,
                reason = %reason,
                "Message enrichment unavailable, relaying base fields"
            );
            false
        }
    };

    let normalized = NormalizedEvent::new(&event, outcome.info());
    let receivers = hub.emit(INSTAGRAM_MESSAGE_EVENT, &normalized);

    debug!(
        message_id = %message_id,
        sender = %normalized.message.sender,
        receivers,
        "Relayed Instagram message"
    );

    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Subscription;
    use crate::instagram::DEFAULT_REQUEST_TIMEOUT;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn processor_for(server: &MockServer, token: Option<&str>) -> (WebhookProcessor, Subscription) {
        let client = InstagramClient::new(server.uri(), "v22.0", DEFAULT_REQUEST_TIMEOUT)
            .expect("failed to create client");
        let hub = BroadcastHub::new();
        hub.initialize();
        let subscription = hub.connect().unwrap();
        let processor = WebhookProcessor::new(client, hub, token.map(String::from));
        (processor, subscription)
    }

    fn payload(entries: usize, messages_per_entry: usize) -> WebhookPayload {
        let entry: Vec<_> = (0..entries)
            .map(|e| {
                let messaging: Vec<_> = (0..messages_per_entry)
                    .map(|m| {
                        json!({
                            "sender": {"id": format!("sender-{e}-{m}")},
                            "recipient": {"id": "page"},
                            "timestamp": 1_000 + m as i64,
                            "message": {"mid": format!("m-{e}-{m}"), "text": format!("text {e}/{m}")}
                        })
                    })
                    .collect();
                json!({"id": format!("entry-{e}"), "time": 1, "messaging": messaging})
            })
            .collect();

        serde_json::from_value(json!({"object": "instagram", "entry": entry})).unwrap()
    }

    fn drain(subscription: &mut Subscription) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = subscription.try_recv() {
            assert_eq!(frame.event, INSTAGRAM_MESSAGE_EVENT);
            events.push(serde_json::from_value(frame.data).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn relays_enriched_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "from": {"id": "A", "username": "alice"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (processor, mut subscription) = processor_for(&server, Some("token"));
        let payload: WebhookPayload = serde_json::from_value(json!({
            "object": "instagram",
            "entry": [{"messaging": [{
                "sender": {"id": "A"},
                "recipient": {"id": "B"},
                "timestamp": 123,
                "message": {"mid": "m1", "text": "hi"}
            }]}]
        }))
        .unwrap();

        let summary = processor.process(payload).await;
        assert_eq!(
            summary,
            ProcessSummary {
                skipped: false,
                messages: 1,
                enriched: 1,
                emitted: 1,
                failed: 0,
            }
        );

        let frame = subscription.try_recv().unwrap();
        assert_eq!(
            frame.data,
            json!({
                "message": {"sender": "A", "recipient": "B", "timestamp": 123, "content": "hi"},
                "contact": {"id": "A", "username": "alice"}
            })
        );
    }

    #[tokio::test]
    async fn emits_once_per_message_across_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v22\.0/m-\d+-\d+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ignored",
                "from": {"id": "X", "username": "x"}
            })))
            .expect(6)
            .mount(&server)
            .await;

        let (processor, mut subscription) = processor_for(&server, Some("token"));
        let summary = processor.process(payload(2, 3)).await;

        assert_eq!(summary.messages, 6);
        assert_eq!(summary.emitted, 6);

        let events = drain(&mut subscription);
        assert_eq!(events.len(), 6);

        let mut senders: Vec<_> = events.iter().map(|e| e.message.sender.clone()).collect();
        senders.sort();
        assert_eq!(
            senders,
            vec![
                "sender-0-0",
                "sender-0-1",
                "sender-0-2",
                "sender-1-0",
                "sender-1-1",
                "sender-1-2"
            ]
        );
    }

    #[tokio::test]
    async fn enrichment_failure_keeps_base_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (processor, mut subscription) = processor_for(&server, Some("token"));
        let summary = processor.process(payload(1, 2)).await;

        assert_eq!(summary.emitted, 2);
        assert_eq!(summary.enriched, 0);

        for event in drain(&mut subscription) {
            assert!(event.contact.id.is_none());
            assert!(event.contact.username.is_none());
            assert!(event.message.sender.starts_with("sender-0-"));
            assert_eq!(event.message.recipient, "page");
            assert!(event.message.timestamp >= 1_000);
            assert!(event.message.content.is_some());
        }
    }

    #[tokio::test]
    async fn mixed_enrichment_outcomes_still_emit_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/m-0-0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m-0-0",
                "from": {"id": "sender-0-0", "username": "first"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v22.0/m-0-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("garbage"))
            .mount(&server)
            .await;

        let (processor, mut subscription) = processor_for(&server, Some("token"));
        let summary = processor.process(payload(1, 3)).await;

        assert_eq!(summary.emitted, 3);
        assert_eq!(summary.enriched, 1);

        let events = drain(&mut subscription);
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.is_enriched()).count(), 1);
    }

    #[tokio::test]
    async fn missing_access_token_skips_enrichment_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (processor, mut subscription) = processor_for(&server, None);
        let summary = processor.process(payload(1, 2)).await;

        assert_eq!(summary.emitted, 2);
        assert_eq!(summary.enriched, 0);
        assert_eq!(drain(&mut subscription).len(), 2);
    }

    #[tokio::test]
    async fn non_instagram_payload_is_ignored() {
        let server = MockServer::start().await;
        let (processor, mut subscription) = processor_for(&server, Some("token"));

        let mut payload = payload(1, 1);
        payload.object = "page".to_string();

        let summary = processor.process(payload).await;
        assert!(summary.skipped);
        assert_eq!(summary.emitted, 0);
        assert!(drain(&mut subscription).is_empty());
    }

    #[tokio::test]
    async fn same_payload_twice_emits_twice() {
        let server = MockServer::start().await;
        let (processor, mut subscription) = processor_for(&server, None);

        let payload = payload(1, 1);
        processor.process(payload.clone()).await;
        processor.process(payload).await;

        assert_eq!(drain(&mut subscription).len(), 2);
    }

    #[tokio::test]
    async fn processing_without_subscribers_completes() {
        let server = MockServer::start().await;
        let client = InstagramClient::new(server.uri(), "v22.0", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let hub = BroadcastHub::new();
        hub.initialize();
        let processor = WebhookProcessor::new(client, hub, None);

        let summary = processor.process(payload(1, 2)).await;
        assert_eq!(summary.emitted, 2);
    }

    #[tokio::test]
    async fn processing_before_hub_initialization_does_not_panic() {
        let server = MockServer::start().await;
        let client = InstagramClient::new(server.uri(), "v22.0", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let processor = WebhookProcessor::new(client, BroadcastHub::new(), None);

        let summary = processor.process(payload(1, 1)).await;
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn debug_redacts_access_token() {
        let client =
            InstagramClient::new("http://localhost", "v22.0", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let processor = WebhookProcessor::new(
            client,
            BroadcastHub::new(),
            Some("IGAA-very-secret".to_string()),
        );

        let debug = format!("{processor:?}");
        assert!(!debug.contains("IGAA-very-secret"));
    }
}
