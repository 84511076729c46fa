//! # Inbound Event Pipeline and Event Queue
//!
//! Turns raw broker payloads into debounced [`DomainEvent`]s and hands them to
//! the presentation layer through a single bounded queue.
//!
//! ## Tolerance policy
//! The pipeline deliberately favors false triggers over missed notifications:
//! a payload that fails to parse at all still produces a trigger with zeroed
//! fields. Only payloads that parse and identify themselves as something other
//! than an accepted sale are ignored. This is an intentional product decision
//! carried over from the original firmware; do not tighten it.
//!
//! ## Queue policy
//! Capacity 5, insertion order preserved. The producer side never blocks: when
//! the queue is full the new event is dropped (the presentation layer drains
//! faster than a 5-deep backlog in normal operation, and dropping beats
//! blocking the network thread). The consumer side blocks awaiting items.

use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queue depth between the session task and the presentation consumer.
pub const QUEUE_CAPACITY: usize = 5;

/// Minimum spacing between accepted triggers.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

const MAX_CURRENCY_LEN: usize = 7;
const MAX_EVENT_ID_LEN: usize = 63;

const ACCEPTED_TYPE: &str = "sale";
const ACCEPTED_STATUS: &str = "succeeded";

/// Trigger event handed to the presentation layer. Consumed exactly once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainEvent {
    /// Amount in minor units; 0 when the payload did not carry one.
    pub amount: i64,
    pub currency: String,
    pub event_id: String,
}

/// Producer half of the event queue. Non-blocking, drop-on-full.
#[derive(Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<DomainEvent>,
}

impl QueueProducer {
    /// Offers an event to the queue. Returns `false` when the queue was full
    /// and the event was dropped.
    pub fn offer(&self, event: DomainEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("Event queue full, dropping event '{}'", event.event_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Event queue consumer gone, dropping event");
                false
            }
        }
    }
}

/// Consumer half of the event queue. Blocking dequeue.
pub struct QueueConsumer {
    rx: mpsc::Receiver<DomainEvent>,
}

impl QueueConsumer {
    /// Awaits the next event; `None` once all producers are gone.
    pub async fn next(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }
}

/// Creates the bounded queue pair shared by pipeline and presentation loop.
pub fn queue() -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Outcome of feeding one payload through the pipeline, mainly for tests and
/// logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted and enqueued.
    Enqueued,
    /// Accepted but dropped because the queue was full.
    QueueFull,
    /// Suppressed by the debounce window.
    Debounced,
    /// Parsed fine but not an accepted trigger type/status.
    Ignored,
}

/// Debounce-then-parse pipeline between session I/O and the event queue.
pub struct Pipeline {
    queue: QueueProducer,
    last_accepted: Option<Instant>,
}

impl Pipeline {
    pub fn new(queue: QueueProducer) -> Self {
        Self {
            queue,
            last_accepted: None,
        }
    }

    /// Handles one inbound payload stamped with its arrival time.
    pub fn handle(&mut self, payload: &[u8], received_at: Instant) -> Disposition {
        if let Some(last) = self.last_accepted {
            if received_at.duration_since(last) < DEBOUNCE_WINDOW {
                return Disposition::Debounced;
            }
        }

        let event = match parse_payload(payload) {
            Parsed::Trigger(event) => event,
            Parsed::Ignored => return Disposition::Ignored,
        };

        self.last_accepted = Some(received_at);
        info!(
            "Trigger accepted: {} {} ({})",
            event.amount, event.currency, event.event_id
        );
        if self.queue.offer(event) {
            Disposition::Enqueued
        } else {
            Disposition::QueueFull
        }
    }
}

enum Parsed {
    Trigger(DomainEvent),
    Ignored,
}

/// Parses a command payload per the tolerance policy: unparseable input is a
/// zeroed trigger, a parsed non-sale (or failed sale) is silently ignored.
fn parse_payload(payload: &[u8]) -> Parsed {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("Unparseable command payload ({}), triggering anyway", e);
            return Parsed::Trigger(DomainEvent::default());
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some(ACCEPTED_TYPE) => {}
        _ => return Parsed::Ignored,
    }

    // Status gate: absent means accepted, anything but "succeeded" does not.
    if let Some(status) = value.get("status") {
        if status.as_str() != Some(ACCEPTED_STATUS) {
            return Parsed::Ignored;
        }
    }

    Parsed::Trigger(DomainEvent {
        amount: value.get("amount").and_then(Value::as_i64).unwrap_or(0),
        currency: truncated(
            value.get("currency").and_then(Value::as_str).unwrap_or(""),
            MAX_CURRENCY_LEN,
        ),
        event_id: truncated(
            value.get("eventId").and_then(Value::as_str).unwrap_or(""),
            MAX_EVENT_ID_LEN,
        ),
    })
}

/// Copies at most `max` bytes of `s`, cut on a char boundary.
fn truncated(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> (Pipeline, QueueConsumer) {
        let (producer, consumer) = queue();
        (Pipeline::new(producer), consumer)
    }

    #[test]
    fn sale_payload_becomes_domain_event() {
        let (mut pipeline, mut consumer) = pipeline();
        let payload = br#"{"type":"sale","amount":500,"currency":"USD","eventId":"e1"}"#;
        assert_eq!(
            pipeline.handle(payload, Instant::now()),
            Disposition::Enqueued
        );

        let event = consumer.rx.try_recv().unwrap();
        assert_eq!(
            event,
            DomainEvent {
                amount: 500,
                currency: "USD".to_string(),
                event_id: "e1".to_string(),
            }
        );
    }

    #[test]
    fn failed_sale_is_ignored() {
        let (mut pipeline, mut consumer) = pipeline();
        let payload = br#"{"type":"sale","status":"failed"}"#;
        assert_eq!(
            pipeline.handle(payload, Instant::now()),
            Disposition::Ignored
        );
        assert!(consumer.rx.try_recv().is_err());
    }

    #[test]
    fn succeeded_status_passes_the_gate() {
        let (mut pipeline, _consumer) = pipeline();
        let payload = br#"{"type":"sale","status":"succeeded","amount":1}"#;
        assert_eq!(
            pipeline.handle(payload, Instant::now()),
            Disposition::Enqueued
        );
    }

    #[test]
    fn non_sale_type_is_ignored() {
        let (mut pipeline, _consumer) = pipeline();
        assert_eq!(
            pipeline.handle(br#"{"type":"refund","amount":1}"#, Instant::now()),
            Disposition::Ignored
        );
    }

    #[test]
    fn malformed_payload_still_triggers_with_zeroed_fields() {
        let (mut pipeline, mut consumer) = pipeline();
        assert_eq!(
            pipeline.handle(b"not json at all", Instant::now()),
            Disposition::Enqueued
        );
        let event = consumer.rx.try_recv().unwrap();
        assert_eq!(event, DomainEvent::default());
    }

    #[test]
    fn wrong_typed_fields_default_without_aborting() {
        let (mut pipeline, mut consumer) = pipeline();
        let payload = br#"{"type":"sale","amount":"lots","currency":7,"eventId":null}"#;
        assert_eq!(
            pipeline.handle(payload, Instant::now()),
            Disposition::Enqueued
        );
        assert_eq!(consumer.rx.try_recv().unwrap(), DomainEvent::default());
    }

    #[test]
    fn debounce_suppresses_rapid_duplicates() {
        let (mut pipeline, mut consumer) = pipeline();
        let payload = br#"{"type":"sale","amount":100}"#;
        let t0 = Instant::now();
        assert_eq!(pipeline.handle(payload, t0), Disposition::Enqueued);
        assert_eq!(
            pipeline.handle(payload, t0 + Duration::from_millis(999)),
            Disposition::Debounced
        );
        assert_eq!(
            pipeline.handle(payload, t0 + Duration::from_millis(1000)),
            Disposition::Enqueued
        );

        assert!(consumer.rx.try_recv().is_ok());
        assert!(consumer.rx.try_recv().is_ok());
        assert!(consumer.rx.try_recv().is_err());
    }

    #[test]
    fn debounced_payload_does_not_reset_the_window() {
        let (mut pipeline, _consumer) = pipeline();
        let payload = br#"{"type":"sale"}"#;
        let t0 = Instant::now();
        assert_eq!(pipeline.handle(payload, t0), Disposition::Enqueued);
        // A rejected duplicate must not push the window forward.
        pipeline.handle(payload, t0 + Duration::from_millis(900));
        assert_eq!(
            pipeline.handle(payload, t0 + Duration::from_millis(1100)),
            Disposition::Enqueued
        );
    }

    #[test]
    fn full_queue_drops_newest_and_keeps_oldest() {
        let (producer, mut consumer) = queue();
        for i in 0..QUEUE_CAPACITY {
            assert!(producer.offer(DomainEvent {
                amount: i as i64,
                ..Default::default()
            }));
        }
        assert!(!producer.offer(DomainEvent {
            amount: 99,
            ..Default::default()
        }));

        for i in 0..QUEUE_CAPACITY {
            assert_eq!(consumer.rx.try_recv().unwrap().amount, i as i64);
        }
        assert!(consumer.rx.try_recv().is_err());
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let (mut pipeline, mut consumer) = pipeline();
        let long_id = "x".repeat(100);
        let payload = format!(
            r#"{{"type":"sale","currency":"DOLLARS!","eventId":"{long_id}"}}"#
        );
        pipeline.handle(payload.as_bytes(), Instant::now());
        let event = consumer.rx.try_recv().unwrap();
        assert_eq!(event.currency.len(), 7);
        assert_eq!(event.event_id.len(), 63);
    }
}
