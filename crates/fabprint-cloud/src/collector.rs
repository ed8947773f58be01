//! Response collector: turns pushed device messages into a pulled list.
//!
//! A collector installs itself as the session's message handler when
//! attached and puts the default handler back when closed or dropped.
//! Messages are appended from the provider's callback thread under a lock;
//! closing marks the inbox closed under the same lock before draining it, so
//! the drained list contains every accepted write and nothing arrives after.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Instant};

use crate::session::Session;

/// A message published by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Publishing device.
    pub device_id: String,
    /// Payload text, normally JSON.
    pub payload: String,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Message received now.
    pub fn new(device_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Empty payloads and `{}` carry nothing and are dropped.
pub fn is_noise(payload: &str) -> bool {
    payload.is_empty() || payload == "{}"
}

/// Picks the message that best represents the device's full state.
pub type SnapshotStrategy = fn(&[InboundMessage]) -> Option<&InboundMessage>;

/// The longest payload, first seen on ties.
///
/// Devices publish incremental and full reports on the same topic without
/// marking which is which; the longest one approximates a full snapshot.
pub fn largest_payload(messages: &[InboundMessage]) -> Option<&InboundMessage> {
    messages.iter().fold(None, |best: Option<&InboundMessage>, m| match best {
        Some(b) if b.payload.len() >= m.payload.len() => Some(b),
        _ => Some(m),
    })
}

#[derive(Debug, Default)]
struct Inbox {
    closed: bool,
    messages: Vec<InboundMessage>,
}

impl Inbox {
    fn push(&mut self, message: InboundMessage) -> bool {
        if self.closed {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// Scoped message sink bound to a session.
pub struct ResponseCollector<'s> {
    session: &'s Session,
    inbox: Arc<Mutex<Inbox>>,
    attached: bool,
}

impl<'s> ResponseCollector<'s> {
    /// Start collecting.
    pub fn attach(session: &'s Session) -> Self {
        Self::attach_with(session, |_| {})
    }

    /// Start collecting, calling `observer` on each accepted message from
    /// the provider's callback thread.
    pub fn attach_with<F>(session: &'s Session, observer: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let inbox = Arc::new(Mutex::new(Inbox::default()));
        let sink = Arc::clone(&inbox);
        session.set_message_handler(Arc::new(move |device_id: &str, payload: &str| {
            if is_noise(payload) {
                return;
            }
            let message = InboundMessage::new(device_id, payload);
            let mut inbox = sink.lock().unwrap_or_else(|e| e.into_inner());
            if !inbox.closed {
                observer(&message);
                inbox.push(message);
            }
        }));

        Self {
            session,
            inbox,
            attached: true,
        }
    }

    /// Number of messages collected so far.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Whether nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any collected message satisfies `predicate`.
    pub fn any(&self, predicate: impl Fn(&InboundMessage) -> bool) -> bool {
        self.lock().messages.iter().any(predicate)
    }

    /// Collect for the full window, then close.
    pub async fn collect_for(self, window: Duration) -> Vec<InboundMessage> {
        sleep(window).await;
        self.close()
    }

    /// Collect until `satisfied` holds or the window elapses, checking every
    /// `poll`. Returns the messages and whether the condition was met.
    pub async fn collect_until<F>(
        self,
        window: Duration,
        poll: Duration,
        satisfied: F,
    ) -> (Vec<InboundMessage>, bool)
    where
        F: Fn(&[InboundMessage]) -> bool,
    {
        let deadline = Instant::now() + window;
        loop {
            if satisfied(&self.lock().messages) {
                return (self.close(), true);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(poll.min(deadline - now)).await;
        }
        let messages = self.close();
        let met = satisfied(&messages);
        (messages, met)
    }

    /// Stop collecting and return everything accepted so far.
    pub fn close(mut self) -> Vec<InboundMessage> {
        self.detach();
        let mut inbox = self.lock();
        inbox.closed = true;
        std::mem::take(&mut inbox.messages)
    }

    fn detach(&mut self) {
        if self.attached {
            self.session.restore_message_handler();
            self.attached = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ResponseCollector<'_> {
    fn drop(&mut self) {
        self.detach();
        self.lock().closed = true;
    }
}
