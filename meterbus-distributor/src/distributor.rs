//! Sequenced consumption of bus messages.

use tracing::{info, warn};

use meterbus_common::{EncodedPair, decode, parse_raw_words};
use meterbus_framework::{ShutdownSignal, Subscription};

/// Hands out consecutive sequence numbers.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    pub fn new(initial: u64) -> Self {
        Self { next: initial }
    }

    /// Take the current value and advance.
    pub fn next_value(&mut self) -> u64 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }

    /// The value the next message will get.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// One handled message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub sequence: u64,
    pub topic: String,
    /// Payload as text; invalid UTF-8 is replaced.
    pub payload: String,
    /// Decoded float when the payload is a raw register pair.
    pub value: Option<f32>,
}

/// Logs every received message with a sequence number.
#[derive(Debug)]
pub struct Distributor {
    counter: SequenceCounter,
}

impl Distributor {
    pub fn new(initial_sequence: u64) -> Self {
        Self {
            counter: SequenceCounter::new(initial_sequence),
        }
    }

    /// Sequence number the next message will get.
    pub fn next_sequence(&self) -> u64 {
        self.counter.peek()
    }

    /// Handle one message.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Delivery {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Payload is not valid UTF-8");
                String::from_utf8_lossy(payload).into_owned()
            }
        };

        let sequence = self.counter.next_value();
        let value = parse_raw_words(&text)
            .ok()
            .and_then(|words| EncodedPair::from_words(&words))
            .map(decode);

        match value {
            Some(value) => {
                info!(sequence, topic = %topic, payload = %text, value, "Received message")
            }
            None => info!(sequence, topic = %topic, payload = %text, "Received message"),
        }

        Delivery {
            sequence,
            topic: topic.to_string(),
            payload: text,
            value,
        }
    }

    /// Consume `subscription` until shutdown or until the transport side
    /// closes. Returns the number of messages handled.
    pub async fn run(
        &mut self,
        mut subscription: Subscription,
        mut shutdown: ShutdownSignal,
    ) -> u64 {
        info!(pattern = %subscription.pattern(), "Waiting for messages");
        let mut handled = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                message = subscription.recv() => match message {
                    Some(message) => {
                        self.on_message(&message.topic, &message.payload);
                        handled += 1;
                    }
                    None => {
                        warn!(pattern = %subscription.pattern(), "Subscription closed");
                        break;
                    }
                },
            }
        }

        info!(handled, "Distributor stopped");
        handled
    }
}
