//! Channel listener that forwards JSON object payloads
//!
//! The listener subscribes to a fixed set of named channels and hands every
//! well-formed payload to a [`PayloadHandler`]. Payloads that are not JSON
//! objects are logged and dropped; nothing is retried.

use std::collections::BTreeSet;
use std::fmt;

use crossbeam::channel::{Receiver, Sender};
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::stores::Document;

/// Default channel for data events
pub const DATA_CHANNEL: &str = "data_channel";
/// Default channel for feedback events
pub const FEEDBACK_CHANNEL: &str = "feedback_channel";

/// A raw message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Blocking source of messages for subscribed channels
pub trait Subscription {
    fn subscribe(&mut self, channel: &str) -> anyhow::Result<()>;

    /// Next message on a subscribed channel; `None` once the source closes
    fn next_message(&mut self) -> anyhow::Result<Option<Message>>;
}

/// Consumer of decoded payloads
pub trait PayloadHandler {
    fn handle(&mut self, channel: &str, payload: Document) -> anyhow::Result<()>;
}

impl<F> PayloadHandler for F
where
    F: FnMut(&str, Document) -> anyhow::Result<()>,
{
    fn handle(&mut self, channel: &str, payload: Document) -> anyhow::Result<()> {
        self(channel, payload)
    }
}

/// Sending half of an in-process broker
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Sender<Message>,
}

impl Publisher {
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> anyhow::Result<()> {
        self.tx
            .send(Message {
                channel: channel.to_string(),
                payload: payload.into(),
            })
            .map_err(|_| anyhow::anyhow!("subscription closed"))
    }
}

/// Receiving half of an in-process broker, backed by a crossbeam channel.
///
/// Messages for channels that were never subscribed are skipped.
#[derive(Debug)]
pub struct ChannelSubscription {
    rx: Receiver<Message>,
    channels: BTreeSet<String>,
}

impl ChannelSubscription {
    /// Create a connected publisher/subscription pair
    pub fn pair() -> (Publisher, Self) {
        let (tx, rx) = crossbeam::channel::unbounded::<Message>();
        (
            Publisher { tx },
            Self {
                rx,
                channels: BTreeSet::new(),
            },
        )
    }
}

impl Subscription for ChannelSubscription {
    fn subscribe(&mut self, channel: &str) -> anyhow::Result<()> {
        self.channels.insert(channel.to_string());
        Ok(())
    }

    fn next_message(&mut self) -> anyhow::Result<Option<Message>> {
        // Iteration ends once every publisher is dropped
        for message in self.rx.iter() {
            if self.channels.contains(&message.channel) {
                return Ok(Some(message));
            }
            tracing::trace!("Skipping message on unsubscribed channel {}", message.channel);
        }
        Ok(None)
    }
}

/// Counters for one listener run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub received: usize,
    pub forwarded: usize,
    /// Payloads that were not JSON objects
    pub malformed: usize,
    /// Payloads the handler rejected
    pub failed: usize,
}

impl fmt::Display for ListenerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} forwarded, {} malformed, {} failed",
            self.received, self.forwarded, self.malformed, self.failed
        )
    }
}

#[derive(Debug, Clone)]
pub struct ChannelListener {
    channels: Vec<String>,
}

impl Default for ChannelListener {
    fn default() -> Self {
        Self::new([DATA_CHANNEL, FEEDBACK_CHANNEL])
    }
}

impl ChannelListener {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Subscribe and forward payloads until the subscription closes
    pub fn run<S, H>(&self, subscription: &mut S, handler: &mut H) -> anyhow::Result<ListenerStats>
    where
        S: Subscription,
        H: PayloadHandler,
    {
        for channel in &self.channels {
            subscription.subscribe(channel)?;
        }
        tracing::info!("Listening on {}", self.channels.join(", "));

        let mut stats = ListenerStats::default();
        while let Some(message) = subscription.next_message()? {
            stats.received += 1;
            tracing::info!("Received message on {}", message.channel);

            let payload = match serde_json::from_str::<JsonValue>(&message.payload) {
                Ok(JsonValue::Object(map)) => map,
                Ok(other) => {
                    tracing::warn!("Dropping non-object payload on {}: {}", message.channel, other);
                    stats.malformed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Dropping malformed payload on {}: {}", message.channel, e);
                    stats.malformed += 1;
                    continue;
                }
            };

            match handler.handle(&message.channel, payload) {
                Ok(()) => stats.forwarded += 1,
                Err(e) => {
                    tracing::warn!("Handler failed for message on {}: {:#}", message.channel, e);
                    stats.failed += 1;
                }
            }
        }

        tracing::info!("Subscription closed: {}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channels() {
        let listener = ChannelListener::default();
        assert_eq!(listener.channels(), &["data_channel".to_string(), "feedback_channel".to_string()]);
    }

    #[test]
    fn test_forwards_objects_and_drops_the_rest() {
        let (publisher, mut subscription) = ChannelSubscription::pair();
        publisher.publish(DATA_CHANNEL, r#"{"project_id": 1}"#).unwrap();
        publisher.publish(FEEDBACK_CHANNEL, "[1, 2, 3]").unwrap();
        publisher.publish(FEEDBACK_CHANNEL, "{not json").unwrap();
        publisher.publish("other_channel", r#"{"ignored": true}"#).unwrap();
        publisher.publish(FEEDBACK_CHANNEL, r#"{"rating": 5}"#).unwrap();
        drop(publisher);

        let mut seen = Vec::new();
        let mut handler = |channel: &str, payload: Document| -> anyhow::Result<()> {
            seen.push((channel.to_string(), payload));
            Ok(())
        };
        let stats = ChannelListener::default().run(&mut subscription, &mut handler).unwrap();

        assert_eq!(
            stats,
            ListenerStats {
                received: 4,
                forwarded: 2,
                malformed: 2,
                failed: 0
            }
        );
        assert_eq!(seen[0].0, DATA_CHANNEL);
        assert_eq!(seen[0].1["project_id"], 1);
        assert_eq!(seen[1].1["rating"], 5);
    }

    #[test]
    fn test_handler_failures_are_counted_not_retried() {
        let (publisher, mut subscription) = ChannelSubscription::pair();
        publisher.publish(DATA_CHANNEL, r#"{"n": 1}"#).unwrap();
        publisher.publish(DATA_CHANNEL, r#"{"n": 2}"#).unwrap();
        drop(publisher);

        let mut calls = 0;
        let mut handler = |_: &str, payload: Document| -> anyhow::Result<()> {
            calls += 1;
            if payload["n"] == 1 {
                anyhow::bail!("rejected");
            }
            Ok(())
        };
        let stats = ChannelListener::new([DATA_CHANNEL]).run(&mut subscription, &mut handler).unwrap();
        assert_eq!(calls, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.forwarded, 1);
    }

    #[test]
    fn test_listener_on_a_background_thread() {
        let (publisher, mut subscription) = ChannelSubscription::pair();
        let handle = std::thread::spawn(move || {
            let mut count = 0usize;
            let mut handler = |_: &str, _: Document| -> anyhow::Result<()> {
                count += 1;
                Ok(())
            };
            ChannelListener::default().run(&mut subscription, &mut handler).unwrap()
        });

        for i in 0..10 {
            publisher.publish(FEEDBACK_CHANNEL, format!(r#"{{"i": {}}}"#, i)).unwrap();
        }
        drop(publisher);
        assert_eq!(handle.join().unwrap().forwarded, 10);
    }
}
