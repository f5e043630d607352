//! Redis pub/sub fanout of settled wagers across server instances.

use anyhow::Result;
use fairbet_execution::ActivityFeed;
use fairbet_types::api::ActivityEvent;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const MAX_FANOUT_ORIGIN_LEN: usize = 64;
const MAX_FANOUT_PAYLOAD_BYTES: usize = 64 * 1024;
const FANOUT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct FanoutEnvelope {
    origin: String,
    event: ActivityEvent,
}

fn decode_envelope(payload: &[u8]) -> Result<FanoutEnvelope> {
    if payload.len() > MAX_FANOUT_PAYLOAD_BYTES {
        anyhow::bail!("payload too large ({} bytes)", payload.len());
    }
    let envelope: FanoutEnvelope = serde_json::from_slice(payload)?;
    if envelope.origin.len() > MAX_FANOUT_ORIGIN_LEN {
        anyhow::bail!("origin too long");
    }
    Ok(envelope)
}

pub struct Fanout {
    origin: String,
    channel: String,
    subscribe: bool,
    client: redis::Client,
    publisher: Mutex<Option<redis::aio::ConnectionManager>>,
}

impl Fanout {
    pub fn new(
        url: &str,
        channel: String,
        origin: Option<String>,
        subscribe: bool,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            origin: origin.unwrap_or_else(|| Uuid::new_v4().to_string()),
            channel,
            subscribe,
            client,
            publisher: Mutex::new(None),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Relay events published by other instances into `feed`.
    pub fn start(self: &Arc<Self>, feed: ActivityFeed) {
        if !self.subscribe {
            return;
        }
        tracing::info!(
            origin = self.origin(),
            channel = self.channel(),
            "starting fanout subscriber"
        );
        let fanout = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(err) = fanout.run_subscriber(&feed).await {
                    tracing::warn!("fanout subscriber error: {err}");
                }
                tokio::time::sleep(FANOUT_RECONNECT_DELAY).await;
            }
        });
    }

    pub async fn publish(&self, event: ActivityEvent) {
        let envelope = FanoutEnvelope {
            origin: self.origin.clone(),
            event,
        };
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("fanout encode failed: {err}");
                return;
            }
        };
        let mut guard = match self.ensure_publisher().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!("fanout publisher connection failed: {err}");
                return;
            }
        };
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let result: redis::RedisResult<()> = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(bytes)
            .query_async(conn)
            .await;
        if let Err(err) = result {
            tracing::warn!("fanout publish failed: {err}");
            *guard = None;
        }
    }

    async fn ensure_publisher(
        &self,
    ) -> Result<
        tokio::sync::MutexGuard<'_, Option<redis::aio::ConnectionManager>>,
        redis::RedisError,
    > {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard)
    }

    async fn run_subscriber(&self, feed: &ActivityFeed) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: Vec<u8> = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!("fanout message decode failed: {err}");
                    continue;
                }
            };
            let envelope = match decode_envelope(&payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!("fanout envelope decode failed: {err}");
                    continue;
                }
            };
            if envelope.origin == self.origin {
                continue;
            }
            feed.relay(envelope.event);
        }
        Ok(())
    }
}
