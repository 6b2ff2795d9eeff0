//! In-memory broker
//!
//! Single-process broker with lanes, ack/nack and dead-lettering. It keeps the
//! at-least-once contract within the process but is not durable: everything
//! is lost when the process exits.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{dead_letter_channel, lane_for, Broker, BrokerError, BrokerResult, Delivery};

const DEFAULT_LANES: u32 = 16;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: i64,
    key: String,
    payload: Vec<u8>,
    delivery_count: u32,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Lane {
    queue: VecDeque<StoredMessage>,
    in_flight: Option<StoredMessage>,
}

#[derive(Debug)]
struct ChannelState {
    lanes: Vec<Lane>,
    /// Lane to start scanning from, rotated for fairness
    cursor: usize,
}

impl ChannelState {
    fn new(lanes: u32) -> Self {
        Self {
            lanes: (0..lanes.max(1)).map(|_| Lane::default()).collect(),
            cursor: 0,
        }
    }
}

/// Broker held in process memory
#[derive(Debug)]
pub struct InMemoryBroker {
    lanes: u32,
    channels: Mutex<HashMap<String, ChannelState>>,
    next_id: AtomicI64,
    notify: Notify,
    closed: AtomicBool,
    fail_publish: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_LANES)
    }
}

impl InMemoryBroker {
    /// Create a broker whose channels have `lanes` ordering lanes
    pub fn new(lanes: u32) -> Self {
        Self {
            lanes: lanes.max(1),
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Make subsequent publishes fail (simulates an unreachable broker)
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Stop the broker; blocked and future receives return [`BrokerError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Messages queued or in flight on `channel`
    pub fn pending(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|state| {
                state
                    .lanes
                    .iter()
                    .map(|lane| lane.queue.len() + usize::from(lane.in_flight.is_some()))
                    .sum()
            })
            .unwrap_or(0)
    }

    fn enqueue(
        &self,
        channels: &mut HashMap<String, ChannelState>,
        channel: &str,
        message: StoredMessage,
    ) -> u32 {
        let lane = lane_for(&message.key, self.lanes);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState::new(self.lanes))
            .lanes[lane as usize]
            .queue
            .push_back(message);
        lane
    }

    fn try_receive(&self, channel: &str) -> Option<Delivery> {
        let mut channels = self.channels.lock();
        let state = channels.get_mut(channel)?;
        let lane_count = state.lanes.len();

        for offset in 0..lane_count {
            let index = (state.cursor + offset) % lane_count;
            let lane = &mut state.lanes[index];
            if lane.in_flight.is_some() {
                continue;
            }

            if let Some(mut message) = lane.queue.pop_front() {
                message.delivery_count += 1;
                let delivery = Delivery {
                    id: message.id,
                    channel: channel.to_string(),
                    key: message.key.clone(),
                    lane: index as u32,
                    payload: message.payload.clone(),
                    delivery_count: message.delivery_count,
                    published_at: message.published_at,
                };
                lane.in_flight = Some(message);
                state.cursor = (index + 1) % lane_count;
                return Some(delivery);
            }
        }

        None
    }

    /// Remove the in-flight message matching `delivery` from its lane
    fn take_in_flight(
        channels: &mut HashMap<String, ChannelState>,
        delivery: &Delivery,
    ) -> BrokerResult<StoredMessage> {
        let unknown = || BrokerError::UnknownDelivery {
            channel: delivery.channel.clone(),
            id: delivery.id,
        };

        let lane = channels
            .get_mut(&delivery.channel)
            .and_then(|state| state.lanes.get_mut(delivery.lane as usize))
            .ok_or_else(unknown)?;

        match lane.in_flight.take() {
            Some(message) if message.id == delivery.id => Ok(message),
            other => {
                lane.in_flight = other;
                Err(unknown())
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, key: &str, payload: Vec<u8>) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("broker unreachable".to_string()));
        }

        let message = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            key: key.to_string(),
            payload,
            delivery_count: 0,
            published_at: Utc::now(),
        };
        let id = message.id;

        let lane = self.enqueue(&mut self.channels.lock(), channel, message);
        self.notify.notify_waiters();

        tracing::debug!(channel, key, lane, message_id = id, "Message published");
        Ok(())
    }

    async fn receive(&self, channel: &str) -> BrokerResult<Delivery> {
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }
            if let Some(delivery) = self.try_receive(channel) {
                return Ok(delivery);
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        Self::take_in_flight(&mut self.channels.lock(), delivery)?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> BrokerResult<()> {
        {
            let mut channels = self.channels.lock();
            let message = Self::take_in_flight(&mut channels, delivery)?;
            if let Some(lane) = channels
                .get_mut(&delivery.channel)
                .and_then(|state| state.lanes.get_mut(delivery.lane as usize))
            {
                lane.queue.push_front(message);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> BrokerResult<()> {
        {
            let mut channels = self.channels.lock();
            let mut message = Self::take_in_flight(&mut channels, delivery)?;
            message.delivery_count = 0;
            self.enqueue(&mut channels, &dead_letter_channel(&delivery.channel), message);
        }
        self.notify.notify_waiters();

        tracing::warn!(
            channel = %delivery.channel,
            message_id = delivery.id,
            delivery_count = delivery.delivery_count,
            reason,
            "Message moved to dead-letter channel"
        );
        Ok(())
    }
}
