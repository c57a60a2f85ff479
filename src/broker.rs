// SPDX-License-Identifier: MIT
//! Named publish/subscribe channels.
//!
//! Queues are non-durable and auto-acknowledged: a message handed to a
//! consumer is gone, and nothing survives the broker. Each device owns one
//! queue named after its identifier.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use log::debug;

use crate::error::BrokerError;

pub trait Broker: Send + Sync {
    /// Declares `channel` if needed and opens a publishing connection to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    fn publisher(&self, channel: &str) -> Result<Box<dyn Publisher>, BrokerError>;

    /// Declares `channel` if needed and opens a consuming connection to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

pub trait Publisher: Send {
    /// Fire-and-forget: returns once the broker accepted the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker refused the message.
    fn publish(&mut self, body: &[u8]) -> Result<(), BrokerError>;

    /// # Errors
    ///
    /// Returns an error if the connection did not close cleanly.
    fn close(&mut self) -> Result<(), BrokerError>;
}

pub trait Subscription: Send {
    /// Drops every message queued so far and returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    fn purge(&mut self) -> Result<usize, BrokerError>;

    /// Blocks for the next message. Returns `Ok(None)` once interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel went away.
    fn recv(&mut self) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Handle another thread can use to unblock [`Subscription::recv`].
    fn interrupter(&self) -> Interrupter;

    /// # Errors
    ///
    /// Returns an error if the connection did not close cleanly.
    fn close(&mut self) -> Result<(), BrokerError>;
}

pub struct Interrupter(Box<dyn Fn() + Send + Sync>);

impl Interrupter {
    #[must_use]
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn interrupt(&self) {
        (self.0)();
    }
}

struct Queue {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// In-process broker. Cloning yields another connection to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
    online: Arc<AtomicBool>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the broker going away (or coming back). Open connections
    /// fail their next operation while offline.
    #[cfg(test)]
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    /// Messages waiting in `channel`, or 0 if it was never declared.
    #[must_use]
    pub fn queue_depth(&self, channel: &str) -> usize {
        self.queues
            .lock()
            .map_or(0, |queues| queues.get(channel).map_or(0, |q| q.rx.len()))
    }

    fn declare(&self, channel: &str) -> Result<(Sender<Vec<u8>>, Receiver<Vec<u8>>), BrokerError> {
        if !self.online.load(Ordering::Relaxed) {
            return Err(BrokerError::Unreachable(format!(
                "cannot declare queue {channel}"
            )));
        }
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| BrokerError::Unreachable("broker state poisoned".to_string()))?;
        let queue = queues.entry(channel.to_string()).or_insert_with(|| {
            debug!("declared queue {channel}");
            let (tx, rx) = unbounded();
            Queue { tx, rx }
        });
        Ok((queue.tx.clone(), queue.rx.clone()))
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    fn publisher(&self, channel: &str) -> Result<Box<dyn Publisher>, BrokerError> {
        let (tx, _) = self.declare(channel)?;
        Ok(Box::new(MemoryPublisher {
            channel: channel.to_string(),
            tx: Some(tx),
            online: Arc::clone(&self.online),
        }))
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let (_, rx) = self.declare(channel)?;
        let (interrupt_tx, interrupt_rx) = bounded(1);
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx,
            interrupt_tx,
            interrupt_rx,
            online: Arc::clone(&self.online),
            closed: false,
        }))
    }
}

struct MemoryPublisher {
    channel: String,
    tx: Option<Sender<Vec<u8>>>,
    online: Arc<AtomicBool>,
}

impl Publisher for MemoryPublisher {
    fn publish(&mut self, body: &[u8]) -> Result<(), BrokerError> {
        if !self.online.load(Ordering::Relaxed) {
            return Err(BrokerError::Unreachable(format!(
                "lost connection while publishing to {}",
                self.channel
            )));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| BrokerError::ChannelClosed(self.channel.clone()))?;
        tx.send(body.to_vec())
            .map_err(|_| BrokerError::ChannelClosed(self.channel.clone()))
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        self.tx = None;
        if self.online.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BrokerError::Close(format!(
                "broker gone while closing publisher on {}",
                self.channel
            )))
        }
    }
}

struct MemorySubscription {
    channel: String,
    rx: Receiver<Vec<u8>>,
    interrupt_tx: Sender<()>,
    interrupt_rx: Receiver<()>,
    online: Arc<AtomicBool>,
    closed: bool,
}

impl Subscription for MemorySubscription {
    fn purge(&mut self) -> Result<usize, BrokerError> {
        if !self.online.load(Ordering::Relaxed) {
            return Err(BrokerError::Unreachable(format!(
                "cannot purge queue {}",
                self.channel
            )));
        }
        Ok(self.rx.try_iter().count())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        if self.closed {
            return Err(BrokerError::ChannelClosed(self.channel.clone()));
        }
        crossbeam::channel::select! {
            recv(self.interrupt_rx) -> _ => Ok(None),
            recv(self.rx) -> msg => msg
                .map(Some)
                .map_err(|_| BrokerError::ChannelClosed(self.channel.clone())),
        }
    }

    fn interrupter(&self) -> Interrupter {
        let tx = self.interrupt_tx.clone();
        Interrupter::new(move || {
            // A pending interrupt is enough; a full slot means one is queued.
            let _ = tx.try_send(());
        })
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        if self.online.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BrokerError::Close(format!(
                "broker gone while closing consumer on {}",
                self.channel
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn messages_arrive_in_publish_order() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("A").unwrap();
        let mut publisher = broker.publisher("A").unwrap();

        for i in 0..5u8 {
            publisher.publish(&[i]).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(sub.recv().unwrap(), Some(vec![i]));
        }
    }

    #[test]
    fn purge_discards_backlog_only() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher("A").unwrap();
        publisher.publish(b"old-1").unwrap();
        publisher.publish(b"old-2").unwrap();
        assert_eq!(broker.queue_depth("A"), 2);

        let mut sub = broker.subscribe("A").unwrap();
        assert_eq!(sub.purge().unwrap(), 2);
        assert_eq!(broker.queue_depth("A"), 0);

        publisher.publish(b"new").unwrap();
        assert_eq!(sub.recv().unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn channels_are_isolated_by_name() {
        let broker = MemoryBroker::new();
        let mut pub_a = broker.publisher("A").unwrap();
        let mut sub_b = broker.subscribe("B").unwrap();
        pub_a.publish(b"a").unwrap();

        assert_eq!(broker.queue_depth("A"), 1);
        assert_eq!(sub_b.purge().unwrap(), 0);
    }

    #[test]
    fn interrupter_unblocks_a_waiting_recv() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("A").unwrap();
        let interrupter = sub.interrupter();

        let waiter = thread::spawn(move || sub.recv());
        thread::sleep(Duration::from_millis(20));
        interrupter.interrupt();

        assert_eq!(waiter.join().unwrap(), Ok(None));
    }

    #[test]
    fn offline_broker_fails_operations() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher("A").unwrap();
        let mut sub = broker.subscribe("A").unwrap();
        broker.set_online(false);

        assert!(matches!(
            publisher.publish(b"x"),
            Err(BrokerError::Unreachable(_))
        ));
        assert!(matches!(broker.subscribe("A"), Err(BrokerError::Unreachable(_))));
        assert!(matches!(sub.close(), Err(BrokerError::Close(_))));
    }

    #[test]
    fn closed_publisher_rejects_messages() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher("A").unwrap();
        publisher.close().unwrap();
        assert_eq!(
            publisher.publish(b"x"),
            Err(BrokerError::ChannelClosed("A".to_string()))
        );
    }
}
