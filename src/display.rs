// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam::channel::{Sender, TrySendError, bounded};
use log::{debug, warn};

use crate::codec::Frame;

/// Renders frames. Only ever called from the dispatch thread, one frame at a
/// time, never from the UI thread.
pub trait DisplaySink: Send + Sync {
    fn show(&self, device_id: &str, frame: &Frame);
}

/// Logs the strongest range bin of every frame.
pub struct LogSink;

impl DisplaySink for LogSink {
    fn show(&self, device_id: &str, frame: &Frame) {
        if let Some((bin, amplitude)) = frame.peak() {
            debug!(
                "{device_id} @ {:.3}: peak {amplitude:.5} at bin {bin}/{}",
                frame.timestamp,
                frame.samples.len()
            );
        }
    }
}

/// Hands frames to a sink on a dedicated thread without ever blocking the
/// caller. When the queue is full the frame is dropped for display only.
pub struct DisplayDispatch {
    tx: Option<Sender<Frame>>,
    dropped: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DisplayDispatch {
    /// # Errors
    ///
    /// Returns an error if the dispatch thread cannot be spawned.
    pub fn spawn(
        device_id: &str,
        sink: Arc<dyn DisplaySink>,
        depth: usize,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = bounded::<Frame>(depth.max(1));
        let device = device_id.to_string();

        let handle = thread::Builder::new()
            .name(format!("display-{device_id}"))
            .spawn(move || {
                for frame in &rx {
                    sink.show(&device, &frame);
                }
            })
            .map_err(|e| anyhow::anyhow!("failed to spawn display thread: {e}"))?;

        Ok(Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
            handle: Some(handle),
        })
    }

    pub fn dispatch(&self, frame: Frame) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("display thread is gone, frame not shown");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lets the sink drain what is already queued, then joins its thread.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("display sink panicked");
        }
    }
}

impl Drop for DisplayDispatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}
