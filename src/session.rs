// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::SystemTime;

use chrono::Local;
use log::{debug, error, info, warn};

use crate::broker::{Broker, Interrupter, Subscription};
use crate::codec;
use crate::config::DeviceProfile;
use crate::display::{DisplayDispatch, DisplaySink};
use crate::error::StreamError;
use crate::recording::format::SessionMetadata;
use crate::recording::{Recording, RecordingStore};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    /// Identifier returned by the recording store.
    pub saved: String,
    pub frames_saved: usize,
    /// Messages that failed to decode or had the wrong sample count.
    pub rejected: u64,
    /// Frames recorded but not shown because the display queue was full.
    pub display_dropped: u64,
    /// The subscription failure that ended draining early, if any.
    pub drain_error: Option<StreamError>,
    /// Close failure swallowed during stop.
    pub shutdown_error: Option<StreamError>,
}

struct Drained {
    recording: Recording,
    subscription: Box<dyn Subscription>,
    dispatch: DisplayDispatch,
    error: Option<StreamError>,
}

/// Consumes one device channel: every frame is recorded and offered to the
/// display; the recording is persisted when the session stops.
pub struct SessionManager {
    device_id: String,
    store: Arc<dyn RecordingStore>,
    interrupter: Interrupter,
    recorded: Arc<AtomicUsize>,
    rejected: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<Drained>>,
}

impl SessionManager {
    /// Subscribes to the device channel, discards whatever was queued before
    /// this point, and starts draining on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Subscribe`] if the channel cannot be opened or
    /// purged, or [`StreamError::Spawn`] if a worker thread cannot start.
    pub fn start(
        device_id: &str,
        profile: &DeviceProfile,
        broker: &dyn Broker,
        store: Arc<dyn RecordingStore>,
        sink: Arc<dyn DisplaySink>,
        display_depth: usize,
    ) -> Result<Self, StreamError> {
        let subscribe_error = |source| StreamError::Subscribe {
            device: device_id.to_string(),
            source,
        };
        let mut subscription = broker.subscribe(device_id).map_err(subscribe_error)?;
        let purged = subscription.purge().map_err(subscribe_error)?;
        if purged > 0 {
            info!("{device_id}: discarded {purged} stale frames");
        }

        let dispatch = DisplayDispatch::spawn(device_id, sink, display_depth).map_err(|e| {
            StreamError::Spawn {
                device: device_id.to_string(),
                worker: "display",
                reason: e.to_string(),
            }
        })?;

        let recording = Recording::new(SessionMetadata {
            device_id: device_id.to_string(),
            profile: profile.clone(),
            session_start: SystemTime::now(),
        });
        let interrupter = subscription.interrupter();
        let recorded = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicU64::new(0));

        let drain = Drain {
            device_id: device_id.to_string(),
            sample_count: profile.sample_count,
            recorded: Arc::clone(&recorded),
            rejected: Arc::clone(&rejected),
        };
        let handle = thread::Builder::new()
            .name(format!("session-{device_id}"))
            .spawn(move || drain.run(subscription, dispatch, recording))
            .map_err(|e| StreamError::Spawn {
                device: device_id.to_string(),
                worker: "session",
                reason: e.to_string(),
            })?;

        Ok(Self {
            device_id: device_id.to_string(),
            store,
            interrupter,
            recorded,
            rejected,
            handle: Some(handle),
        })
    }

    /// Frames currently held in the session's recording.
    #[must_use]
    pub fn frames_recorded(&self) -> usize {
        self.recorded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// False once draining has ended, whether stopped or failed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops draining, persists the recording under a name derived from the
    /// current time, clears it, and closes the connection. A failed close is
    /// reported in the result but does not fail the stop.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Persistence`] if the recording could not be
    /// stored, or [`StreamError::NotRunning`] if already stopped.
    pub fn stop(&mut self) -> Result<SessionReport, StreamError> {
        let mut drained = self.finish_draining()?;
        drained.dispatch.shutdown();

        let saved = self
            .store
            .save(&self.device_id, &drained.recording, Local::now());
        let frames_saved = drained.recording.len();
        drained.recording.clear();
        self.recorded.store(0, Ordering::Relaxed);

        let shutdown_error = close_subscription(&self.device_id, drained.subscription.as_mut());

        let saved = saved?;
        Ok(SessionReport {
            saved,
            frames_saved,
            rejected: self.frames_rejected(),
            display_dropped: drained.dispatch.dropped(),
            drain_error: drained.error,
            shutdown_error,
        })
    }

    fn finish_draining(&mut self) -> Result<Drained, StreamError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| StreamError::NotRunning(self.device_id.clone()))?;
        self.interrupter.interrupt();
        handle.join().map_err(|_| StreamError::WorkerPanicked {
            device: self.device_id.clone(),
            worker: "session",
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut drained) = self.finish_draining() {
            if !drained.recording.is_empty() {
                warn!(
                    "{}: session dropped without stop, discarding {} frames",
                    self.device_id,
                    drained.recording.len()
                );
            }
            close_subscription(&self.device_id, drained.subscription.as_mut());
        }
    }
}

/// A failed close is logged and returned, never raised.
fn close_subscription(
    device_id: &str,
    subscription: &mut dyn Subscription,
) -> Option<StreamError> {
    subscription.close().err().map(|source| {
        let err = StreamError::Shutdown {
            device: device_id.to_string(),
            source,
        };
        warn!("{err} (ignored)");
        err
    })
}

struct Drain {
    device_id: String,
    sample_count: usize,
    recorded: Arc<AtomicUsize>,
    rejected: Arc<AtomicU64>,
}

impl Drain {
    fn run(
        self,
        mut subscription: Box<dyn Subscription>,
        dispatch: DisplayDispatch,
        mut recording: Recording,
    ) -> Drained {
        debug!("{}: draining", self.device_id);
        let mut error = None;

        loop {
            let body = match subscription.recv() {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(source) => {
                    let err = StreamError::Subscribe {
                        device: self.device_id.clone(),
                        source,
                    };
                    error!("{err}");
                    error = Some(err);
                    break;
                }
            };

            let frame = match codec::decode(&body) {
                Ok(frame) if frame.samples.len() == self.sample_count => frame,
                Ok(frame) => {
                    warn!(
                        "{}: dropping frame with {} samples (expected {})",
                        self.device_id,
                        frame.samples.len(),
                        self.sample_count
                    );
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(e) => {
                    warn!("{}: dropping message: {e}", self.device_id);
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            dispatch.dispatch(frame.clone());
            recording.push(frame);
            self.recorded.store(recording.len(), Ordering::Relaxed);
        }

        debug!(
            "{}: drain ended with {} frames",
            self.device_id,
            recording.len()
        );
        Drained {
            recording,
            subscription,
            dispatch,
            error,
        }
    }
}
