// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use log::{debug, error, info, warn};

use crate::broker::{Broker, Publisher};
use crate::codec::{self, Frame};
use crate::config::DeviceProfile;
use crate::device::DeviceDriver;
use crate::error::{DeviceError, StreamError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerReport {
    pub frames_published: u64,
}

/// Owns one device and publishes every frame it acquires to the channel
/// named after the device.
pub struct FrameProducer {
    device_id: String,
    shutdown: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<Result<ProducerReport, StreamError>>>,
}

impl FrameProducer {
    /// Opens the publishing connection, then hands the device to an
    /// acquisition thread which resets and configures it before looping.
    ///
    /// The device is closed again on every failure path.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Publish`] if the broker cannot be reached, or
    /// [`StreamError::Spawn`] if the thread cannot be started.
    pub fn start(
        device_id: &str,
        mut driver: Box<dyn DeviceDriver>,
        profile: &DeviceProfile,
        broker: &dyn Broker,
    ) -> Result<Self, StreamError> {
        let publisher = match broker.publisher(device_id) {
            Ok(publisher) => publisher,
            Err(source) => {
                if let Err(e) = driver.close() {
                    warn!("{device_id}: {e}");
                }
                return Err(StreamError::Publish {
                    device: device_id.to_string(),
                    source,
                });
            }
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let published = Arc::new(AtomicU64::new(0));

        let worker = Acquisition {
            device_id: device_id.to_string(),
            profile: profile.clone(),
            driver,
            publisher,
            shutdown: Arc::clone(&shutdown),
            published: Arc::clone(&published),
            released: false,
        };

        // A worker that never runs is released by its Drop.
        let handle = thread::Builder::new()
            .name(format!("producer-{device_id}"))
            .spawn(move || worker.run())
            .map_err(|e| StreamError::Spawn {
                device: device_id.to_string(),
                worker: "producer",
                reason: e.to_string(),
            })?;

        Ok(Self {
            device_id: device_id.to_string(),
            shutdown,
            published,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// False once the acquisition loop has exited, whether stopped or failed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ends the acquisition loop and waits for the device to be released.
    /// A loop that already died reports its failure here.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the loop, or
    /// [`StreamError::NotRunning`] if the producer was already stopped.
    pub fn stop(&mut self) -> Result<ProducerReport, StreamError> {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| StreamError::NotRunning(self.device_id.clone()))?;
        handle.join().map_err(|_| StreamError::WorkerPanicked {
            device: self.device_id.clone(),
            worker: "producer",
        })?
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Acquisition {
    device_id: String,
    profile: DeviceProfile,
    driver: Box<dyn DeviceDriver>,
    publisher: Box<dyn Publisher>,
    shutdown: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
    released: bool,
}

impl Acquisition {
    fn run(mut self) -> Result<ProducerReport, StreamError> {
        let result = self.configure().and_then(|()| self.acquire());
        self.release();

        let frames_published = self.published.load(Ordering::Relaxed);
        match &result {
            Ok(()) => info!("{}: producer stopped after {frames_published} frames", self.device_id),
            Err(e) => error!("{e}"),
        }
        result.map(|()| ProducerReport { frames_published })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.driver.close() {
            warn!("{}: {e}", self.device_id);
        }
        if let Err(e) = self.publisher.close() {
            warn!("{}: {e}", self.device_id);
        }
    }

    fn configure(&mut self) -> Result<(), StreamError> {
        let p = &self.profile;
        self.driver
            .reset()
            .and_then(|()| self.driver.configure(p))
            .map_err(|source| StreamError::DeviceConfiguration {
                device: self.device_id.clone(),
                source,
            })?;
        debug!(
            "{}: configured dac {}..{}, {} iterations x {} pulses, tx {}, area {}..{} m, {} fps",
            self.device_id,
            p.dac_min,
            p.dac_max,
            p.iterations,
            p.pulses_per_step,
            p.tx_center_frequency,
            p.frame_area_start,
            p.frame_area_end,
            p.fps
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<(), StreamError> {
        while !self.shutdown.load(Ordering::Relaxed) {
            let samples = match self.driver.read_frame() {
                Ok(samples) => samples,
                Err(DeviceError::Timeout) => continue,
                Err(source) => return Err(self.acquisition_error(source)),
            };
            if samples.len() != self.profile.sample_count {
                return Err(self.acquisition_error(DeviceError::FrameLength {
                    expected: self.profile.sample_count,
                    actual: samples.len(),
                }));
            }

            let body = codec::encode(&Frame::stamped(samples))
                .map_err(|source| self.acquisition_error(DeviceError::Unencodable(source)))?;
            self.publisher
                .publish(&body)
                .map_err(|source| StreamError::Publish {
                    device: self.device_id.clone(),
                    source,
                })?;
            self.published.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn acquisition_error(&self, source: DeviceError) -> StreamError {
        StreamError::Acquisition {
            device: self.device_id.clone(),
            source,
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.release();
    }
}
