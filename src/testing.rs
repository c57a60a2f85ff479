// SPDX-License-Identifier: MIT
//! Doubles shared by the pipeline tests.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::broker::{Broker, MemoryBroker, Publisher, Subscription};
use crate::codec::Frame;
use crate::config::DeviceProfile;
use crate::device::{DeviceConnector, DeviceDriver};
use crate::display::DisplaySink;
use crate::error::{BrokerError, DeviceError, StreamError};
use crate::recording::{Recording, RecordingStore};

const SCRIPT_PACE: Duration = Duration::from_millis(2);

pub fn profile(sample_count: usize) -> DeviceProfile {
    DeviceProfile {
        sample_count,
        ..DeviceProfile::default()
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Plays back a fixed list of read results, then times out forever.
#[derive(Default)]
pub struct ScriptedDevice {
    pub script: VecDeque<Result<Vec<f64>, DeviceError>>,
    pub fail_reset: bool,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDevice {
    pub fn frames(frames: &[&[f64]]) -> Self {
        Self {
            script: frames.iter().map(|f| Ok(f.to_vec())).collect(),
            ..Self::default()
        }
    }
}

impl DeviceDriver for ScriptedDevice {
    fn reset(&mut self) -> Result<(), DeviceError> {
        self.log.lock().unwrap().push("reset".to_string());
        if self.fail_reset {
            return Err(DeviceError::Reset("no answer".to_string()));
        }
        Ok(())
    }

    fn configure(&mut self, _profile: &DeviceProfile) -> Result<(), DeviceError> {
        self.log.lock().unwrap().push("configure".to_string());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Vec<f64>, DeviceError> {
        thread::sleep(SCRIPT_PACE);
        self.script.pop_front().unwrap_or(Err(DeviceError::Timeout))
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.log.lock().unwrap().push("close".to_string());
        Ok(())
    }
}

/// Hands out prepared devices per identifier, in registration order.
#[derive(Default)]
pub struct ScriptedConnector {
    devices: Mutex<HashMap<String, VecDeque<ScriptedDevice>>>,
}

impl ScriptedConnector {
    pub fn with(self, device_id: &str, device: ScriptedDevice) -> Self {
        self.devices
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default()
            .push_back(device);
        self
    }
}

impl DeviceConnector for ScriptedConnector {
    fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceDriver>, DeviceError> {
        self.devices
            .lock()
            .unwrap()
            .get_mut(device_id)
            .and_then(VecDeque::pop_front)
            .map(|d| Box::new(d) as Box<dyn DeviceDriver>)
            .ok_or_else(|| DeviceError::Connect(device_id.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<Vec<(String, Recording)>>,
    pub fail: AtomicBool,
}

impl MemoryStore {
    pub fn saved_for(&self, device_id: &str) -> Vec<Recording> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device_id)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

impl RecordingStore for MemoryStore {
    fn save(
        &self,
        device_id: &str,
        recording: &Recording,
        at: DateTime<Local>,
    ) -> Result<String, StreamError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(StreamError::Persistence {
                device: device_id.to_string(),
                reason: "disk full".to_string(),
            });
        }
        self.saved
            .lock()
            .unwrap()
            .push((device_id.to_string(), recording.clone()));
        Ok(crate::recording::artifact_name(device_id, at))
    }
}

#[derive(Default)]
pub struct CollectingSink {
    shown: Mutex<Vec<Frame>>,
}

impl CollectingSink {
    pub fn frames(&self) -> Vec<Frame> {
        self.shown.lock().unwrap().clone()
    }
}

impl DisplaySink for CollectingSink {
    fn show(&self, _device_id: &str, frame: &Frame) {
        self.shown.lock().unwrap().push(frame.clone());
    }
}

/// A broker whose connections always fail to close.
pub struct StickyCloseBroker(pub MemoryBroker);

struct StickySubscription(Box<dyn Subscription>);

impl Subscription for StickySubscription {
    fn purge(&mut self) -> Result<usize, BrokerError> {
        self.0.purge()
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        self.0.recv()
    }

    fn interrupter(&self) -> crate::broker::Interrupter {
        self.0.interrupter()
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        self.0.close()?;
        Err(BrokerError::Close("connection reset by peer".to_string()))
    }
}

impl Broker for StickyCloseBroker {
    fn publisher(&self, channel: &str) -> Result<Box<dyn Publisher>, BrokerError> {
        self.0.publisher(channel)
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        Ok(Box::new(StickySubscription(self.0.subscribe(channel)?)))
    }
}
