// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, info, warn};

use crate::broker::Broker;
use crate::config::FleetConfig;
use crate::device::DeviceConnector;
use crate::display::DisplaySink;
use crate::error::StreamError;
use crate::producer::{FrameProducer, ProducerReport};
use crate::recording::RecordingStore;
use crate::session::{SessionManager, SessionReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    /// A worker of the pair died; the pair still needs a stop to flush.
    Failed,
    Stopped,
}

/// Outcome of stopping one pair. Each half reports on its own.
#[derive(Debug)]
pub struct PairReport {
    pub producer: Result<ProducerReport, StreamError>,
    pub session: Result<SessionReport, StreamError>,
}

struct Pipeline {
    producer: FrameProducer,
    session: SessionManager,
}

enum Slot {
    Idle { stopped: bool },
    Active(Pipeline),
}

/// Runs one producer/session pair per configured device. Pairs share no
/// state; a failure in one never reaches another.
pub struct FleetController {
    config: FleetConfig,
    broker: Arc<dyn Broker>,
    connector: Arc<dyn DeviceConnector>,
    store: Arc<dyn RecordingStore>,
    sink: Arc<dyn DisplaySink>,
    slots: BTreeMap<String, Slot>,
}

impl FleetController {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: FleetConfig,
        broker: Arc<dyn Broker>,
        connector: Arc<dyn DeviceConnector>,
        store: Arc<dyn RecordingStore>,
        sink: Arc<dyn DisplaySink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let slots = config
            .devices
            .iter()
            .map(|id| (id.clone(), Slot::Idle { stopped: false }))
            .collect();
        Ok(Self {
            config,
            broker,
            connector,
            store,
            sink,
            slots,
        })
    }

    #[must_use]
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Starts every pair that is not already running. Failures are reported
    /// per device and do not prevent the remaining devices from starting.
    pub fn start_all(&mut self) -> BTreeMap<String, Result<(), StreamError>> {
        let pending: Vec<String> = self
            .config
            .devices
            .iter()
            .filter(|id| !matches!(self.slots.get(*id), Some(Slot::Active(_))))
            .cloned()
            .collect();

        let mut results = BTreeMap::new();
        for id in pending {
            let result = self.start(&id);
            if let Err(e) = &result {
                error!("{e}");
            }
            results.insert(id, result);
        }
        results
    }

    /// Stops every running pair independently.
    pub fn stop_all(&mut self) -> BTreeMap<String, PairReport> {
        let active: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(id, _)| id.clone())
            .collect();
        active
            .into_iter()
            .filter_map(|id| self.stop(&id).ok().map(|report| (id, report)))
            .collect()
    }

    /// Starts a fresh session for one device: a new recording, a new
    /// subscription (purging any backlog), then the producer.
    ///
    /// # Errors
    ///
    /// Returns the first failure while bringing up the pair.
    pub fn start(&mut self, device_id: &str) -> Result<(), StreamError> {
        match self.slots.get(device_id) {
            None => return Err(StreamError::UnknownDevice(device_id.to_string())),
            Some(Slot::Active(_)) => return Err(StreamError::AlreadyRunning(device_id.to_string())),
            Some(Slot::Idle { .. }) => {}
        }

        // The consumer subscribes first so nothing the producer sends is purged,
        // and the device is only opened once there is somewhere to send frames.
        let session = SessionManager::start(
            device_id,
            &self.config.profile,
            self.broker.as_ref(),
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            self.config.display_depth,
        )?;
        let driver = self
            .connector
            .connect(device_id)
            .map_err(|source| StreamError::DeviceConfiguration {
                device: device_id.to_string(),
                source,
            })?;
        let producer =
            FrameProducer::start(device_id, driver, &self.config.profile, self.broker.as_ref())?;

        info!("{device_id}: session started");
        self.slots.insert(
            device_id.to_string(),
            Slot::Active(Pipeline { producer, session }),
        );
        Ok(())
    }

    /// Stops one pair: the producer first, then the session, which persists
    /// its recording.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownDevice`] or [`StreamError::NotRunning`];
    /// failures of the pair itself are inside the report.
    pub fn stop(&mut self, device_id: &str) -> Result<PairReport, StreamError> {
        let slot = self
            .slots
            .get_mut(device_id)
            .ok_or_else(|| StreamError::UnknownDevice(device_id.to_string()))?;
        if !matches!(slot, Slot::Active(_)) {
            return Err(StreamError::NotRunning(device_id.to_string()));
        }
        let Slot::Active(mut pipeline) = std::mem::replace(slot, Slot::Idle { stopped: true })
        else {
            return Err(StreamError::NotRunning(device_id.to_string()));
        };

        let report = PairReport {
            producer: pipeline.producer.stop(),
            session: pipeline.session.stop(),
        };
        match (&report.producer, &report.session) {
            (Ok(p), Ok(s)) => info!(
                "{device_id}: stopped, {} frames published, {} saved to {}",
                p.frames_published, s.frames_saved, s.saved
            ),
            (producer, session) => {
                if let Err(e) = producer {
                    warn!("{e}");
                }
                if let Err(e) = session {
                    error!("{e}");
                }
            }
        }
        Ok(report)
    }

    #[must_use]
    pub fn state(&self, device_id: &str) -> Option<SessionState> {
        self.slots.get(device_id).map(|slot| match slot {
            Slot::Idle { stopped: false } => SessionState::NotStarted,
            Slot::Idle { stopped: true } => SessionState::Stopped,
            Slot::Active(p) if p.producer.is_running() && p.session.is_running() => {
                SessionState::Running
            }
            Slot::Active(_) => SessionState::Failed,
        })
    }

    #[must_use]
    pub fn states(&self) -> BTreeMap<String, SessionState> {
        self.slots
            .keys()
            .filter_map(|id| self.state(id).map(|s| (id.clone(), s)))
            .collect()
    }

    /// Frames published by the device's current producer.
    #[must_use]
    pub fn frames_published(&self, device_id: &str) -> Option<u64> {
        match self.slots.get(device_id)? {
            Slot::Active(p) => Some(p.producer.frames_published()),
            Slot::Idle { .. } => None,
        }
    }

    /// Frames held in the device's current recording.
    #[must_use]
    pub fn frames_recorded(&self, device_id: &str) -> Option<usize> {
        match self.slots.get(device_id)? {
            Slot::Active(p) => Some(p.session.frames_recorded()),
            Slot::Idle { .. } => None,
        }
    }
}
