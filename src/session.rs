//! Device session.
//!
//! `DeviceSession` sequences correlated request/response exchanges into
//! logical device operations: connect, set/get parameters, commit, trigger
//! arming, reset. It caches the last-known device configuration and
//! publishes a state snapshot on two topics whenever a mutating operation
//! succeeds — `status` for connection, trigger and power changes, and
//! `parameter` for pulse-configuration changes.
//!
//! Compound operations issue their exchanges strictly in order, each
//! awaiting completion before the next begins. The first failure aborts the
//! remainder; fields already written to the device stay written, because the
//! protocol has no multi-write transaction primitive — commit is itself an
//! explicit, separate exchange.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{AppResult, LaserError};
use crate::notify::Topic;
use crate::ports;
use crate::serial::command::{self, CommandMeta};
use crate::serial::engine::{CorrelationEngine, PendingRequest};
use crate::serial::transport::Transport;

/// Identifier of the device to connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectTarget {
    /// Stable name under the enumeration directory.
    Name(String),
    /// Direct tty path.
    Path(String),
}

/// The device a session is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub name: Option<String>,
    pub path: String,
}

/// Master power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerConfig {
    pub master_power: bool,
}

/// Cached pulse configuration. Fields are `None` until a set or get has
/// established them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    pub exposure: Option<u16>,
    pub filter: Option<u16>,
    pub delay: Option<u16>,
    pub polarity: Option<bool>,
}

/// Partial pulse-parameter update. Only present fields are written, in the
/// fixed order exposure, filter, delay, polarity; `commit` issues the commit
/// exchange afterwards.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PulseUpdate {
    pub exposure: Option<u16>,
    pub filter: Option<u16>,
    pub delay: Option<u16>,
    pub polarity: Option<bool>,
    #[serde(default)]
    pub commit: bool,
}

/// Hardware and firmware revision reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceVersion {
    pub hardware: u8,
    pub firmware: u8,
}

/// Snapshot of the session: connection, trigger, and cached configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub connected: bool,
    pub device: Option<DeviceRef>,
    pub trigger_armed: bool,
    pub power: Option<PowerConfig>,
    pub pulse: Option<PulseConfig>,
}

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for each request/response exchange.
    pub exchange_timeout: Duration,
    /// Directory listed when connecting by name.
    pub device_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(1),
            device_dir: PathBuf::from(ports::DEVICE_DIR),
        }
    }
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            exchange_timeout: settings.command.exchange_timeout,
            device_dir: settings.serial.device_dir.clone(),
        }
    }
}

/// Application-level view of one connected laser device.
pub struct DeviceSession {
    link: Mutex<Box<dyn Transport>>,
    engine: CorrelationEngine,
    state: RwLock<SessionState>,
    status: Topic<SessionState>,
    parameters: Topic<SessionState>,
    options: SessionOptions,
}

impl DeviceSession {
    pub fn new(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        Self {
            link: Mutex::new(transport),
            engine: CorrelationEngine::new(),
            state: RwLock::new(SessionState::default()),
            status: Topic::default(),
            parameters: Topic::default(),
            options,
        }
    }

    /// Topic carrying connection, trigger, and power changes.
    pub fn status_topic(&self) -> &Topic<SessionState> {
        &self.status
    }

    /// Topic carrying pulse-configuration changes.
    pub fn parameter_topic(&self) -> &Topic<SessionState> {
        &self.parameters
    }

    /// The correlation engine backing this session.
    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Open the serial link to the identified device and start correlating
    /// responses. A repeated connect to the already-open device is a no-op;
    /// connecting to a different device while open fails.
    pub async fn connect(&self, target: ConnectTarget) -> AppResult<()> {
        let device = match target {
            ConnectTarget::Path(path) => DeviceRef { name: None, path },
            ConnectTarget::Name(name) => {
                let path = ports::resolve_name(&self.options.device_dir, &name)?;
                DeviceRef {
                    name: Some(name),
                    path,
                }
            }
        };

        let mut link = self.link.lock().await;
        if link.is_open() {
            if link.path().as_deref() == Some(device.path.as_str()) {
                debug!(path = %device.path, "already connected to requested device");
                return Ok(());
            }
            return Err(LaserError::AlreadyOpen(link.path().unwrap_or_default()));
        }

        let bytes = link.open(&device.path).await?;
        tokio::spawn(self.engine.clone().run(bytes));
        drop(link);

        {
            let mut state = self.state.write();
            state.connected = true;
            state.device = Some(device);
            // device defaults are unknown until re-queried
            state.trigger_armed = false;
            state.power = None;
            state.pulse = None;
        }
        self.publish_status();
        Ok(())
    }

    /// Close the link and return the session to its initial state.
    /// Idempotent.
    pub async fn disconnect(&self) -> AppResult<()> {
        self.teardown().await;
        Ok(())
    }

    /// Send the reset command, then tear the session down regardless of the
    /// exchange outcome. A failed reset exchange is still surfaced.
    pub async fn reset(&self) -> AppResult<()> {
        let outcome = self.exchange(command::RESET, Vec::new()).await;
        if let Err(error) = &outcome {
            warn!(%error, "reset exchange failed, tearing down anyway");
        }
        self.teardown().await;
        outcome.map(|_| ())
    }

    /// Query hardware and firmware revisions.
    pub async fn device_version(&self) -> AppResult<DeviceVersion> {
        let payload = self.exchange(command::VERSION, Vec::new()).await?;
        Ok(DeviceVersion {
            hardware: payload[0],
            firmware: payload[1],
        })
    }

    /// Switch master power.
    pub async fn set_power(&self, on: bool) -> AppResult<()> {
        self.exchange(command::SET_POWER, vec![u8::from(on)]).await?;
        self.state.write().power = Some(PowerConfig { master_power: on });
        self.publish_status();
        Ok(())
    }

    /// Read master power from the device, refreshing the cache.
    pub async fn get_power(&self) -> AppResult<PowerConfig> {
        let payload = self.exchange(command::GET_POWER, Vec::new()).await?;
        let power = PowerConfig {
            master_power: payload[0] == 1,
        };
        self.state.write().power = Some(power);
        Ok(power)
    }

    /// Write the present fields of `update` to the device, in the fixed
    /// order exposure, filter, delay, polarity, then commit when requested.
    ///
    /// The first failed exchange aborts the remainder; fields already
    /// written are not rolled back.
    pub async fn set_pulse_parameters(&self, update: PulseUpdate) -> AppResult<()> {
        self.ensure_open().await?;

        if let Some(exposure) = update.exposure {
            self.exchange(command::SET_EXPOSURE, exposure.to_le_bytes().to_vec())
                .await?;
        }
        if let Some(filter) = update.filter {
            self.exchange(command::SET_FILTER, filter.to_le_bytes().to_vec())
                .await?;
        }
        if let Some(delay) = update.delay {
            self.exchange(command::SET_DELAY, delay.to_le_bytes().to_vec())
                .await?;
        }
        if let Some(polarity) = update.polarity {
            self.exchange(command::SET_POLARITY, vec![u8::from(polarity)])
                .await?;
        }
        if update.commit {
            self.exchange(command::COMMIT, Vec::new()).await?;
        }

        {
            let mut state = self.state.write();
            let pulse = state.pulse.get_or_insert_with(PulseConfig::default);
            if update.exposure.is_some() {
                pulse.exposure = update.exposure;
            }
            if update.filter.is_some() {
                pulse.filter = update.filter;
            }
            if update.delay.is_some() {
                pulse.delay = update.delay;
            }
            if update.polarity.is_some() {
                pulse.polarity = update.polarity;
            }
        }
        self.publish_parameters();
        Ok(())
    }

    /// Read the full pulse configuration from the device, refreshing the
    /// cache. A failed sub-fetch aborts; partial results are discarded.
    pub async fn get_pulse_parameters(&self) -> AppResult<PulseConfig> {
        let exposure = self.read_u16(command::GET_EXPOSURE).await?;
        let filter = self.read_u16(command::GET_FILTER).await?;
        let delay = self.read_u16(command::GET_DELAY).await?;
        let polarity = {
            let payload = self.exchange(command::GET_POLARITY, Vec::new()).await?;
            payload[0] == 1
        };

        let pulse = PulseConfig {
            exposure: Some(exposure),
            filter: Some(filter),
            delay: Some(delay),
            polarity: Some(polarity),
        };
        self.state.write().pulse = Some(pulse);
        Ok(pulse)
    }

    /// Arm or cancel the trigger. The device acknowledges with an empty
    /// response; local state mirrors the last commanded value.
    pub async fn set_trigger_arm(&self, armed: bool) -> AppResult<()> {
        let meta = if armed {
            command::ARM_TRIGGER
        } else {
            command::CANCEL_TRIGGER
        };
        self.exchange(meta, Vec::new()).await?;
        self.state.write().trigger_armed = armed;
        self.publish_status();
        Ok(())
    }

    /// Last commanded trigger state. Not re-queried from the device.
    pub fn trigger_armed(&self) -> bool {
        self.state.read().trigger_armed
    }

    /// One correlated request/response exchange, bounded by the configured
    /// deadline. The same deadline drives the engine's eviction, so a stale
    /// entry never outlives the caller's wait for long.
    async fn exchange(&self, meta: CommandMeta, arg: Vec<u8>) -> AppResult<Vec<u8>> {
        let deadline = Instant::now() + self.options.exchange_timeout;
        let (request, reply) = PendingRequest::with_deadline(meta, arg, deadline);

        {
            let mut link = self.link.lock().await;
            if !link.is_open() {
                return Err(LaserError::NotOpen);
            }
            self.engine.submit(request, &mut **link).await?;
        }

        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(payload)) => Ok(payload),
            // A closed sink before the deadline means the dispatch loop went
            // away with the link; at or after it, the engine evicted us.
            Ok(Err(_)) => {
                if Instant::now() >= deadline {
                    Err(LaserError::DeadlineExceeded { command: meta.name })
                } else {
                    Err(LaserError::Disconnected { command: meta.name })
                }
            }
            Err(_) => Err(LaserError::DeadlineExceeded { command: meta.name }),
        }
    }

    async fn read_u16(&self, meta: CommandMeta) -> AppResult<u16> {
        let payload = self.exchange(meta, Vec::new()).await?;
        Ok(u16::from_le_bytes([payload[0], payload[1]]))
    }

    async fn ensure_open(&self) -> AppResult<()> {
        if self.link.lock().await.is_open() {
            Ok(())
        } else {
            Err(LaserError::NotOpen)
        }
    }

    async fn teardown(&self) {
        let mut link = self.link.lock().await;
        let was_open = link.is_open();
        link.close().await;
        drop(link);

        *self.state.write() = SessionState::default();
        if was_open {
            self.publish_status();
        }
    }

    fn publish_status(&self) {
        self.status.publish(self.snapshot());
    }

    fn publish_parameters(&self) {
        self.parameters.publish(self.snapshot());
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.snapshot())
            .field("pending", &self.engine.pending_len())
            .finish()
    }
}
