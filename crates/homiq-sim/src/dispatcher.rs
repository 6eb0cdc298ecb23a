//! Command dispatcher
//!
//! The simulation core. [`Simulator::handle_frame`] takes one parsed frame
//! and produces the responses a real bus would give, after running it
//! through the fault gates in a fixed order:
//!
//! 1. packet loss
//! 2. latency (computed here, applied by the writer)
//! 3. device lookup
//! 4. device offline
//! 5. ack timeout
//! 6. command handling
//!
//! Store failures never abort dispatch; they are logged and the command is
//! answered with default values.

use std::time::Duration;

use homiq_protocol::{Frame, ParsedFrame, PROGRAMMING_CMD};
use tracing::{debug, info, warn};

use crate::device::{Device, PropertySelector};
use crate::error::StoreError;
use crate::fault::{FaultInjector, FaultRule, FaultType};
use crate::scenario::{PushEventSpec, Scenario, ValueGenerator};
use crate::sequence::SequenceCounters;
use crate::store::{DeviceStore, EventRecord, Outcome};

/// Number of input bits reported by `LI`
pub const INPUT_LIMIT_MASK: &str = "65535";

/// Command prefixes that write programming (EEPROM) values
pub const PROGRAMMING_PREFIXES: [&str; 10] = [
    "IM", "II", "ODS", "IOM", "MIN", "MAX", "TB", "TD", "UDS", "UDD",
];

/// What an inbound command asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `HB`
    Heartbeat,
    /// `ID.0`
    Identify,
    /// `S.0`
    Status,
    /// `GI`
    GetInputs,
    /// `LI`
    InputLimits,
    /// `PG`
    ProgrammingMode,
    /// `IM.*`, `ODS.*`, ...
    Program,
    /// `I.*`
    InputRead,
    /// `O.*`
    OutputWrite,
    /// `B1`, `B2`
    Dimmer(u8),
    /// `T.*`
    TemperatureRead,
    /// `L.*`
    LedWrite,
    /// Anything else; still acknowledged
    Unknown,
}

impl Command {
    /// Classify a command string; the first matching rule wins
    pub fn classify(cmd: &str) -> Self {
        match cmd {
            "HB" => return Command::Heartbeat,
            "ID.0" => return Command::Identify,
            "S.0" => return Command::Status,
            "GI" => return Command::GetInputs,
            "LI" => return Command::InputLimits,
            PROGRAMMING_CMD => return Command::ProgrammingMode,
            _ => {}
        }

        let base = cmd.split('.').next().unwrap_or(cmd);
        if PROGRAMMING_PREFIXES.contains(&base) {
            Command::Program
        } else if cmd.starts_with("I.") {
            Command::InputRead
        } else if cmd.starts_with("O.") {
            Command::OutputWrite
        } else if cmd == "B1" {
            Command::Dimmer(1)
        } else if cmd == "B2" {
            Command::Dimmer(2)
        } else if cmd.starts_with("T.") {
            Command::TemperatureRead
        } else if cmd.starts_with("L.") {
            Command::LedWrite
        } else {
            Command::Unknown
        }
    }
}

/// Result of dispatching one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Frames to write back, in order
    pub responses: Vec<Frame>,
    /// Delay to apply before writing them
    pub delay: Option<Duration>,
    /// What happened; `None` for frames that are not dispatched at all
    pub outcome: Option<Outcome>,
}

impl Dispatch {
    fn ignored() -> Self {
        Self {
            responses: Vec::new(),
            delay: None,
            outcome: None,
        }
    }

    fn dropped(outcome: Outcome, delay: Option<Duration>) -> Self {
        Self {
            responses: Vec::new(),
            delay,
            outcome: Some(outcome),
        }
    }
}

/// Notifications produced by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A device property changed through an output write or admin command
    DeviceUpdate {
        /// Device address
        device_addr: String,
        /// Command or key that was written
        cmd: String,
        /// New value
        value: String,
    },
}

/// Simulated device bus
pub struct Simulator {
    store: Box<dyn DeviceStore>,
    faults: FaultInjector,
    sequences: SequenceCounters,
    event_buffer: Vec<SimEvent>,
}

impl Simulator {
    /// Create a simulator over a store, with OS-seeded randomness
    pub fn new(store: Box<dyn DeviceStore>) -> Self {
        Self::with_injector(store, FaultInjector::new())
    }

    /// Create a simulator with a given fault injector
    pub fn with_injector(store: Box<dyn DeviceStore>, faults: FaultInjector) -> Self {
        Self {
            store,
            faults,
            sequences: SequenceCounters::new(),
            event_buffer: Vec::new(),
        }
    }

    /// Read access to the store
    pub fn store(&self) -> &dyn DeviceStore {
        self.store.as_ref()
    }

    /// Write access to the store
    pub fn store_mut(&mut self) -> &mut dyn DeviceStore {
        self.store.as_mut()
    }

    /// Sequence counters for originated frames
    pub fn sequences_mut(&mut self) -> &mut SequenceCounters {
        &mut self.sequences
    }

    /// Take buffered notifications
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    /// Run one inbound frame through the fault gates and command handlers
    pub fn handle_frame(&mut self, parsed: &ParsedFrame, remote_addr: &str) -> Dispatch {
        if !parsed.is_send() {
            debug!("Ignoring ack frame from {}: {}", remote_addr, parsed.raw);
            return Dispatch::ignored();
        }
        if !parsed.valid {
            debug!("Checksum mismatch, dispatching anyway: {}", parsed.raw);
        }

        let frame = &parsed.frame;

        if self.fault_fires(FaultType::PacketLoss, frame) {
            info!("Packet dropped (packet_loss): {}", parsed.raw);
            self.log_rx(remote_addr, parsed, Outcome::Dropped);
            return Dispatch::dropped(Outcome::Dropped, None);
        }

        let delay = self
            .enabled_rule(FaultType::Latency)
            .and_then(|rule| self.faults.latency(&rule));
        if let Some(delay) = delay {
            debug!("Delaying response to {} by {:?}", frame.cmd, delay);
        }

        let device = match self.store.find_device(&frame.dst) {
            Ok(device) => device,
            Err(e) => {
                warn!("Device lookup for {} failed: {}", frame.dst, e);
                None
            }
        };

        if self.fault_fires(FaultType::DeviceOffline, frame) {
            info!("Device {} offline (device_offline)", frame.dst);
            self.log_rx(remote_addr, parsed, Outcome::DeviceOffline);
            return Dispatch::dropped(Outcome::DeviceOffline, delay);
        }

        if self.fault_fires(FaultType::AckTimeout, frame) {
            info!("ACK for {} withheld (ack_timeout)", frame.cmd);
            self.log_rx(remote_addr, parsed, Outcome::AckTimeout);
            return Dispatch::dropped(Outcome::AckTimeout, delay);
        }

        self.log_rx(remote_addr, parsed, Outcome::Ok);

        let ack = self.execute(frame, device.as_ref());
        Dispatch {
            responses: vec![ack],
            delay,
            outcome: Some(Outcome::Ok),
        }
    }

    fn execute(&mut self, frame: &Frame, device: Option<&Device>) -> Frame {
        let addr = frame.dst.as_str();
        let cmd = frame.cmd.as_str();

        match Command::classify(cmd) {
            Command::Heartbeat => frame.ack(Some("1")),

            Command::Identify => {
                let id = device
                    .and_then(|d| d.device_id.as_deref())
                    .filter(|id| !id.is_empty())
                    .unwrap_or("00000");
                frame.ack(Some(id))
            }

            Command::Status => {
                let online = device.is_some_and(|d| d.online);
                frame.ack(Some(if online { "1" } else { "0" }))
            }

            Command::GetInputs => {
                let mask = device.map_or(0, Device::input_bitmask);
                frame.ack(Some(mask.to_string().as_str()))
            }

            Command::InputLimits => frame.ack(Some(INPUT_LIMIT_MASK)),

            Command::ProgrammingMode => {
                if device.is_some() {
                    let enabled = frame.val == "1";
                    self.store_write(addr, |s| s.set_programming_mode(addr, enabled));
                    info!(
                        "Device {} programming mode: {}",
                        addr,
                        if enabled { "ON" } else { "OFF" }
                    );
                }
                frame.ack(None)
            }

            Command::Program => {
                if device.is_some() {
                    self.store_write(addr, |s| s.upsert_programming(addr, cmd, &frame.val));
                    debug!("Device {} programmed: {}={}", addr, cmd, frame.val);
                }
                frame.ack(None)
            }

            Command::InputRead => {
                let value = self.read_value(device, cmd, "0");
                frame.ack(Some(value.as_str()))
            }

            Command::OutputWrite => {
                if device.is_some() {
                    self.store_write(addr, |s| {
                        s.set_property(addr, PropertySelector::WriteCmd(cmd), &frame.val)
                    });
                    debug!("Device {} output {}={}", addr, cmd, frame.val);
                    self.event_buffer.push(SimEvent::DeviceUpdate {
                        device_addr: addr.to_string(),
                        cmd: cmd.to_string(),
                        value: frame.val.clone(),
                    });
                }
                frame.ack(None)
            }

            Command::Dimmer(channel) => {
                if let Some(device) = device {
                    let key = format!("brightness_{channel}");
                    let selector = if device.property(PropertySelector::WriteCmd(cmd)).is_some() {
                        PropertySelector::WriteCmd(cmd)
                    } else {
                        PropertySelector::Key(&key)
                    };
                    self.store_write(addr, |s| s.set_property(addr, selector, &frame.val));
                    debug!("Device {} dimmer {}={}", addr, cmd, frame.val);
                }
                frame.ack(None)
            }

            Command::TemperatureRead => {
                let value = self.read_value(device, cmd, "0.0");
                frame.ack(Some(value.as_str()))
            }

            Command::LedWrite => {
                if device.is_some() {
                    self.store_write(addr, |s| {
                        s.set_property(addr, PropertySelector::WriteCmd(cmd), &frame.val)
                    });
                    debug!("Device {} LED/position {}={}", addr, cmd, frame.val);
                }
                frame.ack(None)
            }

            Command::Unknown => {
                debug!("Unknown command {}, acknowledging", cmd);
                frame.ack(None)
            }
        }
    }

    /// Build the next unsolicited frame for a push event
    pub fn push_frame(&mut self, spec: &PushEventSpec) -> Frame {
        let value = match spec.value_generator {
            ValueGenerator::Toggle => self.toggle(&spec.device_addr, &spec.cmd),
            ValueGenerator::Random => {
                let min = spec.min_value.unwrap_or(0);
                let max = spec.max_value.unwrap_or(1);
                self.faults.random_in_range(min, max).to_string()
            }
            ValueGenerator::Fixed => spec.fixed_value.clone().unwrap_or_else(|| "1".to_string()),
            ValueGenerator::Increment => {
                debug!("increment generator has no state, using 0");
                "0".to_string()
            }
        };

        let id = self.sequences.next(&spec.device_addr);
        debug!("Push event: {}={} from {}", spec.cmd, value, spec.device_addr);
        Frame::send(&spec.cmd, value, &spec.device_addr, "0", id)
    }

    fn toggle(&mut self, addr: &str, cmd: &str) -> String {
        match self.store.find_device(addr) {
            Ok(Some(_)) => {}
            Ok(None) => return "0".to_string(),
            Err(e) => {
                warn!("Device lookup for {} failed: {}", addr, e);
                return "0".to_string();
            }
        }

        let current = self
            .store
            .get_property(addr, PropertySelector::ReadCmd(cmd))
            .unwrap_or_else(|e| {
                warn!("Reading {} on {} failed: {}", cmd, addr, e);
                None
            });
        let value = if current.as_deref() == Some("1") { "0" } else { "1" };
        self.store_write(addr, |s| s.set_property(addr, PropertySelector::ReadCmd(cmd), value));
        value.to_string()
    }

    /// Set a property from outside the bus, by read/write command or key
    pub fn set_property(&mut self, addr: &str, cmd_or_key: &str, value: &str) -> Result<(), StoreError> {
        let mut changed = self
            .store
            .set_property(addr, PropertySelector::AnyCmd(cmd_or_key), value)?;
        if changed == 0 {
            changed = self
                .store
                .set_property(addr, PropertySelector::Key(cmd_or_key), value)?;
        }
        if changed == 0 {
            return Err(StoreError::PropertyNotFound {
                address: addr.to_string(),
                property: cmd_or_key.to_string(),
            });
        }

        info!("Device {} property {} set to {}", addr, cmd_or_key, value);
        self.event_buffer.push(SimEvent::DeviceUpdate {
            device_addr: addr.to_string(),
            cmd: cmd_or_key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Set a device's programming-mode flag from outside the bus
    pub fn set_programming_mode(&mut self, addr: &str, enabled: bool) -> Result<(), StoreError> {
        self.store.set_programming_mode(addr, enabled)?;
        info!("Device {} programming mode set to {}", addr, enabled);
        Ok(())
    }

    /// Set a device's online flag from outside the bus
    pub fn set_online(&mut self, addr: &str, online: bool) -> Result<(), StoreError> {
        self.store.set_online(addr, online)?;
        info!("Device {} online set to {}", addr, online);
        Ok(())
    }

    /// Make a scenario exclusively active and apply its fault overrides
    ///
    /// Overrides are validated first; a scenario with invalid overrides
    /// leaves the active scenario and the fault table untouched.
    pub fn activate_scenario(&mut self, name: &str) -> Result<Scenario, StoreError> {
        let candidate = self
            .store
            .list_scenarios()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StoreError::ScenarioNotFound(name.to_string()))?;
        candidate.definition.validate()?;

        let scenario = self.store.activate_scenario(name)?;
        self.apply_overrides(&scenario)?;
        info!("Scenario '{}' activated", scenario.name);
        Ok(scenario)
    }

    /// Upsert a scenario's fault overrides into the fault table
    pub fn apply_overrides(&mut self, scenario: &Scenario) -> Result<(), StoreError> {
        for o in &scenario.definition.fault_overrides {
            self.store.upsert_fault(FaultRule::from(o))?;
            debug!(
                "Scenario '{}' sets {} enabled={}",
                scenario.name, o.fault_type, o.enabled
            );
        }
        Ok(())
    }

    /// Log enabled fault types that dispatch does not consult
    pub fn warn_reserved_faults(&self) {
        match self.store.list_faults() {
            Ok(rules) => {
                for rule in rules
                    .iter()
                    .filter(|r| r.enabled && r.fault_type.is_reserved())
                {
                    warn!(
                        "Fault {} is enabled but not simulated; ignoring it",
                        rule.fault_type
                    );
                }
            }
            Err(e) => warn!("Listing faults failed: {}", e),
        }
    }

    fn enabled_rule(&self, fault_type: FaultType) -> Option<FaultRule> {
        self.store.enabled_fault(fault_type).unwrap_or_else(|e| {
            warn!("Reading {} fault failed: {}", fault_type, e);
            None
        })
    }

    fn fault_fires(&mut self, fault_type: FaultType, frame: &Frame) -> bool {
        match self.enabled_rule(fault_type) {
            Some(rule) => self.faults.fires(&rule, &frame.cmd, &frame.dst),
            None => false,
        }
    }

    fn read_value(&self, device: Option<&Device>, cmd: &str, default: &str) -> String {
        device
            .and_then(|d| d.property(PropertySelector::ReadCmd(cmd)))
            .map(|p| p.current_value.as_str())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    fn store_write<T>(
        &mut self,
        addr: &str,
        op: impl FnOnce(&mut dyn DeviceStore) -> Result<T, StoreError>,
    ) {
        if let Err(e) = op(self.store.as_mut()) {
            warn!("Store write for device {} failed: {}", addr, e);
        }
    }

    fn log_rx(&mut self, remote_addr: &str, parsed: &ParsedFrame, outcome: Outcome) {
        let record = EventRecord::rx(remote_addr, &parsed.raw, Some(parsed.frame.clone()), outcome);
        if let Err(e) = self.store.append_event(record) {
            warn!("Failed to log event: {}", e);
        }
    }
}
