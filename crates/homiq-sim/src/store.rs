//! Device state store
//!
//! The simulator reads and writes all device, fault and scenario state
//! through [`DeviceStore`]. [`MemoryStore`] is the built-in implementation;
//! it can start from the stock seed data or from a JSON fixture.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use homiq_protocol::Frame;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::device::{Device, Property, PropertySelector, ValueKind};
use crate::error::StoreError;
use crate::fault::{FaultParams, FaultRule, FaultType};
use crate::scenario::{FaultOverride, PushEventSpec, Scenario, ScenarioDefinition, ValueGenerator};

/// Default number of event records kept by [`MemoryStore`]
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Direction of a logged frame, relative to the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from a client
    Rx,
    /// Sent to a client
    Tx,
}

/// What happened to a logged frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Dispatched normally
    Ok,
    /// Swallowed by `packet_loss`, or not delivered because the client's
    /// outbound queue was full
    Dropped,
    /// Swallowed by `device_offline`
    DeviceOffline,
    /// Swallowed by `ack_timeout`
    AckTimeout,
}

/// One append-only event log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Rx or Tx
    pub direction: Direction,
    /// Peer address
    pub remote_addr: String,
    /// Frame as received or sent
    pub raw_frame: String,
    /// Frame fields, if the frame parsed
    pub parsed: Option<Frame>,
    /// What happened
    pub outcome: Outcome,
}

impl EventRecord {
    /// Record a received frame now
    pub fn rx(remote_addr: &str, raw_frame: &str, parsed: Option<Frame>, outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: Direction::Rx,
            remote_addr: remote_addr.to_string(),
            raw_frame: raw_frame.to_string(),
            parsed,
            outcome,
        }
    }

    /// Record a sent frame now
    pub fn tx(remote_addr: &str, raw_frame: &str, parsed: Option<Frame>, outcome: Outcome) -> Self {
        Self {
            direction: Direction::Tx,
            ..Self::rx(remote_addr, raw_frame, parsed, outcome)
        }
    }
}

/// Storage interface the simulator consumes
///
/// Every operation may fail; callers in the frame path log the failure and
/// carry on with default values.
pub trait DeviceStore: Send {
    /// Look up a device by node address
    fn find_device(&self, address: &str) -> Result<Option<Device>, StoreError>;

    /// All devices, ordered by address
    fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Add a device; its address must be unused
    fn add_device(&mut self, device: Device) -> Result<(), StoreError>;

    /// Remove a device together with its properties and programming values
    fn remove_device(&mut self, address: &str) -> Result<Device, StoreError>;

    /// Current value of the first matching property
    fn get_property(
        &self,
        address: &str,
        selector: PropertySelector<'_>,
    ) -> Result<Option<String>, StoreError>;

    /// Set every matching property; returns how many matched
    fn set_property(
        &mut self,
        address: &str,
        selector: PropertySelector<'_>,
        value: &str,
    ) -> Result<usize, StoreError>;

    /// Insert or replace a programming value
    fn upsert_programming(&mut self, address: &str, cmd: &str, val: &str) -> Result<(), StoreError>;

    /// Set the programming-mode flag
    fn set_programming_mode(&mut self, address: &str, enabled: bool) -> Result<(), StoreError>;

    /// Set the online flag reported by `S.0`
    fn set_online(&mut self, address: &str, online: bool) -> Result<(), StoreError>;

    /// The rule for `fault_type`, only if it is enabled
    fn enabled_fault(&self, fault_type: FaultType) -> Result<Option<FaultRule>, StoreError>;

    /// Insert or replace the rule for its fault type
    fn upsert_fault(&mut self, rule: FaultRule) -> Result<(), StoreError>;

    /// All fault rules
    fn list_faults(&self) -> Result<Vec<FaultRule>, StoreError>;

    /// The active scenario, if any
    fn active_scenario(&self) -> Result<Option<Scenario>, StoreError>;

    /// Make `name` the only active scenario and return it
    fn activate_scenario(&mut self, name: &str) -> Result<Scenario, StoreError>;

    /// All scenarios
    fn list_scenarios(&self) -> Result<Vec<Scenario>, StoreError>;

    /// Append to the event log
    fn append_event(&mut self, record: EventRecord) -> Result<(), StoreError>;

    /// Up to `limit` most recent events, oldest first
    fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError>;
}

/// JSON shape of a fixture file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    /// Devices with their properties and programming values
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Fault rules
    #[serde(default)]
    pub faults: Vec<FaultRule>,
    /// Scenarios
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

/// In-memory [`DeviceStore`]
#[derive(Debug)]
pub struct MemoryStore {
    devices: BTreeMap<String, Device>,
    faults: BTreeMap<FaultType, FaultRule>,
    scenarios: Vec<Scenario>,
    events: VecDeque<EventRecord>,
    event_capacity: usize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            faults: BTreeMap::new(),
            scenarios: Vec::new(),
            events: VecDeque::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Limit the event log to `capacity` records
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        while self.events.len() > capacity {
            self.events.pop_front();
        }
        self
    }

    /// Create a store holding the stock devices, faults and scenarios
    pub fn seeded() -> Self {
        let mut store = Self::new();
        for device in seed_devices() {
            store.devices.insert(device.address.clone(), device);
        }
        for rule in seed_faults() {
            store.faults.insert(rule.fault_type, rule);
        }
        store.scenarios = seed_scenarios();
        store
    }

    /// Build a store from fixture contents
    pub fn from_fixture(fixture: Fixture) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for device in fixture.devices {
            store.add_device(device)?;
        }
        for rule in fixture.faults {
            store.upsert_fault(rule)?;
        }

        let mut seen_active = false;
        for mut scenario in fixture.scenarios {
            scenario.definition.validate()?;
            if scenario.enabled && seen_active {
                warn!(
                    "Scenario '{}' marked active but another already is; deactivating",
                    scenario.name
                );
                scenario.enabled = false;
            }
            seen_active |= scenario.enabled;
            store.scenarios.push(scenario);
        }
        Ok(store)
    }

    /// Parse fixture JSON
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let fixture: Fixture = serde_json::from_str(json)?;
        Self::from_fixture(fixture)
    }

    /// Load a fixture file
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        let store = Self::from_json(&contents)?;
        info!(
            "Loaded fixture {}: {} devices, {} faults, {} scenarios",
            path.display(),
            store.devices.len(),
            store.faults.len(),
            store.scenarios.len()
        );
        Ok(store)
    }

    fn device_mut(&mut self, address: &str) -> Result<&mut Device, StoreError> {
        self.devices
            .get_mut(address)
            .ok_or_else(|| StoreError::DeviceNotFound(address.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore for MemoryStore {
    fn find_device(&self, address: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.get(address).cloned())
    }

    fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.values().cloned().collect())
    }

    fn add_device(&mut self, device: Device) -> Result<(), StoreError> {
        if self.devices.contains_key(&device.address) {
            return Err(StoreError::DuplicateAddress(device.address));
        }
        self.devices.insert(device.address.clone(), device);
        Ok(())
    }

    fn remove_device(&mut self, address: &str) -> Result<Device, StoreError> {
        self.devices
            .remove(address)
            .ok_or_else(|| StoreError::DeviceNotFound(address.to_string()))
    }

    fn get_property(
        &self,
        address: &str,
        selector: PropertySelector<'_>,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .devices
            .get(address)
            .and_then(|d| d.property(selector))
            .map(|p| p.current_value.clone()))
    }

    fn set_property(
        &mut self,
        address: &str,
        selector: PropertySelector<'_>,
        value: &str,
    ) -> Result<usize, StoreError> {
        Ok(self.device_mut(address)?.set_property(selector, value))
    }

    fn upsert_programming(&mut self, address: &str, cmd: &str, val: &str) -> Result<(), StoreError> {
        self.device_mut(address)?
            .programming
            .insert(cmd.to_string(), val.to_string());
        Ok(())
    }

    fn set_programming_mode(&mut self, address: &str, enabled: bool) -> Result<(), StoreError> {
        self.device_mut(address)?.programming_mode = enabled;
        Ok(())
    }

    fn set_online(&mut self, address: &str, online: bool) -> Result<(), StoreError> {
        self.device_mut(address)?.online = online;
        Ok(())
    }

    fn enabled_fault(&self, fault_type: FaultType) -> Result<Option<FaultRule>, StoreError> {
        Ok(self.faults.get(&fault_type).filter(|r| r.enabled).cloned())
    }

    fn upsert_fault(&mut self, rule: FaultRule) -> Result<(), StoreError> {
        rule.params.validate()?;
        self.faults.insert(rule.fault_type, rule);
        Ok(())
    }

    fn list_faults(&self) -> Result<Vec<FaultRule>, StoreError> {
        Ok(self.faults.values().cloned().collect())
    }

    fn active_scenario(&self) -> Result<Option<Scenario>, StoreError> {
        Ok(self.scenarios.iter().find(|s| s.enabled).cloned())
    }

    fn activate_scenario(&mut self, name: &str) -> Result<Scenario, StoreError> {
        let target = self
            .scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StoreError::ScenarioNotFound(name.to_string()))?;
        target.definition.validate()?;

        for scenario in &mut self.scenarios {
            scenario.enabled = scenario.name == name;
        }
        self.active_scenario()?
            .ok_or_else(|| StoreError::ScenarioNotFound(name.to_string()))
    }

    fn list_scenarios(&self) -> Result<Vec<Scenario>, StoreError> {
        Ok(self.scenarios.clone())
    }

    fn append_event(&mut self, record: EventRecord) -> Result<(), StoreError> {
        if self.event_capacity == 0 {
            return Ok(());
        }
        if self.events.len() == self.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(record);
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        let skip = self.events.len().saturating_sub(limit);
        Ok(self.events.iter().skip(skip).cloned().collect())
    }
}

fn output_module(name: &str, address: &str, device_id: &str, outputs: usize) -> Device {
    (0..outputs).fold(
        Device::new(name, address, "O").with_device_id(device_id),
        |dev, i| {
            let cmd = format!("O.{i}");
            dev.with_property(Property::read_write(&cmd, &cmd, ValueKind::Bool, "0"))
                .with_programming(format!("ODS.{i}"), "0")
        },
    )
}

/// The stock device set
pub fn seed_devices() -> Vec<Device> {
    let inputs = (0..16).fold(
        Device::new("Living room inputs", "02", "I").with_device_id("00003"),
        |dev, i| {
            let cmd = format!("I.{i}");
            dev.with_property(Property::read_only(&cmd, &cmd, ValueKind::Bool, "0"))
                .with_programming(format!("IM.{i}"), "1")
                .with_programming(format!("II.{i}"), "1")
                .with_programming(format!("IOM.{i}"), "0")
        },
    );

    let dimmer = Device::new("Bedroom brightness", "03", "B")
        .with_device_id("00001")
        .with_property(Property::read_write("B1", "B1", ValueKind::Int, "0"))
        .with_property(Property::read_write("B2", "B2", ValueKind::Int, "0"));

    let thermo = [("T.0", "21.5"), ("T.1", "22.0"), ("T.2", "20.8")]
        .into_iter()
        .fold(
            Device::new("Kitchen temperature", "04", "T").with_device_id("00005"),
            |dev, (cmd, val)| dev.with_property(Property::read_only(cmd, cmd, ValueKind::Float, val)),
        );

    vec![
        output_module("Living room outputs", "01", "00003", 10),
        inputs,
        dimmer,
        thermo,
        output_module("Garage outputs", "05", "00007", 4),
    ]
}

/// The stock fault rules, all disabled
pub fn seed_faults() -> Vec<FaultRule> {
    let rule = |fault_type, params| FaultRule {
        fault_type,
        enabled: false,
        params,
    };
    vec![
        rule(
            FaultType::Latency,
            FaultParams {
                delay_ms: Some(100),
                jitter_ms: Some(50),
                ..Default::default()
            },
        ),
        rule(
            FaultType::PacketLoss,
            FaultParams {
                probability: Some(0.1),
                ..Default::default()
            },
        ),
        rule(
            FaultType::BadCrc,
            FaultParams {
                probability: Some(0.05),
                ..Default::default()
            },
        ),
        rule(
            FaultType::AckTimeout,
            FaultParams {
                probability: Some(0.1),
                ..Default::default()
            },
        ),
        rule(FaultType::DeviceOffline, FaultParams::default()),
        rule(
            FaultType::NoisyInputs,
            FaultParams {
                interval_ms: Some(5000),
                inputs: Some(vec!["I.0".into(), "I.1".into()]),
                ..Default::default()
            },
        ),
    ]
}

/// The stock scenarios; "Normal Operation" is active
pub fn seed_scenarios() -> Vec<Scenario> {
    let mut normal = Scenario::new("Normal Operation", ScenarioDefinition::default());
    normal.enabled = true;

    let stress = Scenario::new(
        "Stress Test",
        ScenarioDefinition {
            fault_overrides: vec![
                FaultOverride {
                    fault_type: FaultType::Latency,
                    enabled: true,
                    params: FaultParams {
                        delay_ms: Some(200),
                        ..Default::default()
                    },
                },
                FaultOverride {
                    fault_type: FaultType::PacketLoss,
                    enabled: true,
                    params: FaultParams {
                        probability: Some(0.05),
                        ..Default::default()
                    },
                },
            ],
            push_events: vec![PushEventSpec::new("I.0", "01", 2000, ValueGenerator::Toggle)],
        },
    );

    vec![normal, stress]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_shape() {
        let store = MemoryStore::seeded();
        let devices = store.list_devices().unwrap();
        let addrs: Vec<&str> = devices.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(addrs, vec!["01", "02", "03", "04", "05"]);
        assert_eq!(devices[0].properties.len(), 10);
        assert_eq!(devices[1].properties.len(), 16);
        assert_eq!(devices[1].programming.len(), 48);
        assert_eq!(devices[4].properties.len(), 4);

        assert_eq!(store.list_faults().unwrap().len(), 6);
        assert!(store.list_faults().unwrap().iter().all(|r| !r.enabled));

        let active = store.active_scenario().unwrap().unwrap();
        assert_eq!(active.name, "Normal Operation");
    }

    #[test]
    fn test_get_and_set_property() {
        let mut store = MemoryStore::seeded();
        assert_eq!(
            store.get_property("04", PropertySelector::ReadCmd("T.1")).unwrap(),
            Some("22.0".to_string())
        );
        assert_eq!(
            store.set_property("01", PropertySelector::WriteCmd("O.3"), "1").unwrap(),
            1
        );
        assert_eq!(
            store.get_property("01", PropertySelector::ReadCmd("O.3")).unwrap(),
            Some("1".to_string())
        );
    }

    #[test]
    fn test_set_property_unknown_device() {
        let mut store = MemoryStore::seeded();
        assert!(matches!(
            store.set_property("99", PropertySelector::Key("O.0"), "1"),
            Err(StoreError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_enabled_fault_only_when_enabled() {
        let mut store = MemoryStore::seeded();
        assert!(store.enabled_fault(FaultType::PacketLoss).unwrap().is_none());

        let mut rule = store.list_faults().unwrap()[1].clone();
        assert_eq!(rule.fault_type, FaultType::PacketLoss);
        rule.enabled = true;
        store.upsert_fault(rule).unwrap();
        assert!(store.enabled_fault(FaultType::PacketLoss).unwrap().is_some());
        assert_eq!(store.list_faults().unwrap().len(), 6);
    }

    #[test]
    fn test_activation_is_exclusive() {
        let mut store = MemoryStore::seeded();
        let active = store.activate_scenario("Stress Test").unwrap();
        assert_eq!(active.definition.push_events.len(), 1);

        let enabled: Vec<String> = store
            .list_scenarios()
            .unwrap()
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.name)
            .collect();
        assert_eq!(enabled, vec!["Stress Test".to_string()]);

        assert!(matches!(
            store.activate_scenario("Nope"),
            Err(StoreError::ScenarioNotFound(_))
        ));
        assert_eq!(
            store.active_scenario().unwrap().map(|s| s.name),
            Some("Stress Test".to_string())
        );
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut store = MemoryStore::seeded();
        let result = store.add_device(Device::new("Again", "01", "O"));
        assert!(matches!(result, Err(StoreError::DuplicateAddress(a)) if a == "01"));
    }

    #[test]
    fn test_remove_device_drops_owned_state() {
        let mut store = MemoryStore::seeded();
        let removed = store.remove_device("02").unwrap();
        assert_eq!(removed.properties.len(), 16);
        assert!(store.find_device("02").unwrap().is_none());
        assert_eq!(
            store.get_property("02", PropertySelector::ReadCmd("I.0")).unwrap(),
            None
        );
    }

    #[test]
    fn test_event_log_is_bounded() {
        let mut store = MemoryStore::new().with_event_capacity(3);
        for i in 0..5 {
            store
                .append_event(EventRecord::rx("peer", &format!("<{i}>"), None, Outcome::Ok))
                .unwrap();
        }
        let events = store.recent_events(10).unwrap();
        let raws: Vec<&str> = events.iter().map(|e| e.raw_frame.as_str()).collect();
        assert_eq!(raws, vec!["<2>", "<3>", "<4>"]);
        assert_eq!(store.recent_events(1).unwrap()[0].raw_frame, "<4>");
    }

    #[test]
    fn test_fixture_json() {
        let json = r#"{
            "devices": [
                {"name": "Relay", "address": "09", "deviceType": "O", "deviceId": "00042",
                 "properties": [{"key": "O.0", "cmdRead": "O.0", "cmdWrite": "O.0", "valueType": "bool", "currentValue": "1"}]}
            ],
            "faults": [{"type": "device_offline", "enabled": true, "params": {"targetDevice": "09"}}],
            "scenarios": [
                {"name": "A", "enabled": true},
                {"name": "B", "enabled": true}
            ]
        }"#;
        let store = MemoryStore::from_json(json).unwrap();
        let device = store.find_device("09").unwrap().unwrap();
        assert_eq!(device.device_id.as_deref(), Some("00042"));
        assert!(store.enabled_fault(FaultType::DeviceOffline).unwrap().is_some());
        assert_eq!(store.active_scenario().unwrap().unwrap().name, "A");
        assert_eq!(
            store.list_scenarios().unwrap().iter().filter(|s| s.enabled).count(),
            1
        );
    }

    #[test]
    fn test_fixture_rejects_bad_probability() {
        let json = r#"{"faults": [{"type": "packet_loss", "enabled": true, "params": {"probability": 2.0}}]}"#;
        assert!(matches!(
            MemoryStore::from_json(json),
            Err(StoreError::InvalidFault(_))
        ));
    }

    fn scenario_with_bad_override() -> Scenario {
        let definition: ScenarioDefinition = serde_json::from_str(
            r#"{"faults": [
                {"type": "latency", "enabled": true, "delayMs": 5},
                {"type": "packet_loss", "enabled": true, "probability": 2.0}
            ]}"#,
        )
        .unwrap();
        Scenario::new("Broken", definition)
    }

    #[test]
    fn test_fixture_rejects_bad_scenario_override() {
        let json = r#"{"scenarios": [
            {"name": "Broken", "definition": {"faults": [
                {"type": "packet_loss", "enabled": true, "probability": 2.0}
            ]}}
        ]}"#;
        assert!(matches!(
            MemoryStore::from_json(json),
            Err(StoreError::InvalidFault(_))
        ));
    }

    #[test]
    fn test_failed_activation_changes_nothing() {
        let mut store = MemoryStore::seeded();
        store.scenarios.push(scenario_with_bad_override());
        let faults_before = store.list_faults().unwrap();

        assert!(matches!(
            store.activate_scenario("Broken"),
            Err(StoreError::InvalidFault(_))
        ));
        assert_eq!(
            store.active_scenario().unwrap().unwrap().name,
            "Normal Operation"
        );

        let mut sim = crate::Simulator::new(Box::new(store));
        assert!(matches!(
            sim.activate_scenario("Broken"),
            Err(StoreError::InvalidFault(_))
        ));
        assert_eq!(
            sim.store().active_scenario().unwrap().unwrap().name,
            "Normal Operation"
        );
        assert_eq!(sim.store().list_faults().unwrap(), faults_before);
        assert!(sim.store().enabled_fault(FaultType::Latency).unwrap().is_none());
    }
}
