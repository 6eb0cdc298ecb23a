//! Scenarios: named bundles of fault overrides and push events

use serde::{Deserialize, Serialize};

use crate::fault::{FaultError, FaultParams, FaultRule, FaultType};

/// A named scenario; at most one is active at a time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Unique name
    pub name: String,
    /// Whether this is the active scenario
    #[serde(default)]
    pub enabled: bool,
    /// What activating it does
    #[serde(default)]
    pub definition: ScenarioDefinition,
}

impl Scenario {
    /// Create an inactive scenario
    pub fn new(name: impl Into<String>, definition: ScenarioDefinition) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            definition,
        }
    }
}

/// Fault overrides and scheduled push events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    /// Fault rules upserted on activation
    #[serde(default, rename = "faults", alias = "faultOverrides")]
    pub fault_overrides: Vec<FaultOverride>,
    /// Unsolicited frames generated on timers
    #[serde(default)]
    pub push_events: Vec<PushEventSpec>,
}

impl ScenarioDefinition {
    /// Check every fault override's parameters
    pub fn validate(&self) -> Result<(), FaultError> {
        self.fault_overrides
            .iter()
            .try_for_each(|o| o.params.validate())
    }
}

/// A fault rule as written inside a scenario, params inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultOverride {
    /// Which rule to override
    #[serde(rename = "type")]
    pub fault_type: FaultType,
    /// New enabled flag
    #[serde(default)]
    pub enabled: bool,
    /// New parameters
    #[serde(flatten)]
    pub params: FaultParams,
}

impl From<&FaultOverride> for FaultRule {
    fn from(o: &FaultOverride) -> Self {
        FaultRule {
            fault_type: o.fault_type,
            enabled: o.enabled,
            params: o.params.clone(),
        }
    }
}

/// How a push event computes its value on each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueGenerator {
    /// Flip the stored property between `0` and `1`
    Toggle,
    /// Uniform integer in `[minValue, maxValue]`
    Random,
    /// Always `fixedValue`
    Fixed,
    /// Not implemented; yields `0`
    Increment,
}

/// One repeating unsolicited frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventSpec {
    /// Command carried by the frame
    pub cmd: String,
    /// Originating device; becomes `SRC`
    pub device_addr: String,
    /// Timer period
    pub interval_ms: u64,
    /// Value generator
    pub value_generator: ValueGenerator,
    /// Value for `fixed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<String>,
    /// Lower bound for `random`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    /// Upper bound for `random`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
}

impl PushEventSpec {
    /// Create a spec with no generator params
    pub fn new(
        cmd: impl Into<String>,
        device_addr: impl Into<String>,
        interval_ms: u64,
        value_generator: ValueGenerator,
    ) -> Self {
        Self {
            cmd: cmd.into(),
            device_addr: device_addr.into(),
            interval_ms,
            value_generator,
            fixed_value: None,
            min_value: None,
            max_value: None,
        }
    }
}
