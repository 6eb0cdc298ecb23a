//! Fault injection
//!
//! Faults simulate an imperfect bus: dropped packets, silent devices, missing
//! ACKs and slow responses. Each fault type has at most one rule. A rule only
//! applies while enabled, and then only when its probability check fires and
//! its target filters (if any) match.

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kinds of injectable faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Delay responses by `delayMs + random(0..jitterMs)`
    Latency,
    /// Drop inbound frames with `probability`
    PacketLoss,
    /// Corrupt checksums (reserved, not consulted by dispatch)
    BadCrc,
    /// Swallow the ACK with `probability`, optionally only for `targetCmd`
    AckTimeout,
    /// Make `targetDevice` (or every device) silent
    DeviceOffline,
    /// Flip inputs on a timer (reserved, not consulted by dispatch)
    NoisyInputs,
}

impl FaultType {
    /// All fault types
    pub const ALL: [FaultType; 6] = [
        FaultType::Latency,
        FaultType::PacketLoss,
        FaultType::BadCrc,
        FaultType::AckTimeout,
        FaultType::DeviceOffline,
        FaultType::NoisyInputs,
    ];

    /// Wire/config name
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::Latency => "latency",
            FaultType::PacketLoss => "packet_loss",
            FaultType::BadCrc => "bad_crc",
            FaultType::AckTimeout => "ack_timeout",
            FaultType::DeviceOffline => "device_offline",
            FaultType::NoisyInputs => "noisy_inputs",
        }
    }

    /// Whether dispatch consults this fault type
    pub fn is_reserved(&self) -> bool {
        matches!(self, FaultType::BadCrc | FaultType::NoisyInputs)
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Invalid fault parameters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FaultError {
    /// Probability outside `0.0..=1.0`
    #[error("probability {0} outside 0.0..=1.0")]
    InvalidProbability(f64),
}

/// Parameters for a fault rule; which fields matter depends on the type
///
/// A missing (or `null`) target filter means "applies to everything".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultParams {
    /// Chance in `0.0..=1.0` that the fault fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    /// Base latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Extra random latency, `0..jitterMs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<u64>,
    /// Only apply to this command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cmd: Option<String>,
    /// Only apply to this device address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device: Option<String>,
    /// Timer period for `noisy_inputs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Inputs touched by `noisy_inputs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,
}

impl FaultParams {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), FaultError> {
        match self.probability {
            Some(p) if !(0.0..=1.0).contains(&p) => Err(FaultError::InvalidProbability(p)),
            _ => Ok(()),
        }
    }
}

/// One configured fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRule {
    /// Fault type; unique across the store
    #[serde(rename = "type")]
    pub fault_type: FaultType,
    /// Only enabled rules are evaluated
    #[serde(default)]
    pub enabled: bool,
    /// Type-specific parameters
    #[serde(default)]
    pub params: FaultParams,
}

impl FaultRule {
    /// Create a rule, validating its parameters
    pub fn new(fault_type: FaultType, enabled: bool, params: FaultParams) -> Result<Self, FaultError> {
        params.validate()?;
        Ok(Self {
            fault_type,
            enabled,
            params,
        })
    }

    /// Whether the target filters admit this command/device pair
    ///
    /// An empty filter string counts as no filter.
    pub fn targets(&self, cmd: &str, device: &str) -> bool {
        filter_admits(self.params.target_cmd.as_deref(), cmd)
            && filter_admits(self.params.target_device.as_deref(), device)
    }
}

fn filter_admits(filter: Option<&str>, value: &str) -> bool {
    match filter {
        None | Some("") => true,
        Some(target) => target == value,
    }
}

/// Evaluates fault rules against a source of randomness
#[derive(Debug)]
pub struct FaultInjector {
    rng: StdRng,
}

impl FaultInjector {
    /// Create an injector seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an injector with a deterministic seed
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Create an injector with a given generator
    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Whether `rule` fires for a frame with this command and destination
    ///
    /// Disabled rules never fire. A probability-bearing rule draws a uniform
    /// value in `[0, 1)` and fires iff the draw is below the probability.
    pub fn fires(&mut self, rule: &FaultRule, cmd: &str, device: &str) -> bool {
        if !rule.enabled {
            return false;
        }
        if let Some(probability) = rule.params.probability {
            let draw: f64 = self.rng.gen();
            if draw >= probability {
                return false;
            }
        }
        rule.targets(cmd, device)
    }

    /// Latency for an enabled `latency` rule: `delayMs + random(0..jitterMs)`
    pub fn latency(&mut self, rule: &FaultRule) -> Option<Duration> {
        if !rule.enabled {
            return None;
        }
        let base = rule.params.delay_ms.unwrap_or(0);
        let jitter = match rule.params.jitter_ms.unwrap_or(0) {
            0 => 0,
            j => self.rng.gen_range(0..j),
        };
        match base + jitter {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Uniform integer in `min..=max`
    pub fn random_in_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}
