//! Simulated field device records
//!
//! A device is addressed by its node address (the `DST` of inbound frames).
//! It owns its properties and programming values; both go away with it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of value a property holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `0` / `1`
    Bool,
    /// Decimal integer
    Int,
    /// Decimal float, e.g. `21.5`
    Float,
    /// Free text
    #[default]
    String,
}

/// A readable (and optionally writable) value on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Property key, unique within the device
    pub key: String,
    /// Command that reads this property, e.g. `I.0`, `T.1`
    pub cmd_read: String,
    /// Command that writes this property, e.g. `O.3`
    #[serde(default)]
    pub cmd_write: Option<String>,
    /// Value kind
    #[serde(default)]
    pub value_type: ValueKind,
    /// Current value as carried on the wire
    #[serde(default)]
    pub current_value: String,
}

impl Property {
    /// Create a read-only property
    pub fn read_only(
        key: impl Into<String>,
        cmd_read: impl Into<String>,
        value_type: ValueKind,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            cmd_read: cmd_read.into(),
            cmd_write: None,
            value_type,
            current_value: value.into(),
        }
    }

    /// Create a property readable and writable through the same command
    pub fn read_write(
        key: impl Into<String>,
        cmd: impl Into<String>,
        value_type: ValueKind,
        value: impl Into<String>,
    ) -> Self {
        let cmd = cmd.into();
        Self {
            key: key.into(),
            cmd_read: cmd.clone(),
            cmd_write: Some(cmd),
            value_type,
            current_value: value.into(),
        }
    }

    /// Whether this property is read by an `I.*` command
    pub fn is_input(&self) -> bool {
        self.cmd_read.starts_with("I.")
    }
}

/// How to locate a property on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySelector<'a> {
    /// By property key
    Key(&'a str),
    /// By read command
    ReadCmd(&'a str),
    /// By write command
    WriteCmd(&'a str),
    /// By read or write command
    AnyCmd(&'a str),
}

impl PropertySelector<'_> {
    /// Whether the property matches this selector
    pub fn matches(&self, property: &Property) -> bool {
        match *self {
            PropertySelector::Key(key) => property.key == key,
            PropertySelector::ReadCmd(cmd) => property.cmd_read == cmd,
            PropertySelector::WriteCmd(cmd) => property.cmd_write.as_deref() == Some(cmd),
            PropertySelector::AnyCmd(cmd) => {
                property.cmd_read == cmd || property.cmd_write.as_deref() == Some(cmd)
            }
        }
    }
}

/// A simulated field device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Display name
    pub name: String,
    /// Node address; unique across the store
    #[serde(alias = "nodeAddr")]
    pub address: String,
    /// Device type tag (`O`, `I`, `B`, `T`, ...)
    pub device_type: String,
    /// Identifier reported by `ID.0`
    #[serde(default)]
    pub device_id: Option<String>,
    /// Reported by `S.0`
    #[serde(default = "default_online")]
    pub online: bool,
    /// Set by `PG`
    #[serde(default)]
    pub programming_mode: bool,
    /// Properties, owned by this device
    #[serde(default)]
    pub properties: Vec<Property>,
    /// Programming (EEPROM) values keyed by command
    #[serde(default)]
    pub programming: BTreeMap<String, String>,
}

fn default_online() -> bool {
    true
}

impl Device {
    /// Create an online device with no properties
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            device_type: device_type.into(),
            device_id: None,
            online: true,
            programming_mode: false,
            properties: Vec::new(),
            programming: BTreeMap::new(),
        }
    }

    /// Set the identifier reported by `ID.0`
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Add a property
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a programming value
    pub fn with_programming(mut self, cmd: impl Into<String>, val: impl Into<String>) -> Self {
        self.programming.insert(cmd.into(), val.into());
        self
    }

    /// Find the first property matching a selector
    pub fn property(&self, selector: PropertySelector<'_>) -> Option<&Property> {
        self.properties.iter().find(|p| selector.matches(p))
    }

    /// Set every property matching a selector; returns how many changed
    pub fn set_property(&mut self, selector: PropertySelector<'_>, value: &str) -> usize {
        let mut count = 0;
        for property in self.properties.iter_mut().filter(|p| selector.matches(p)) {
            property.current_value = value.to_string();
            count += 1;
        }
        count
    }

    /// Input properties ordered ascending by read command
    pub fn inputs(&self) -> Vec<&Property> {
        let mut inputs: Vec<&Property> = self.properties.iter().filter(|p| p.is_input()).collect();
        inputs.sort_by(|a, b| a.cmd_read.cmp(&b.cmd_read));
        inputs
    }

    /// Bitmask of inputs whose value is `1`, bit i for the i-th input in read-command order
    pub fn input_bitmask(&self) -> u64 {
        self.inputs()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.current_value == "1")
            .fold(0u64, |mask, (idx, _)| {
                mask | 1u64.checked_shl(idx as u32).unwrap_or(0)
            })
    }
}
