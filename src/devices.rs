//! Device inventory.
//!
//! The inventory is a YAML file with a single top-level `devices` mapping:
//!
//! ```yaml
//! devices:
//!   core-sw1:
//!     device_type: cisco_ios   # optional, default cisco_ios
//!     host: 10.0.0.1
//!     username: admin
//!     password: secret
//!     port: 22                 # optional, default 22
//! ```
//!
//! It is loaded once in `main` and shared read-only (behind an `Arc`) for the
//! lifetime of the process. There is no hot-reload.

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigurationError;

pub const DEFAULT_DEVICE_TYPE: &str = "cisco_ios";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Connection profile for one managed device.
#[derive(Clone, Deserialize)]
pub struct DeviceRecord {
    #[serde(default = "default_device_type")]
    pub device_type: String,
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("device_type", &self.device_type)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

fn default_device_type() -> String {
    DEFAULT_DEVICE_TYPE.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Accept `port: 22` as well as `port: "22"`.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u64),
        Text(String),
    }

    let raw = match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => n,
        PortValue::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{s}'")))?,
    };
    u16::try_from(raw).map_err(|_| serde::de::Error::custom(format!("port {raw} out of range")))
}

/// Raw shape of the inventory file.
#[derive(Deserialize)]
struct InventoryFile {
    #[serde(default)]
    devices: Option<IndexMap<String, DeviceRecord>>,
}

/// Immutable mapping of device name to [`DeviceRecord`], in file order.
#[derive(Debug, Clone)]
pub struct Inventory {
    devices: IndexMap<String, DeviceRecord>,
}

impl Inventory {
    /// Parse inventory YAML. `path` is only used for error messages.
    pub fn from_yaml_str(contents: &str, path: &Path) -> Result<Self, ConfigurationError> {
        let missing = || ConfigurationError::MissingDevices {
            path: path.to_path_buf(),
        };

        if contents.trim().is_empty() {
            return Err(missing());
        }

        let file: Option<InventoryFile> =
            serde_yaml::from_str(contents).map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        match file.and_then(|f| f.devices) {
            Some(devices) if !devices.is_empty() => Ok(Self { devices }),
            _ => Err(missing()),
        }
    }

    /// Device names, in inventory order.
    pub fn names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices.get(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

impl FromIterator<(String, DeviceRecord)> for Inventory {
    fn from_iter<I: IntoIterator<Item = (String, DeviceRecord)>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

/// Read and validate the inventory file at `path`.
pub fn load_inventory(path: &Path) -> Result<Inventory, ConfigurationError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Inventory::from_yaml_str(&contents, path)
}
