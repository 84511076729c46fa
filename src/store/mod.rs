//! # Credential Store
//!
//! Durable key-value storage for the device identity and saved network
//! credentials. Everything lives in a single TOML file (`device.toml`) under
//! the data directory, the host-side equivalent of a namespaced NVS partition.
//!
//! ## Failure policy
//! Reads never surface errors to callers: a missing, unreadable or malformed
//! file is treated as "nothing saved yet" and the compiled default identity is
//! substituted. Writes go through a sibling temp file plus an atomic rename so
//! a partial write can never be observed by the next read.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

const DEVICE_FILE: &str = "device.toml";
const COMMAND_TOPIC_PREFIX: &str = "devices";
const COMMAND_TOPIC_SUFFIX: &str = "commands";

/// Process-lifetime device identity, derived once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub command_topic: String,
}

impl DeviceIdentity {
    fn from_id(id: String) -> Self {
        let command_topic = format!("{COMMAND_TOPIC_PREFIX}/{id}/{COMMAND_TOPIC_SUFFIX}");
        Self { id, command_topic }
    }
}

/// Saved network credentials. Zeroed in memory on drop; an empty ssid means
/// "no credentials" and triggers provisioning.
#[derive(Clone, Debug, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub ssid: String,
    pub pass: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to serialize device file: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write device file: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk layout of `device.toml`.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
struct DeviceFile {
    identity: IdentitySection,
    wifi: WifiSection,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
struct IdentitySection {
    id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
struct WifiSection {
    ssid: String,
    pass: String,
}

pub struct CredentialStore {
    path: PathBuf,
    default_id: String,
}

impl CredentialStore {
    pub fn new(data_dir: &Path, default_id: &str) -> Self {
        Self {
            path: data_dir.join(DEVICE_FILE),
            default_id: default_id.to_string(),
        }
    }

    /// Loads the device identity. Never fails observably: any read or parse
    /// error falls back to the compiled default id.
    pub fn load_identity(&self) -> DeviceIdentity {
        let file = self.read_file();
        let id = if file.identity.id.is_empty() {
            info!("No stored identity, using default {}", self.default_id);
            self.default_id.clone()
        } else {
            file.identity.id
        };
        DeviceIdentity::from_id(id)
    }

    /// Loads saved credentials, `None` when nothing usable is stored.
    pub fn load_credentials(&self) -> Option<Credentials> {
        let file = self.read_file();
        if file.wifi.ssid.is_empty() {
            return None;
        }
        Some(Credentials {
            ssid: file.wifi.ssid,
            pass: file.wifi.pass,
        })
    }

    /// Persists credentials atomically: serialize to `device.toml.tmp`, then
    /// rename over the live file. The stored identity is preserved.
    pub fn save_credentials(&self, credentials: &Credentials) -> Result<(), StorageError> {
        let mut file = self.read_file();
        file.wifi.ssid = credentials.ssid.clone();
        file.wifi.pass = credentials.pass.clone();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let raw = toml::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;

        info!("Saved credentials for network '{}'", credentials.ssid);
        Ok(())
    }

    fn read_file(&self) -> DeviceFile {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Malformed device file {}: {}", self.path.display(), e);
                    DeviceFile::default()
                }
            },
            Err(_) => DeviceFile::default(),
        }
    }
}
