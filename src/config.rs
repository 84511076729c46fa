//! Application configuration loaded from a TOML file with compiled defaults.
//!
//! Configuration lives at `$XDG_CONFIG_HOME/moneybot/config.toml`. Every field
//! carries a default so a missing or partial file degrades to a working setup
//! instead of preventing startup. The file is read once at boot; runtime state
//! (credentials, identity) lives in the durable store, not here.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{info, warn};

const CONFIG_DIR: &str = "moneybot";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub broker: BrokerConfig,
    pub portal: PortalConfig,
    pub link: LinkConfig,
    pub store: StoreConfig,
}

/// Fallback identity used when the durable store has never been written.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct IdentityConfig {
    pub default_id: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_id: "moneybot-0001".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// PEM bundle for the broker's CA. The session manager refuses to start
    /// when this file is missing or implausibly small.
    pub ca_file: PathBuf,
    pub keep_alive_secs: u64,
    /// Pause between event-loop polls after a connection error.
    pub reconnect_pause_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.moneybot.example".to_string(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            ca_file: PathBuf::from("/etc/moneybot/broker-ca.pem"),
            keep_alive_secs: 5,
            reconnect_pause_secs: 5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct PortalConfig {
    /// Address handed out by the DNS responder and advertised on the form page.
    pub address: Ipv4Addr,
    pub dns_port: u16,
    pub http_port: u16,
    pub ap_ssid: String,
    pub ap_password: String,
    /// Delay between the success page and the restart, so the response can
    /// flush to the client.
    pub restart_grace_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::new(192, 168, 4, 1),
            dns_port: 53,
            http_port: 80,
            ap_ssid: "MoneyBot-Setup".to_string(),
            ap_password: "moneybot".to_string(),
            restart_grace_secs: 2,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct LinkConfig {
    /// Wireless interface handed to the backend.
    pub interface: String,
    pub max_retries: u8,
    pub connect_timeout_secs: u64,
    /// Interval of the connectivity poll that detects disassociation.
    pub monitor_interval_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            max_retries: 2,
            connect_timeout_secs: 15,
            monitor_interval_secs: 5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `device.toml`. Empty means the platform data dir.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads the configuration file, falling back to compiled defaults when it
    /// is absent or unreadable. A malformed file is logged and replaced by
    /// defaults rather than aborting startup.
    pub fn load() -> Self {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Malformed config {}: {} (using defaults)", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => {
                info!("No config at {}, using defaults", path.display());
                Config::default()
            }
        }
    }

    fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Resolved directory for the durable store.
    pub fn store_dir(&self) -> PathBuf {
        if self.store.data_dir.as_os_str().is_empty() {
            let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(CONFIG_DIR);
            path
        } else {
            self.store.data_dir.clone()
        }
    }
}
