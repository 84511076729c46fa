//! Network backend seam.
//!
//! The supervisor talks to the wireless layer exclusively through
//! [`LinkBackend`], which keeps the state machine testable and the platform
//! dependency in one place. The production implementation drives NetworkManager
//! through `nmcli`, the usual way to own wifi on the SBC images we ship.

use crate::store::Credentials;
use std::future::Future;
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    CommandFailed {
        command: &'static str,
        stderr: String,
    },
}

/// One network seen during the diagnostic scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanNetwork {
    pub ssid: String,
    /// Signal strength in percent as reported by the backend.
    pub signal: u8,
}

/// Wireless operations the supervisor needs. All attempts are initiated and
/// awaited by the caller, which also applies the bounded-wait policy.
pub trait LinkBackend: Send + 'static {
    /// Lists visible networks. Diagnostic only; failures are logged, never
    /// branched on.
    fn scan(&mut self) -> impl Future<Output = Result<Vec<ScanNetwork>, LinkError>> + Send;

    /// Associates with the stored network and waits for an address. Success
    /// means the network layer acquired connectivity.
    fn connect(
        &mut self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Switches the radio into AP mode for the provisioning portal.
    fn start_access_point(
        &mut self,
        ssid: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Connectivity poll used by the supervisor to detect disassociation.
    fn is_connected(&mut self) -> impl Future<Output = bool> + Send;
}

/// `nmcli`-backed implementation.
pub struct NmcliBackend {
    interface: String,
}

impl NmcliBackend {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }

    async fn run(command: &'static str, args: &[&str]) -> Result<Output, LinkError> {
        debug!("nmcli {}", args.join(" "));
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .map_err(|source| LinkError::Spawn { command, source })?;
        if !output.status.success() {
            return Err(LinkError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl LinkBackend for NmcliBackend {
    async fn scan(&mut self) -> Result<Vec<ScanNetwork>, LinkError> {
        let output = Self::run(
            "scan",
            &[
                "-t", "-f", "SSID,SIGNAL", "dev", "wifi", "list", "--rescan", "yes",
            ],
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (ssid, signal) = line.rsplit_once(':')?;
                if ssid.is_empty() {
                    return None;
                }
                Some(ScanNetwork {
                    ssid: ssid.to_string(),
                    signal: signal.parse().unwrap_or(0),
                })
            })
            .collect())
    }

    async fn connect(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        let mut args = vec![
            "dev",
            "wifi",
            "connect",
            credentials.ssid.as_str(),
            "ifname",
            self.interface.as_str(),
        ];
        if !credentials.pass.is_empty() {
            args.push("password");
            args.push(credentials.pass.as_str());
        }
        Self::run("connect", &args).await?;
        Ok(())
    }

    async fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), LinkError> {
        Self::run(
            "hotspot",
            &[
                "dev",
                "wifi",
                "hotspot",
                "ifname",
                self.interface.as_str(),
                "ssid",
                ssid,
                "password",
                password,
            ],
        )
        .await?;
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        // GENERAL.STATE prints e.g. "100 (connected)"; "30 (disconnected)"
        // otherwise, so match on the numeric code.
        match Self::run(
            "state",
            &["-g", "GENERAL.STATE", "dev", "show", self.interface.as_str()],
        )
        .await
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .trim()
                .starts_with("100"),
            Err(_) => false,
        }
    }
}
