//! # Session Manager
//!
//! Maintains the authenticated TLS session to the broker once the network
//! layer is up, subscribes to the device's command channel and forwards every
//! inbound payload to the event pipeline. Reconnection policy stays inside
//! rumqttc's event loop; this component only reports session up/down to the
//! link supervisor and pauses between polls after a failure.
//!
//! A missing or implausibly small CA bundle is a configuration fault: it is
//! logged and the manager refuses to start, leaving the rest of the system
//! running in degraded mode.

use crate::config::BrokerConfig;
use crate::events::Pipeline;
use crate::link::{ConnectionState, LinkEvent};
use crate::store::DeviceIdentity;
use chrono::Datelike;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Anything smaller than this cannot be a usable PEM bundle.
const MIN_CA_LEN: usize = 512;

/// Bounded wait for a plausible wall clock before the first TLS handshake.
const CLOCK_SYNC_ATTEMPTS: u32 = 5;
const CLOCK_SYNC_PAUSE: Duration = Duration::from_secs(2);

pub struct SessionManager {
    config: BrokerConfig,
    identity: DeviceIdentity,
    link_tx: mpsc::Sender<LinkEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    pipeline: Pipeline,
    last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl SessionManager {
    pub fn new(
        config: BrokerConfig,
        identity: DeviceIdentity,
        link_tx: mpsc::Sender<LinkEvent>,
        state_rx: watch::Receiver<ConnectionState>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            config,
            identity,
            link_tx,
            state_rx,
            pipeline,
            last_activity: None,
        }
    }

    /// Runs until the process shuts down. Returns early (without touching the
    /// network) on a configuration fault.
    pub async fn run(mut self) {
        let Some(ca) = load_ca(&self.config.ca_file) else {
            error!(
                "Broker CA at {} missing or implausibly small; session manager disabled",
                self.config.ca_file.display()
            );
            return;
        };

        if !self.await_network().await {
            return;
        }
        wait_for_clock().await;

        let mut options = MqttOptions::new(
            self.identity.id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
        if !self.config.username.is_empty() {
            options.set_credentials(self.config.username.clone(), self.config.password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        info!(
            "Session manager connecting to {}:{} as '{}'",
            self.config.host, self.config.port, self.identity.id
        );
        self.send(LinkEvent::SessionStarted).await;

        let reconnect_pause = Duration::from_secs(self.config.reconnect_pause_secs);
        let mut connected = false;

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Session established, subscribing {}", self.identity.command_topic);
                    if let Err(e) = client
                        .subscribe(self.identity.command_topic.as_str(), QoS::AtLeastOnce)
                        .await
                    {
                        error!("Subscribe failed: {}", e);
                    }
                    connected = true;
                    self.last_activity = Some(chrono::Local::now());
                    self.send(LinkEvent::SessionUp).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "Inbound {} ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    );
                    self.last_activity = Some(chrono::Local::now());
                    self.pipeline.handle(&publish.payload, Instant::now());
                }
                Ok(_) => {}
                Err(e) => {
                    if connected {
                        warn!(
                            "Session lost: {} (last activity {:?})",
                            e, self.last_activity
                        );
                        connected = false;
                        self.send(LinkEvent::SessionDown).await;
                    } else {
                        debug!("Session connect attempt failed: {}", e);
                    }
                    tokio::time::sleep(reconnect_pause).await;
                }
            }
        }
    }

    /// Blocks until the link supervisor reports network access. `false` when
    /// the watch channel is gone (shutdown).
    async fn await_network(&mut self) -> bool {
        loop {
            let state = *self.state_rx.borrow();
            match state {
                ConnectionState::Associated
                | ConnectionState::SessionConnecting
                | ConnectionState::SessionConnected => return true,
                _ => {}
            }
            if self.state_rx.changed().await.is_err() {
                return false;
            }
        }
    }

    async fn send(&self, event: LinkEvent) {
        if self.link_tx.send(event).await.is_err() {
            warn!("Link supervisor gone, dropping {:?}", event);
        }
    }
}

/// Reads the CA bundle, `None` when it is missing or too small to be real.
fn load_ca(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.len() >= MIN_CA_LEN => Some(bytes),
        Ok(bytes) => {
            warn!("CA bundle {} is only {} bytes", path.display(), bytes.len());
            None
        }
        Err(e) => {
            warn!("Cannot read CA bundle {}: {}", path.display(), e);
            None
        }
    }
}

/// TLS needs a sane clock for certificate validation. Waits a bounded number
/// of attempts for the wall clock to look synced, then proceeds either way
/// (a failed handshake will be retried by the session loop).
async fn wait_for_clock() {
    for attempt in 0..CLOCK_SYNC_ATTEMPTS {
        if chrono::Utc::now().year() >= 2024 {
            if attempt > 0 {
                info!("Clock became plausible after {} attempt(s)", attempt);
            }
            return;
        }
        debug!("Clock not yet synced (attempt {})", attempt + 1);
        tokio::time::sleep(CLOCK_SYNC_PAUSE).await;
    }
    warn!("Proceeding without a plausible wall clock");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_ca_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(load_ca(&dir.path().join("nope.pem")).is_none());
    }

    #[test]
    fn undersized_ca_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.pem");
        std::fs::write(&path, b"-----BEGIN CERTIFICATE-----").unwrap();
        assert!(load_ca(&path).is_none());
    }

    #[test]
    fn plausible_ca_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        let mut pem = b"-----BEGIN CERTIFICATE-----\n".to_vec();
        pem.extend(std::iter::repeat(b'A').take(600));
        pem.extend_from_slice(b"\n-----END CERTIFICATE-----\n");
        std::fs::write(&path, &pem).unwrap();
        assert_eq!(load_ca(&path), Some(pem));
    }

    #[tokio::test]
    async fn manager_refuses_to_start_without_ca() {
        let dir = tempdir().unwrap();
        let config = BrokerConfig {
            ca_file: dir.path().join("missing.pem"),
            ..BrokerConfig::default()
        };
        let identity = DeviceIdentity {
            id: "moneybot-test".to_string(),
            command_topic: "devices/moneybot-test/commands".to_string(),
        };
        let (link_tx, mut link_rx) = mpsc::channel(4);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Associated);
        let (producer, _consumer) = crate::events::queue();

        let manager = SessionManager::new(
            config,
            identity,
            link_tx,
            state_rx,
            Pipeline::new(producer),
        );
        // Returns promptly instead of attempting the network.
        tokio::time::timeout(Duration::from_secs(1), manager.run())
            .await
            .expect("manager should refuse to start");
        assert!(link_rx.try_recv().is_err());
    }
}
