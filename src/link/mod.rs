//! # Network Association
//!
//! Drives the device from `Disconnected` through association, provisioning
//! fallback and session tracking. The supervisor loop is the single writer of
//! [`ConnectionState`]: every other component either feeds [`LinkEvent`]s into
//! its channel (backend monitor, session manager) or observes state through
//! the watch channel published by the status module.
//!
//! Provisioning is a one-way trapdoor per boot: once entered, link events are
//! ignored and only the restart triggered by a successful portal save leaves
//! it. This avoids flapping the radio between AP and station roles.

pub mod backend;
pub mod machine;

use crate::config::{LinkConfig, PortalConfig};
use crate::portal::ProvisioningPortal;
use crate::status::StatusPublisher;
use crate::store::{CredentialStore, Credentials};
use backend::LinkBackend;
use machine::{Effect, Machine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Exactly one instance exists, owned by the link supervisor; observers read
/// it through the status watch channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Associating,
    Provisioning,
    Associated,
    SessionConnecting,
    SessionConnected,
}

/// Events consumed by the supervisor loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Network layer acquired an address.
    AddressAcquired,
    /// Network layer lost the association.
    Disassociated,
    /// Session manager started its connection attempt.
    SessionStarted,
    /// Broker session established.
    SessionUp,
    /// Broker session lost.
    SessionDown,
    /// Orderly shutdown (restart path); stops the portal and ends the loop.
    Shutdown,
}

pub struct LinkSupervisor<B: LinkBackend> {
    config: LinkConfig,
    machine: Machine,
    status: StatusPublisher,
    backend: B,
    portal: ProvisioningPortal,
    credentials: Option<Credentials>,
    events_tx: mpsc::Sender<LinkEvent>,
    events_rx: mpsc::Receiver<LinkEvent>,
}

impl<B: LinkBackend> LinkSupervisor<B> {
    pub fn new(
        config: LinkConfig,
        portal_config: PortalConfig,
        backend: B,
        status: StatusPublisher,
        store: Arc<CredentialStore>,
        restart_tx: mpsc::Sender<()>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(16);
        let credentials = store.load_credentials();
        let portal = ProvisioningPortal::new(portal_config, store, restart_tx);
        Self {
            machine: Machine::new(config.max_retries),
            config,
            status,
            backend,
            portal,
            credentials,
            events_tx,
            events_rx,
        }
    }

    /// Sender handle for components that feed events into the supervisor
    /// (session manager, shutdown path).
    pub fn event_sender(&self) -> mpsc::Sender<LinkEvent> {
        self.events_tx.clone()
    }

    /// Runs the supervisor until a `Shutdown` event arrives.
    pub async fn run(mut self) {
        self.diagnostic_scan().await;

        let (state, effect) = self.machine.boot(self.credentials.is_some());
        self.status.transition(state);
        self.perform(effect).await;

        // Quiet periods double as the connectivity poll: when no event arrives
        // within the monitor interval, ask the backend whether the link still
        // holds.
        let monitor_interval = Duration::from_secs(self.config.monitor_interval_secs.max(1));
        loop {
            let received = tokio::time::timeout(monitor_interval, self.events_rx.recv()).await;
            match received {
                Ok(None) => break,
                Ok(Some(LinkEvent::Shutdown)) => {
                    info!("Link supervisor shutting down");
                    self.portal.stop().await;
                    break;
                }
                Ok(Some(event)) => {
                    if let Some((state, effect)) = self.machine.apply(event) {
                        self.status.transition(state);
                        self.perform(effect).await;
                    }
                }
                Err(_) => self.monitor_tick().await,
            }
        }
    }

    /// Connectivity poll: only meaningful once associated; emits a
    /// disassociation event when the network layer reports the link gone.
    async fn monitor_tick(&mut self) {
        let state = self.machine.state();
        let associated = matches!(
            state,
            ConnectionState::Associated
                | ConnectionState::SessionConnecting
                | ConnectionState::SessionConnected
        );
        if associated && !self.backend.is_connected().await {
            warn!("Network layer reports disassociation");
            let _ = self.events_tx.send(LinkEvent::Disassociated).await;
        }
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Reassociate => self.attempt_association().await,
            Effect::EnterProvisioning => self.enter_provisioning().await,
        }
    }

    /// One bounded association attempt; the outcome is fed back into the
    /// event channel so the transition logic stays in one place.
    async fn attempt_association(&mut self) {
        let Some(credentials) = self.credentials.clone() else {
            // Unreachable by construction; treat like a drop if it happens.
            error!("Association attempt without credentials");
            let _ = self.events_tx.send(LinkEvent::Disassociated).await;
            return;
        };

        info!("Associating with '{}'", credentials.ssid);
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let outcome = tokio::time::timeout(timeout, self.backend.connect(&credentials)).await;

        let event = match outcome {
            Ok(Ok(())) => {
                info!("Address acquired on '{}'", credentials.ssid);
                LinkEvent::AddressAcquired
            }
            Ok(Err(e)) => {
                warn!("Association failed: {}", e);
                LinkEvent::Disassociated
            }
            Err(_) => {
                warn!("Association timed out after {:?}", timeout);
                LinkEvent::Disassociated
            }
        };
        let _ = self.events_tx.send(event).await;
    }

    async fn enter_provisioning(&mut self) {
        if self.portal.is_running() {
            return;
        }
        info!("Entering provisioning mode");
        let ap_ssid = self.portal.config().ap_ssid.clone();
        let ap_password = self.portal.config().ap_password.clone();
        if let Err(e) = self.backend.start_access_point(&ap_ssid, &ap_password).await {
            // Keep the portal up anyway: on a wired bench setup the form is
            // still reachable without the AP.
            error!("Failed to start access point: {}", e);
        }
        if let Err(e) = self.portal.start().await {
            error!("Failed to start provisioning portal: {}", e);
        }
    }

    /// Informational scan before the first attempt. Logged only, never
    /// branched on.
    async fn diagnostic_scan(&mut self) {
        match self.backend.scan().await {
            Ok(networks) => {
                let target_seen = self
                    .credentials
                    .as_ref()
                    .map(|c| networks.iter().any(|n| n.ssid == c.ssid))
                    .unwrap_or(false);
                let best_signal = networks.iter().map(|n| n.signal).max().unwrap_or(0);
                info!(
                    "Scan saw {} network(s), best signal {}%; target visible: {}",
                    networks.len(),
                    best_signal,
                    target_seen
                );
            }
            Err(e) => warn!("Diagnostic scan failed: {}", e),
        }
    }
}
