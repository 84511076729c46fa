//! # Provisioning Portal
//!
//! Self-hosted onboarding flow entered when no usable credentials exist: a
//! redirect-all DNS responder plus a small HTTP server sharing one lifecycle.
//! A client joining the setup network gets every DNS name answered with the
//! portal address, lands on the credential form, and submits the network name
//! and secret, which are persisted before the device restarts itself.
//!
//! `start`/`stop` are idempotent both ways; `stop` closes both sockets and
//! gives in-flight handlers a bounded grace period before aborting them.

pub mod decode;
pub mod dns;
pub mod http;

use crate::config::PortalConfig;
use crate::store::CredentialStore;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `stop` waits for the two server loops before aborting them.
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("failed to bind DNS socket on port {port}: {source}")]
    DnsBind {
        port: u16,
        source: std::io::Error,
    },

    #[error("failed to bind HTTP listener on port {port}: {source}")]
    HttpBind {
        port: u16,
        source: std::io::Error,
    },
}

struct Running {
    cancel: CancellationToken,
    dns_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
}

pub struct ProvisioningPortal {
    config: PortalConfig,
    store: Arc<CredentialStore>,
    restart_tx: mpsc::Sender<()>,
    running: Option<Running>,
}

impl ProvisioningPortal {
    pub fn new(config: PortalConfig, store: Arc<CredentialStore>, restart_tx: mpsc::Sender<()>) -> Self {
        Self {
            config,
            store,
            restart_tx,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Binds both sockets and spawns the DNS and HTTP loops. Calling it while
    /// already running is a no-op.
    pub async fn start(&mut self) -> Result<(), PortalError> {
        if self.running.is_some() {
            return Ok(());
        }

        let dns_socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.dns_port)))
            .await
            .map_err(|source| PortalError::DnsBind {
                port: self.config.dns_port,
                source,
            })?;
        let http_listener =
            TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.http_port)))
                .await
                .map_err(|source| PortalError::HttpBind {
                    port: self.config.http_port,
                    source,
                })?;

        let cancel = CancellationToken::new();

        let dns_task = tokio::spawn(dns::serve(
            dns_socket,
            self.config.address,
            cancel.clone(),
        ));

        let state = http::PortalState::new(
            self.store.clone(),
            self.restart_tx.clone(),
            Duration::from_secs(self.config.restart_grace_secs),
        );
        let router = http::router(state);
        let http_cancel = cancel.clone();
        let http_task = tokio::spawn(async move {
            let server = axum::serve(http_listener, router)
                .with_graceful_shutdown(http_cancel.cancelled_owned());
            if let Err(e) = server.await {
                warn!("Portal HTTP server exited with error: {}", e);
            }
        });

        info!(
            "Provisioning portal up at http://{} (dns :{}, http :{})",
            self.config.address, self.config.dns_port, self.config.http_port
        );
        self.running = Some(Running {
            cancel,
            dns_task,
            http_task,
        });
        Ok(())
    }

    /// Cancels both loops and waits out the grace period. Calling it while
    /// stopped is a no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        for (name, mut task) in [("dns", running.dns_task), ("http", running.http_task)] {
            match tokio::time::timeout(STOP_GRACE, &mut task).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("Portal {} loop did not stop in time, aborting", name);
                    task.abort();
                }
            }
        }
        info!("Provisioning portal stopped");
    }
}
