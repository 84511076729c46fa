pub mod config;
pub mod events;
pub mod link;
pub mod portal;
pub mod session;
pub mod status;
pub mod store;

use crate::config::Config;
use crate::events::Pipeline;
use crate::link::backend::NmcliBackend;
use crate::link::{LinkEvent, LinkSupervisor};
use crate::session::SessionManager;
use crate::status::StatusPublisher;
use crate::store::CredentialStore;
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load();
    let store = Arc::new(CredentialStore::new(
        &config.store_dir(),
        &config.identity.default_id,
    ));
    let identity = store.load_identity();
    info!(
        "MoneyBot core starting as '{}' (command topic {})",
        identity.id, identity.command_topic
    );

    let (status, state_rx, mut signal_rx) = StatusPublisher::new();
    let (queue_producer, mut queue_consumer) = events::queue();
    let (restart_tx, mut restart_rx) = mpsc::channel(1);

    // Link supervisor: association state machine, provisioning fallback.
    let backend = NmcliBackend::new(&config.link.interface);
    let supervisor = LinkSupervisor::new(
        config.link.clone(),
        config.portal.clone(),
        backend,
        status,
        store.clone(),
        restart_tx.clone(),
    );
    let link_tx = supervisor.event_sender();
    let supervisor_task = tokio::spawn(supervisor.run());

    // Session manager feeding the event pipeline.
    let session = SessionManager::new(
        config.broker.clone(),
        identity.clone(),
        link_tx.clone(),
        state_rx,
        Pipeline::new(queue_producer),
    );
    tokio::spawn(session.run());

    // Consumer loop: drains the queue toward the presentation layer. The
    // display collaborator hangs off this hand-over point.
    tokio::spawn(async move {
        while let Some(event) = queue_consumer.next().await {
            info!(
                "CHA-CHING: {} {} ({})",
                event.amount, event.currency, event.event_id
            );
        }
    });

    // Indicator observer: the LED collaborator reads the coarse signal.
    tokio::spawn(async move {
        loop {
            info!("Indicator -> {:?}", *signal_rx.borrow_and_update());
            if signal_rx.changed().await.is_err() {
                break;
            }
        }
    });

    // Block until the portal asks for a restart; the service supervisor
    // brings the process back up with the new credentials.
    if restart_rx.recv().await.is_some() {
        info!("Restart requested to apply new credentials");
        let _ = link_tx.send(LinkEvent::Shutdown).await;
        if tokio::time::timeout(Duration::from_secs(5), supervisor_task)
            .await
            .is_err()
        {
            warn!("Link supervisor did not stop in time");
        }
    }

    info!("MoneyBot core exiting");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
