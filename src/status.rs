//! Status Signal - coarse connection indicator for the presentation layer.
//!
//! Maps the connection state onto a four-value palette consumed by the LED
//! collaborator. The mapping is a pure function; publishing happens on a watch
//! channel so any number of observers can read the latest value without
//! blocking the writer.

use crate::link::ConnectionState;
use tokio::sync::watch;
use tracing::info;

/// Discrete indicator palette shown by the external LED/indicator collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Signal {
    /// No connectivity at all (boot, association in progress or lost).
    #[default]
    Alert,
    /// The onboarding portal is up and waiting for credentials.
    Provisioning,
    /// Network access exists but the broker session is not established.
    PartialService,
    /// Fully operational: associated and session connected.
    FullService,
}

/// Maps a connection state to its indicator value.
pub fn indicator(state: ConnectionState) -> Signal {
    match state {
        ConnectionState::Disconnected | ConnectionState::Associating => Signal::Alert,
        ConnectionState::Provisioning => Signal::Provisioning,
        ConnectionState::Associated | ConnectionState::SessionConnecting => Signal::PartialService,
        ConnectionState::SessionConnected => Signal::FullService,
    }
}

/// Single-writer publisher for connection state and its derived signal.
///
/// Only the link supervisor holds one; every transition goes through
/// [`StatusPublisher::transition`], which keeps the two watch channels in
/// lockstep so observers can never see a state without its matching signal.
pub struct StatusPublisher {
    state_tx: watch::Sender<ConnectionState>,
    signal_tx: watch::Sender<Signal>,
}

impl StatusPublisher {
    pub fn new() -> (
        Self,
        watch::Receiver<ConnectionState>,
        watch::Receiver<Signal>,
    ) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (signal_tx, signal_rx) = watch::channel(Signal::Alert);
        (
            Self {
                state_tx,
                signal_tx,
            },
            state_rx,
            signal_rx,
        )
    }

    pub fn current(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Publishes a new connection state and its derived indicator signal.
    pub fn transition(&self, to: ConnectionState) {
        let from = self.current();
        if from != to {
            info!("Connection state {:?} -> {:?}", from, to);
        }
        self.state_tx.send_replace(to);
        self.signal_tx.send_replace(indicator(to));
    }
}
