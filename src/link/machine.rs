//! Pure transition core of the association state machine.
//!
//! All state changes flow through [`Machine::apply`] (and [`Machine::boot`]
//! for the initial decision), which returns the new state plus the side effect
//! the supervisor must carry out. Keeping this free of I/O makes the retry and
//! trapdoor policy directly testable.

use super::{ConnectionState, LinkEvent};

/// Side effect requested by a transition; executed by the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Re-run the association attempt immediately.
    Reassociate,
    /// Start AP mode and the provisioning portal.
    EnterProvisioning,
}

pub struct Machine {
    state: ConnectionState,
    retries: u8,
    max_retries: u8,
}

impl Machine {
    pub fn new(max_retries: u8) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retries: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Startup decision: associate when credentials exist, otherwise go
    /// straight to provisioning without ever entering `Associating`.
    pub fn boot(&mut self, have_credentials: bool) -> (ConnectionState, Effect) {
        debug_assert_eq!(self.state, ConnectionState::Disconnected);
        if have_credentials {
            self.state = ConnectionState::Associating;
            (self.state, Effect::Reassociate)
        } else {
            self.state = ConnectionState::Provisioning;
            (self.state, Effect::EnterProvisioning)
        }
    }

    /// Applies one event. `None` means the event causes no transition in the
    /// current state (notably: everything while in `Provisioning`, which is a
    /// trapdoor left only by a process restart).
    pub fn apply(&mut self, event: LinkEvent) -> Option<(ConnectionState, Effect)> {
        use ConnectionState::*;

        let next = match (self.state, event) {
            (Provisioning, _) => return None,

            (Associating, LinkEvent::AddressAcquired) => {
                self.retries = 0;
                (Associated, Effect::None)
            }

            (Associating | Associated | SessionConnecting | SessionConnected, LinkEvent::Disassociated) => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    (Associating, Effect::Reassociate)
                } else {
                    (Provisioning, Effect::EnterProvisioning)
                }
            }

            (Associated, LinkEvent::SessionStarted) => (SessionConnecting, Effect::None),
            (Associated | SessionConnecting, LinkEvent::SessionUp) => {
                (SessionConnected, Effect::None)
            }
            (SessionConnecting | SessionConnected, LinkEvent::SessionDown) => {
                (Associated, Effect::None)
            }

            _ => return None,
        };

        self.state = next.0;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn boot_without_credentials_skips_associating() {
        let mut machine = Machine::new(2);
        let (state, effect) = machine.boot(false);
        assert_eq!(state, Provisioning);
        assert_eq!(effect, Effect::EnterProvisioning);
        // Trapdoor: nothing moves it afterwards.
        assert!(machine.apply(LinkEvent::AddressAcquired).is_none());
        assert!(machine.apply(LinkEvent::Disassociated).is_none());
        assert_eq!(machine.state(), Provisioning);
    }

    #[test]
    fn boot_with_credentials_associates() {
        let mut machine = Machine::new(2);
        assert_eq!(machine.boot(true), (Associating, Effect::Reassociate));
    }

    #[test]
    fn three_disassociations_exhaust_retries() {
        let mut machine = Machine::new(2);
        machine.boot(true);

        let mut states = Vec::new();
        for _ in 0..3 {
            let (state, _) = machine.apply(LinkEvent::Disassociated).unwrap();
            states.push(state);
        }
        assert_eq!(states, vec![Associating, Associating, Provisioning]);
    }

    #[test]
    fn address_acquired_resets_the_retry_counter() {
        let mut machine = Machine::new(2);
        machine.boot(true);
        machine.apply(LinkEvent::Disassociated);
        machine.apply(LinkEvent::Disassociated);
        assert_eq!(
            machine.apply(LinkEvent::AddressAcquired),
            Some((Associated, Effect::None))
        );

        // Full retry budget available again after a successful association.
        let mut states = Vec::new();
        for _ in 0..3 {
            states.push(machine.apply(LinkEvent::Disassociated).unwrap().0);
        }
        assert_eq!(states, vec![Associating, Associating, Provisioning]);
    }

    #[test]
    fn session_lifecycle_transitions() {
        let mut machine = Machine::new(2);
        machine.boot(true);
        machine.apply(LinkEvent::AddressAcquired);

        assert_eq!(
            machine.apply(LinkEvent::SessionStarted),
            Some((SessionConnecting, Effect::None))
        );
        assert_eq!(
            machine.apply(LinkEvent::SessionUp),
            Some((SessionConnected, Effect::None))
        );
        // Session loss returns to Associated; association is not redone.
        assert_eq!(
            machine.apply(LinkEvent::SessionDown),
            Some((Associated, Effect::None))
        );
    }

    #[test]
    fn disassociation_during_a_session_reenters_the_retry_path() {
        let mut machine = Machine::new(2);
        machine.boot(true);
        machine.apply(LinkEvent::AddressAcquired);
        machine.apply(LinkEvent::SessionStarted);
        machine.apply(LinkEvent::SessionUp);

        assert_eq!(
            machine.apply(LinkEvent::Disassociated),
            Some((Associating, Effect::Reassociate))
        );
    }

    #[test]
    fn session_events_in_odd_states_are_ignored() {
        let mut machine = Machine::new(2);
        machine.boot(true);
        assert!(machine.apply(LinkEvent::SessionUp).is_none());
        assert!(machine.apply(LinkEvent::SessionDown).is_none());
    }
}
