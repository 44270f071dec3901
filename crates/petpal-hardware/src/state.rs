//! Link lifecycle state machine.
//!
//! # States
//!
//! - `Disconnected`: no port open
//! - `Connecting`: resolving and opening, possibly between backoff retries
//! - `Connected`: port open, settled and purged
//! - `Failed`: attempts exhausted; terminal
//!
//! # Valid Transitions
//!
//! - Disconnected → Connecting → Connected → Disconnected
//! - Connecting → Connecting (retry after backoff)
//! - Connecting → Failed
//!
//! Nothing leaves `Failed`.
//!
//! # Examples
//!
//! ```
//! use petpal_hardware::state::{LinkState, LinkStateMachine};
//!
//! let mut machine = LinkStateMachine::new();
//! machine.transition_to(LinkState::Connecting).unwrap();
//! machine.transition_to(LinkState::Connected).unwrap();
//! assert_eq!(machine.current_state(), LinkState::Connected);
//!
//! assert!(machine.transition_to(LinkState::Failed).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use crate::error::{LinkError, Result};

/// Maximum number of transitions kept for diagnostics.
///
/// A reconnect cycle with the default five attempts records at most seven
/// transitions, so this covers several recent cycles.
const MAX_HISTORY_SIZE: usize = 32;

/// Lifecycle state of the peripheral link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: connection attempts were exhausted.
    Failed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Failed => "Failed",
        };
        write!(f, "{}", state_str)
    }
}

impl LinkState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use petpal_hardware::state::LinkState;
    ///
    /// assert!(LinkState::Connecting.can_transition_to(&LinkState::Connecting));
    /// assert!(!LinkState::Failed.can_transition_to(&LinkState::Connecting));
    /// ```
    pub fn can_transition_to(&self, target: &LinkState) -> bool {
        matches!(
            (self, target),
            (LinkState::Disconnected, LinkState::Connecting)
                | (
                    LinkState::Connecting,
                    LinkState::Connecting | LinkState::Connected | LinkState::Failed
                )
                | (LinkState::Connected, LinkState::Disconnected)
        )
    }

    /// `true` only for [`LinkState::Failed`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Failed)
    }
}

/// A single recorded transition.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: LinkState,
    pub to: LinkState,
    pub timestamp: Instant,
}

/// Tracks the current [`LinkState`] and rejects illegal transitions.
///
/// Not synchronized; the connection manager that owns it is only reached
/// through the command channel's lock.
#[derive(Debug)]
pub struct LinkStateMachine {
    current_state: LinkState,
    history: VecDeque<StateTransition>,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStateMachine {
    /// Create a new state machine in the `Disconnected` state.
    pub fn new() -> Self {
        Self {
            current_state: LinkState::Disconnected,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> LinkState {
        self.current_state
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Count of recorded transitions into `state`.
    pub fn entries_into(&self, state: LinkState) -> usize {
        self.history.iter().filter(|t| t.to == state).count()
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::InvalidTransition` if the transition is not
    /// allowed from the current state.
    pub fn transition_to(&mut self, new_state: LinkState) -> Result<()> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(LinkError::InvalidTransition {
                from: self.current_state,
                to: new_state,
            });
        }

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from: self.current_state,
            to: new_state,
            timestamp: Instant::now(),
        });
        self.current_state = new_state;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LinkState::Disconnected, LinkState::Connecting, true)]
    #[case(LinkState::Connecting, LinkState::Connecting, true)]
    #[case(LinkState::Connecting, LinkState::Connected, true)]
    #[case(LinkState::Connecting, LinkState::Failed, true)]
    #[case(LinkState::Connected, LinkState::Disconnected, true)]
    #[case(LinkState::Disconnected, LinkState::Connected, false)]
    #[case(LinkState::Connected, LinkState::Connecting, false)]
    #[case(LinkState::Connected, LinkState::Failed, false)]
    #[case(LinkState::Failed, LinkState::Connecting, false)]
    #[case(LinkState::Failed, LinkState::Disconnected, false)]
    fn test_transition_rules(
        #[case] from: LinkState,
        #[case] to: LinkState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    #[test]
    fn test_full_cycle_records_history() {
        let mut machine = LinkStateMachine::new();
        machine.transition_to(LinkState::Connecting).unwrap();
        machine.transition_to(LinkState::Connecting).unwrap();
        machine.transition_to(LinkState::Connected).unwrap();
        machine.transition_to(LinkState::Disconnected).unwrap();

        assert_eq!(machine.history().len(), 4);
        assert_eq!(machine.entries_into(LinkState::Connecting), 2);
        assert_eq!(machine.current_state(), LinkState::Disconnected);
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut machine = LinkStateMachine::new();
        let result = machine.transition_to(LinkState::Connected);

        assert!(matches!(
            result,
            Err(LinkError::InvalidTransition {
                from: LinkState::Disconnected,
                to: LinkState::Connected
            })
        ));
        assert_eq!(machine.current_state(), LinkState::Disconnected);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut machine = LinkStateMachine::new();
        machine.transition_to(LinkState::Connecting).unwrap();
        machine.transition_to(LinkState::Failed).unwrap();

        assert!(machine.current_state().is_terminal());
        for target in [
            LinkState::Disconnected,
            LinkState::Connecting,
            LinkState::Connected,
            LinkState::Failed,
        ] {
            assert!(machine.transition_to(target).is_err());
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = LinkStateMachine::new();
        machine.transition_to(LinkState::Connecting).unwrap();
        for _ in 0..(MAX_HISTORY_SIZE * 2) {
            machine.transition_to(LinkState::Connecting).unwrap();
        }
        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
    }
}
