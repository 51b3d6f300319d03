//! Authentication state and the evidence table that drives it.
//!
//! Callers never pick the next state themselves; they report *evidence* (a
//! session appeared, a token lapsed, a user record arrived) and the table
//! below decides what it means in the current state. Evidence with no entry
//! for the current state is ignored, which is what keeps a duplicate
//! "session present" event from downgrading a registered user.
//!
//! ## State Diagram
//!
//! ```text
//! Initializing ──BootstrapStarted──► Loading ──InitialCheckEmpty──► Unauthenticated
//!                                       │                                │
//!                                       │ SessionPresent                 │ SessionPresent
//!                                       ▼                                ▼
//!                LineTokenExpired ◄─LineTokenLapsed── LineAuthenticated ─┘
//!                       │                   ▲              │
//!                       └─LineTokenRenewed──┘              │ PhoneVerified
//!                                                          ▼
//!                PhoneTokenExpired ◄─PhoneTokenLapsed─ PhoneAuthenticated
//!                       │                   ▲              │
//!                       └─PhoneTokenRenewed─┘              │ UserRecordArrived
//!                                                          ▼
//!                                                    UserRegistered
//!
//! SessionAbsent / LogoutRequested lead to Unauthenticated from every
//! authenticated state. Loading has no SessionAbsent entry: a "no session"
//! signal that arrives before the first real check is dropped.
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(Initializing)

    Initializing => {
        BootstrapStarted => Loading,
        LogoutRequested => Unauthenticated
    },
    Loading => {
        // The first real check found nothing
        InitialCheckEmpty => Unauthenticated,
        SessionPresent => LineAuthenticated,
        LogoutRequested => Unauthenticated
    },
    Unauthenticated => {
        SessionPresent => LineAuthenticated
    },
    LineAuthenticated => {
        LineTokenLapsed => LineTokenExpired,
        PhoneVerified => PhoneAuthenticated,
        // Returning users already have a backend record
        UserRecordArrived => UserRegistered,
        SessionAbsent => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    LineTokenExpired => {
        LineTokenRenewed => LineAuthenticated,
        SessionPresent => LineAuthenticated,
        SessionAbsent => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    PhoneAuthenticated => {
        PhoneTokenLapsed => PhoneTokenExpired,
        UserRecordArrived => UserRegistered,
        SessionAbsent => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    PhoneTokenExpired => {
        PhoneTokenRenewed => PhoneAuthenticated,
        PhoneVerified => PhoneAuthenticated,
        SessionAbsent => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    UserRegistered => {
        SessionAbsent => Unauthenticated,
        LogoutRequested => Unauthenticated
    }
}

pub use auth_machine::Input as AuthEvidence;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// The single source of truth for "how far along is this user".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationState {
    /// Process has not started the bootstrap check.
    #[default]
    Initializing,
    /// Bootstrap check in progress.
    Loading,
    Unauthenticated,
    LineAuthenticated,
    LineTokenExpired,
    PhoneAuthenticated,
    PhoneTokenExpired,
    /// Terminal success state: backend user record exists.
    UserRegistered,
}

impl AuthenticationState {
    pub const ALL: [AuthenticationState; 8] = [
        AuthenticationState::Initializing,
        AuthenticationState::Loading,
        AuthenticationState::Unauthenticated,
        AuthenticationState::LineAuthenticated,
        AuthenticationState::LineTokenExpired,
        AuthenticationState::PhoneAuthenticated,
        AuthenticationState::PhoneTokenExpired,
        AuthenticationState::UserRegistered,
    ];

    /// Position on the forward chain, for states on it.
    fn chain_rank(self) -> Option<u8> {
        match self {
            AuthenticationState::Unauthenticated => Some(0),
            AuthenticationState::LineAuthenticated => Some(1),
            AuthenticationState::PhoneAuthenticated => Some(2),
            AuthenticationState::UserRegistered => Some(3),
            _ => None,
        }
    }

    /// Whether `self → next` is legal.
    ///
    /// Legality is a partial lattice rather than a total order: forward
    /// progress is always allowed, expiry only from the matching
    /// authenticated state, renewal re-enters at the renewed credential, and
    /// logout is reachable from anywhere.
    pub fn can_transition_to(self, next: AuthenticationState) -> bool {
        use AuthenticationState::*;

        if self == next {
            return true;
        }

        match (self, next) {
            (_, Unauthenticated) => true,
            (Initializing, Loading) => true,
            (Loading, LineAuthenticated | PhoneAuthenticated | UserRegistered) => true,
            (LineAuthenticated, LineTokenExpired) => true,
            (PhoneAuthenticated, PhoneTokenExpired) => true,
            (LineTokenExpired, to) => to.chain_rank().is_some_and(|rank| rank >= 1),
            (PhoneTokenExpired, to) => to.chain_rank().is_some_and(|rank| rank >= 2),
            (from, to) => match (from.chain_rank(), to.chain_rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    /// The bootstrap states, before any real answer is known.
    pub fn is_bootstrapping(self) -> bool {
        matches!(
            self,
            AuthenticationState::Initializing | AuthenticationState::Loading
        )
    }

    /// A primary session exists, even if one of its tokens is lapsed.
    pub fn has_line_session(self) -> bool {
        matches!(
            self,
            AuthenticationState::LineAuthenticated
                | AuthenticationState::LineTokenExpired
                | AuthenticationState::PhoneAuthenticated
                | AuthenticationState::PhoneTokenExpired
                | AuthenticationState::UserRegistered
        )
    }

    /// The phone step has been completed at some point in this session.
    pub fn has_phone_verification(self) -> bool {
        matches!(
            self,
            AuthenticationState::PhoneAuthenticated
                | AuthenticationState::PhoneTokenExpired
                | AuthenticationState::UserRegistered
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthenticationState::Initializing => "initializing",
            AuthenticationState::Loading => "loading",
            AuthenticationState::Unauthenticated => "unauthenticated",
            AuthenticationState::LineAuthenticated => "line_authenticated",
            AuthenticationState::LineTokenExpired => "line_token_expired",
            AuthenticationState::PhoneAuthenticated => "phone_authenticated",
            AuthenticationState::PhoneTokenExpired => "phone_token_expired",
            AuthenticationState::UserRegistered => "user_registered",
        }
    }

    /// Resolve `evidence` against this state. `None` when the table has no entry.
    pub fn resolve(self, evidence: &AuthEvidence) -> Option<AuthenticationState> {
        let mut machine = AuthMachine::from_state(AuthMachineState::from(self));
        machine
            .consume(evidence)
            .ok()
            .map(|_| AuthenticationState::from(machine.state()))
    }
}

impl std::fmt::Display for AuthenticationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&AuthMachineState> for AuthenticationState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Initializing => AuthenticationState::Initializing,
            AuthMachineState::Loading => AuthenticationState::Loading,
            AuthMachineState::Unauthenticated => AuthenticationState::Unauthenticated,
            AuthMachineState::LineAuthenticated => AuthenticationState::LineAuthenticated,
            AuthMachineState::LineTokenExpired => AuthenticationState::LineTokenExpired,
            AuthMachineState::PhoneAuthenticated => AuthenticationState::PhoneAuthenticated,
            AuthMachineState::PhoneTokenExpired => AuthenticationState::PhoneTokenExpired,
            AuthMachineState::UserRegistered => AuthenticationState::UserRegistered,
        }
    }
}

impl From<AuthenticationState> for AuthMachineState {
    fn from(state: AuthenticationState) -> Self {
        match state {
            AuthenticationState::Initializing => AuthMachineState::Initializing,
            AuthenticationState::Loading => AuthMachineState::Loading,
            AuthenticationState::Unauthenticated => AuthMachineState::Unauthenticated,
            AuthenticationState::LineAuthenticated => AuthMachineState::LineAuthenticated,
            AuthenticationState::LineTokenExpired => AuthMachineState::LineTokenExpired,
            AuthenticationState::PhoneAuthenticated => AuthMachineState::PhoneAuthenticated,
            AuthenticationState::PhoneTokenExpired => AuthMachineState::PhoneTokenExpired,
            AuthenticationState::UserRegistered => AuthMachineState::UserRegistered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AuthenticationState::*;

    const ALL_EVIDENCE: [AuthEvidence; 11] = [
        AuthEvidence::BootstrapStarted,
        AuthEvidence::InitialCheckEmpty,
        AuthEvidence::SessionPresent,
        AuthEvidence::SessionAbsent,
        AuthEvidence::LineTokenLapsed,
        AuthEvidence::LineTokenRenewed,
        AuthEvidence::PhoneVerified,
        AuthEvidence::PhoneTokenLapsed,
        AuthEvidence::PhoneTokenRenewed,
        AuthEvidence::UserRecordArrived,
        AuthEvidence::LogoutRequested,
    ];

    #[test]
    fn test_initial_machine_state_is_initializing() {
        let machine = AuthMachine::new();
        assert_eq!(AuthenticationState::from(machine.state()), Initializing);
        assert_eq!(AuthenticationState::default(), Initializing);
    }

    #[test]
    fn test_bootstrap_to_unauthenticated() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthEvidence::BootstrapStarted).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Loading);
        machine.consume(&AuthEvidence::InitialCheckEmpty).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
    }

    #[test]
    fn test_session_absent_ignored_while_loading() {
        assert_eq!(Loading.resolve(&AuthEvidence::SessionAbsent), None);
        assert_eq!(
            Loading.resolve(&AuthEvidence::SessionPresent),
            Some(LineAuthenticated)
        );
    }

    #[test]
    fn test_duplicate_session_evidence_never_regresses() {
        for state in [LineAuthenticated, PhoneAuthenticated, PhoneTokenExpired, UserRegistered] {
            assert_eq!(state.resolve(&AuthEvidence::SessionPresent), None, "{}", state);
        }
    }

    #[test]
    fn test_full_forward_chain() {
        let mut state = Initializing;
        for (evidence, expected) in [
            (AuthEvidence::BootstrapStarted, Loading),
            (AuthEvidence::SessionPresent, LineAuthenticated),
            (AuthEvidence::PhoneVerified, PhoneAuthenticated),
            (AuthEvidence::UserRecordArrived, UserRegistered),
        ] {
            state = state.resolve(&evidence).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_expiry_and_renewal() {
        assert_eq!(
            LineAuthenticated.resolve(&AuthEvidence::LineTokenLapsed),
            Some(LineTokenExpired)
        );
        assert_eq!(
            LineTokenExpired.resolve(&AuthEvidence::LineTokenRenewed),
            Some(LineAuthenticated)
        );
        assert_eq!(
            PhoneAuthenticated.resolve(&AuthEvidence::PhoneTokenLapsed),
            Some(PhoneTokenExpired)
        );
        assert_eq!(
            PhoneTokenExpired.resolve(&AuthEvidence::PhoneTokenRenewed),
            Some(PhoneAuthenticated)
        );
        // Expiry is only meaningful from the matching authenticated state.
        assert_eq!(UserRegistered.resolve(&AuthEvidence::LineTokenLapsed), None);
        assert_eq!(LineAuthenticated.resolve(&AuthEvidence::PhoneTokenLapsed), None);
    }

    #[test]
    fn test_logout_reachable_from_every_session_state() {
        for state in AuthenticationState::ALL {
            if matches!(state, Unauthenticated) {
                continue;
            }
            assert_eq!(
                state.resolve(&AuthEvidence::LogoutRequested),
                Some(Unauthenticated),
                "{}",
                state
            );
        }
    }

    #[test]
    fn test_evidence_table_stays_inside_lattice() {
        for state in AuthenticationState::ALL {
            for evidence in ALL_EVIDENCE.iter() {
                if let Some(next) = state.resolve(evidence) {
                    assert!(
                        state.can_transition_to(next),
                        "{:?} in {} leads to illegal {}",
                        evidence,
                        state,
                        next
                    );
                }
            }
        }
    }

    #[test]
    fn test_lattice_forward_and_backward() {
        assert!(Unauthenticated.can_transition_to(LineAuthenticated));
        assert!(LineAuthenticated.can_transition_to(UserRegistered));
        assert!(!UserRegistered.can_transition_to(LineAuthenticated));
        assert!(!PhoneAuthenticated.can_transition_to(LineAuthenticated));
        assert!(!Unauthenticated.can_transition_to(Loading));
        assert!(!LineAuthenticated.can_transition_to(PhoneTokenExpired));
    }

    #[test]
    fn test_lattice_renewal_reenters_at_credential() {
        assert!(LineTokenExpired.can_transition_to(LineAuthenticated));
        assert!(LineTokenExpired.can_transition_to(PhoneAuthenticated));
        assert!(PhoneTokenExpired.can_transition_to(PhoneAuthenticated));
        assert!(!PhoneTokenExpired.can_transition_to(LineAuthenticated));
        assert!(!LineTokenExpired.can_transition_to(PhoneTokenExpired));
    }

    #[test]
    fn test_unauthenticated_reachable_from_all() {
        for state in AuthenticationState::ALL {
            assert!(state.can_transition_to(Unauthenticated));
        }
    }

    #[test]
    fn test_state_helpers() {
        assert!(Loading.is_bootstrapping());
        assert!(!Unauthenticated.has_line_session());
        assert!(LineTokenExpired.has_line_session());
        assert!(UserRegistered.has_phone_verification());
        assert!(!LineAuthenticated.has_phone_verification());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LineTokenExpired).unwrap(),
            "\"line_token_expired\""
        );
        for state in AuthenticationState::ALL {
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state.as_str())
            );
        }
    }
}
