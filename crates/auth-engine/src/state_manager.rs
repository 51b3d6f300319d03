//! The single writer of `AuthenticationState`.
//!
//! Transitions come in two flavours: an explicit target (`update_state`),
//! checked against the legality lattice, and evidence (`apply`), resolved
//! through the `auth_machine` table. Both are serialised here. Listeners run
//! with the lock released; a transition requested while they run is queued
//! and applied once the current listener pass finishes.

use crate::auth_fsm::{AuthEvidence, AuthenticationState};
use crate::{AuthError, AuthResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle returned by [`AuthStateManager::add_state_change_listener`].
pub type ListenerId = u64;

/// A state-change subscriber. Returning `Err` is logged and otherwise ignored.
pub type StateChangeListener = Arc<dyn Fn(&StateChange) -> anyhow::Result<()> + Send + Sync>;

/// Payload delivered to listeners for every applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub previous: AuthenticationState,
    pub current: AuthenticationState,
    pub reason: String,
}

/// What happened to a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// State changed and listeners were notified.
    Applied,
    /// Already in the target state, or the evidence changes nothing here.
    Unchanged,
    /// Dropped by the loading guard.
    Suppressed,
    /// Queued behind a listener pass; decided when it is applied.
    Deferred,
}

#[derive(Debug, Clone)]
enum Request {
    State(AuthenticationState),
    Evidence(AuthEvidence),
}

enum Decision {
    Move(AuthenticationState),
    Stay(TransitionOutcome),
}

struct Inner {
    state: AuthenticationState,
    listeners: Vec<(ListenerId, StateChangeListener)>,
    next_listener_id: ListenerId,
    notifying: bool,
    pending: VecDeque<(Request, String)>,
}

pub struct AuthStateManager {
    inner: Mutex<Inner>,
}

impl Default for AuthStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateManager {
    pub fn new() -> Self {
        Self::with_initial_state(AuthenticationState::Initializing)
    }

    /// Start from an arbitrary state. Used when restoring and in tests.
    pub fn with_initial_state(state: AuthenticationState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                listeners: Vec::new(),
                next_listener_id: 1,
                notifying: false,
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn state(&self) -> AuthenticationState {
        self.inner.lock().state
    }

    /// Request an explicit target state.
    ///
    /// Illegal targets fail with `InvalidStateTransition` and change nothing.
    /// A request made while listeners are running returns `Deferred`; its
    /// legality is checked when it is applied and a failure there is logged.
    pub fn update_state(
        &self,
        next: AuthenticationState,
        reason: impl Into<String>,
    ) -> AuthResult<TransitionOutcome> {
        self.submit(Request::State(next), reason.into())
    }

    /// Report evidence and let the table decide what it means right now.
    pub fn apply(&self, evidence: AuthEvidence, reason: impl Into<String>) -> TransitionOutcome {
        match self.submit(Request::Evidence(evidence), reason.into()) {
            Ok(outcome) => outcome,
            Err(error) => {
                // The table only produces lattice-legal moves.
                warn!(%error, "Evidence produced an illegal transition");
                TransitionOutcome::Unchanged
            }
        }
    }

    pub fn add_state_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if the id was not registered.
    pub fn remove_state_change_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        inner.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn submit(&self, request: Request, reason: String) -> AuthResult<TransitionOutcome> {
        let mut inner = self.inner.lock();

        if inner.notifying {
            debug!(?request, reason = %reason, "Transition queued behind listener pass");
            inner.pending.push_back((request, reason));
            return Ok(TransitionOutcome::Deferred);
        }

        let next = match decide(inner.state, &request)? {
            Decision::Move(next) => next,
            Decision::Stay(outcome) => {
                debug!(
                    state = %inner.state,
                    ?request,
                    ?outcome,
                    reason = %reason,
                    "Transition request left state unchanged"
                );
                return Ok(outcome);
            }
        };

        let change = StateChange {
            previous: inner.state,
            current: next,
            reason,
        };
        inner.state = next;
        inner.notifying = true;
        drop(inner);

        self.notify_and_drain(change);
        Ok(TransitionOutcome::Applied)
    }

    /// Notify for `first`, then apply queued requests one at a time, each
    /// followed by its own full listener pass.
    fn notify_and_drain(&self, first: StateChange) {
        let mut next_change = Some(first);

        while let Some(change) = next_change.take() {
            info!(
                from = %change.previous,
                to = %change.current,
                reason = %change.reason,
                "Auth state transition"
            );

            let listeners = self.inner.lock().listeners.clone();
            for (id, listener) in listeners {
                notify_one(id, &listener, &change);
            }

            let mut inner = self.inner.lock();
            while let Some((request, reason)) = inner.pending.pop_front() {
                match decide(inner.state, &request) {
                    Ok(Decision::Move(next)) => {
                        let previous = inner.state;
                        inner.state = next;
                        next_change = Some(StateChange {
                            previous,
                            current: next,
                            reason,
                        });
                        break;
                    }
                    Ok(Decision::Stay(outcome)) => {
                        debug!(?request, ?outcome, reason = %reason, "Queued transition left state unchanged");
                    }
                    Err(error) => {
                        warn!(%error, reason = %reason, "Queued transition rejected");
                    }
                }
            }
            if next_change.is_none() {
                inner.notifying = false;
            }
        }
    }
}

fn decide(current: AuthenticationState, request: &Request) -> AuthResult<Decision> {
    match request {
        Request::State(next) => {
            let next = *next;
            if next == current {
                return Ok(Decision::Stay(TransitionOutcome::Unchanged));
            }
            if current == AuthenticationState::Loading && next == AuthenticationState::Unauthenticated
            {
                return Ok(Decision::Stay(TransitionOutcome::Suppressed));
            }
            if !current.can_transition_to(next) {
                return Err(AuthError::InvalidStateTransition(format!(
                    "Cannot move from {} to {}",
                    current, next
                )));
            }
            Ok(Decision::Move(next))
        }
        Request::Evidence(evidence) => match current.resolve(evidence) {
            Some(next) if next != current => {
                if !current.can_transition_to(next) {
                    return Err(AuthError::InvalidStateTransition(format!(
                        "{:?} in {} resolved to {}",
                        evidence, current, next
                    )));
                }
                Ok(Decision::Move(next))
            }
            _ => Ok(Decision::Stay(TransitionOutcome::Unchanged)),
        },
    }
}

fn notify_one(id: ListenerId, listener: &StateChangeListener, change: &StateChange) {
    match catch_unwind(AssertUnwindSafe(|| listener(change))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(listener_id = id, error = %error, "State change listener failed");
        }
        Err(_) => {
            warn!(listener_id = id, "State change listener panicked");
        }
    }
}
