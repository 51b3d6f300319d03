//! Observable auth records.
//!
//! The store caches what the manager decided plus the phone and LIFF
//! sub-states. Readers get snapshots or a `watch` receiver; only the hooks in
//! this crate write.

use crate::auth_fsm::AuthenticationState;
use crate::sdk::{CurrentUser, FirebaseUser, LiffProfile, TokenSet};
use environment_detector::AuthEnvironment;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Primary auth record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub firebase_user: Option<FirebaseUser>,
    /// Present only while `authentication_state` is `UserRegistered`.
    pub current_user: Option<CurrentUser>,
    pub authentication_state: AuthenticationState,
    pub environment: AuthEnvironment,
    pub is_authenticating: bool,
    pub line_tokens: Option<TokenSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhoneAuthState {
    pub is_verifying: bool,
    pub is_verified: bool,
    pub phone_number: Option<String>,
    pub phone_uid: Option<String>,
    pub verification_id: Option<String>,
    pub error: Option<String>,
    pub phone_tokens: Option<TokenSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiffState {
    /// Never reverts to false for a given service instance.
    pub is_initialized: bool,
    pub is_liff_processing: bool,
    pub is_logged_in: bool,
    pub profile: Option<LiffProfile>,
    pub error: Option<String>,
}

/// Everything the UI renders against, read together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthStoreSnapshot {
    pub auth: AuthState,
    pub phone: PhoneAuthState,
    pub liff: LiffState,
}

pub struct AuthStore {
    tx: watch::Sender<AuthStoreSnapshot>,
    /// A backend record that arrived before `UserRegistered` was reached.
    /// Only touched inside `tx` updates.
    pending_user: Mutex<Option<CurrentUser>>,
}

impl AuthStore {
    pub fn new(environment: AuthEnvironment) -> Self {
        let initial = AuthStoreSnapshot {
            auth: AuthState {
                environment,
                ..AuthState::default()
            },
            ..AuthStoreSnapshot::default()
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            pending_user: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> AuthStoreSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStoreSnapshot> {
        self.tx.subscribe()
    }

    pub fn authentication_state(&self) -> AuthenticationState {
        self.tx.borrow().auth.authentication_state
    }

    pub(crate) fn set_authentication_state(&self, state: AuthenticationState) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.auth.authentication_state == state {
                return false;
            }
            snapshot.auth.authentication_state = state;
            if state == AuthenticationState::UserRegistered {
                if let Some(user) = self.pending_user.lock().take() {
                    debug!(user_id = %user.id, "Publishing held current user");
                    snapshot.auth.current_user = Some(user);
                }
            } else {
                if snapshot.auth.current_user.is_some() {
                    debug!(state = %state, "Dropping current user on state change");
                    snapshot.auth.current_user = None;
                }
                if !state.has_line_session() {
                    self.pending_user.lock().take();
                }
            }
            true
        });
    }

    pub(crate) fn set_firebase_user(&self, user: Option<FirebaseUser>) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.auth.firebase_user == user {
                return false;
            }
            snapshot.auth.firebase_user = user;
            true
        });
    }

    /// Record the backend user. Outside `UserRegistered` the record is held
    /// and published by the transition into it; it is discarded if the
    /// session ends first. Returns whether it was published now.
    pub(crate) fn offer_current_user(&self, user: CurrentUser) -> bool {
        let mut published = false;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.auth.authentication_state != AuthenticationState::UserRegistered {
                debug!(
                    state = %snapshot.auth.authentication_state,
                    "Holding current user until user_registered"
                );
                *self.pending_user.lock() = Some(user.clone());
                return false;
            }
            published = true;
            if snapshot.auth.current_user.as_ref() == Some(&user) {
                return false;
            }
            snapshot.auth.current_user = Some(user.clone());
            true
        });
        published
    }

    pub(crate) fn set_authenticating(&self, value: bool) {
        self.tx.send_if_modified(|snapshot| {
            let changed = snapshot.auth.is_authenticating != value;
            snapshot.auth.is_authenticating = value;
            changed
        });
    }

    pub(crate) fn set_line_tokens(&self, tokens: Option<TokenSet>) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.auth.line_tokens == tokens {
                return false;
            }
            snapshot.auth.line_tokens = tokens;
            true
        });
    }

    pub(crate) fn set_phone(&self, phone: PhoneAuthState) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.phone == phone {
                return false;
            }
            snapshot.phone = phone;
            true
        });
    }

    pub(crate) fn set_liff(&self, liff: LiffState) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.liff == liff {
                return false;
            }
            snapshot.liff = liff;
            true
        });
    }

    /// Clear every record in one update. The environment and the mirrored
    /// state survive; the manager's logout transition follows.
    pub(crate) fn reset(&self) {
        self.tx.send_modify(|snapshot| {
            self.pending_user.lock().take();
            let environment = snapshot.auth.environment;
            let state = snapshot.auth.authentication_state;
            let is_initialized = snapshot.liff.is_initialized;
            *snapshot = AuthStoreSnapshot {
                auth: AuthState {
                    environment,
                    authentication_state: state,
                    ..AuthState::default()
                },
                phone: PhoneAuthState::default(),
                liff: LiffState {
                    is_initialized,
                    ..LiffState::default()
                },
            };
        });
    }
}
