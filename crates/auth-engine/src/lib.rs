//! Authentication state machine for community apps.
//!
//! This crate provides:
//! - `AuthStateManager`, the single writer of `AuthenticationState`, driven by
//!   a declarative evidence table
//! - `AuthStore`, the observable records the UI renders against
//! - `LiffService` and `PhoneAuthService` wrapping the LINE and SMS SDKs
//! - A `reqwest` backend client for the LIFF token exchange and user lookups
//! - Action hooks and root-mounted side effects, wired together by `AuthContext`

mod auth_fsm;
mod backend_client;
mod error;
mod hooks;
mod liff_service;
mod phone_auth_service;
mod redirect;
mod runtime;
mod sdk;
mod state_manager;
mod store;

#[cfg(test)]
mod tests;

pub use auth_fsm::auth_machine;
pub use auth_fsm::{AuthEvidence, AuthMachine, AuthMachineState, AuthenticationState};
pub use backend_client::BackendClient;
pub use error::{AuthError, AuthResult};
pub use hooks::{
    AuthActions, AuthStateChangeBridge, ExpirationCheck, FirebaseAuthStateListener,
    LineAuthProcessing, LineAuthRedirectDetection, SignUpProfile, TokenExpirationHandler,
};
pub use liff_service::{LiffInitState, LiffService};
pub use phone_auth_service::PhoneAuthService;
pub use redirect::{strip_sensitive_params, RedirectEvidence, SENSITIVE_PARAMS};
pub use runtime::{AuthContext, AuthDependencies, AuthServices, SideEffectHandles};
pub use sdk::{
    AuthBackend, BrowserLocation, CreateUserInput, CurrentUser, FirebaseUser, IdentityProvider,
    LiffProfile, LiffSdk, PhoneCredential, PhoneVerificationProvider, RecaptchaWidget, TokenSet,
};
pub use state_manager::{
    AuthStateManager, ListenerId, StateChange, StateChangeListener, TransitionOutcome,
};
pub use store::{AuthState, AuthStore, AuthStoreSnapshot, LiffState, PhoneAuthState};
