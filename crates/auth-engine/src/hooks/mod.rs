//! Action hooks and root-mounted side effects.
//!
//! Actions are what the UI calls. Side effects are passive: they watch the
//! identity provider, the manager, the clock and the URL, and turn what they
//! see into evidence. Between them they are the only writers of the store.

mod actions;
mod auth_state_change;
mod firebase_auth_state;
mod line_redirect;
mod token_expiration;

pub use actions::{AuthActions, SignUpProfile};
pub use auth_state_change::AuthStateChangeBridge;
pub use firebase_auth_state::FirebaseAuthStateListener;
pub use line_redirect::{LineAuthProcessing, LineAuthRedirectDetection};
pub use token_expiration::{ExpirationCheck, TokenExpirationHandler};
