use crate::auth_fsm::AuthEvidence;
use crate::runtime::AuthServices;
use crate::sdk::FirebaseUser;
use auth_storage::TokenFamily;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Turns the identity provider's session stream into evidence.
pub struct FirebaseAuthStateListener {
    services: Arc<AuthServices>,
}

impl FirebaseAuthStateListener {
    pub fn new(services: Arc<AuthServices>) -> Self {
        Self { services }
    }

    /// Follow the session stream until the provider goes away.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut sessions = self.services.identity.subscribe();
        tokio::spawn(async move {
            loop {
                let user = sessions.borrow_and_update().clone();
                self.handle_session_change(user);
                if sessions.changed().await.is_err() {
                    debug!("Identity provider session stream closed");
                    break;
                }
            }
        })
    }

    /// User present advances, never regresses. User absent is dropped by
    /// the table while the first check is still running; once it does end
    /// the session, the phone verification goes with it.
    pub fn handle_session_change(&self, user: Option<FirebaseUser>) {
        let services = &self.services;
        match user {
            Some(user) => {
                debug!(uid = %user.uid, "Identity provider reports a session");
                services.record_session(&user);
                services
                    .manager
                    .apply(AuthEvidence::SessionPresent, "identity provider session present");
            }
            None => {
                let was_signed_in = services.manager.state().has_line_session();
                services
                    .manager
                    .apply(AuthEvidence::SessionAbsent, "identity provider session absent");
                if was_signed_in && !services.manager.state().has_line_session() {
                    services.store.set_firebase_user(None);
                    services.store.set_line_tokens(None);
                    if let Err(error) = services.tokens.clear_family(TokenFamily::Line) {
                        warn!(%error, "Could not clear session tokens");
                    }
                    // The phone step belonged to the session that just ended.
                    services.drop_phone_verification();
                }
            }
        }
    }
}
