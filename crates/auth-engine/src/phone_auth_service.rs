//! SMS verification with exactly one live challenge.
//!
//! Every start bumps a generation counter. Results that come back for an
//! older generation are discarded, which is how a superseded challenge gets
//! cancelled without a cancellation token.

use crate::sdk::{IdentityProvider, PhoneVerificationProvider, RecaptchaWidget, TokenSet};
use crate::store::PhoneAuthState;
use crate::AuthError;
use auth_storage::{PhoneIdentity, StoredTokens, TokenFamily, TokenManager};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Inner {
    state: PhoneAuthState,
    generation: u64,
    widget: Option<RecaptchaWidget>,
}

pub struct PhoneAuthService {
    provider: Arc<dyn PhoneVerificationProvider>,
    identity: Arc<dyn IdentityProvider>,
    tokens: Arc<TokenManager>,
    recaptcha_container_id: String,
    inner: Mutex<Inner>,
}

impl PhoneAuthService {
    pub fn new(
        provider: Arc<dyn PhoneVerificationProvider>,
        identity: Arc<dyn IdentityProvider>,
        tokens: Arc<TokenManager>,
        recaptcha_container_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            identity,
            tokens,
            recaptcha_container_id: recaptcha_container_id.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn state(&self) -> PhoneAuthState {
        self.inner.lock().state.clone()
    }

    /// Send an SMS challenge to `phone_number`.
    ///
    /// Any previous challenge is invalidated and its reCAPTCHA widget removed
    /// before a new one is rendered. Returns the verification id, or `None`
    /// on failure or when a newer start superseded this one mid-flight.
    pub async fn start_phone_verification(&self, phone_number: &str) -> Option<String> {
        let (generation, widget) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            if let Some(previous) = inner.widget.take() {
                self.provider.clear_recaptcha(previous);
            }
            inner.state = PhoneAuthState {
                is_verifying: true,
                phone_number: Some(phone_number.to_string()),
                ..PhoneAuthState::default()
            };

            match self.provider.render_recaptcha(&self.recaptcha_container_id) {
                Ok(widget) => {
                    inner.widget = Some(widget);
                    (inner.generation, widget)
                }
                Err(error) => {
                    let error = phone_error(error);
                    warn!(%error, "reCAPTCHA render failed");
                    inner.state.is_verifying = false;
                    inner.state.error = Some(error.to_string());
                    return None;
                }
            }
        };

        let result = self
            .provider
            .send_verification_code(phone_number, widget)
            .await;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(phone_number, "Phone challenge superseded before the SMS was sent");
            return None;
        }
        inner.state.is_verifying = false;
        match result {
            Ok(verification_id) => {
                info!(phone_number, "Phone verification code sent");
                inner.state.verification_id = Some(verification_id.clone());
                Some(verification_id)
            }
            Err(error) => {
                let error = phone_error(error);
                warn!(%error, phone_number, transient = error.is_transient(), "Sending verification code failed");
                inner.state.error = Some(error.to_string());
                None
            }
        }
    }

    /// Confirm `code` against the live challenge.
    pub async fn verify_phone_code(&self, code: &str) -> bool {
        let verification_id = self.inner.lock().state.verification_id.clone();
        match verification_id {
            Some(id) => self.confirm_verification(&id, code).await,
            None => {
                warn!("No live phone challenge to verify");
                self.inner.lock().state.error = Some("no active verification".to_string());
                false
            }
        }
    }

    /// Confirm `code` for a specific challenge. Ids other than the live one
    /// are rejected without contacting the provider.
    pub async fn confirm_verification(&self, verification_id: &str, code: &str) -> bool {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state.verification_id.as_deref() != Some(verification_id) {
                warn!("Rejecting code for a stale phone challenge");
                return false;
            }
            inner.state.is_verifying = true;
            inner.generation
        };

        let result = self.provider.confirm_code(verification_id, code).await;

        let (credential, phone_number) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!("Phone challenge superseded during confirmation");
                return false;
            }
            inner.state.is_verifying = false;
            match result {
                Ok(credential) => {
                    inner.state.is_verified = true;
                    inner.state.phone_uid = Some(credential.phone_uid.clone());
                    inner.state.phone_tokens = Some(credential.tokens.clone());
                    inner.state.verification_id = None;
                    inner.state.error = None;
                    if let Some(widget) = inner.widget.take() {
                        self.provider.clear_recaptcha(widget);
                    }
                    (credential, inner.state.phone_number.clone().unwrap_or_default())
                }
                Err(error) => {
                    // The challenge stays live so the user can retry.
                    let error = phone_error(error);
                    warn!(%error, transient = error.is_transient(), "Phone code rejected");
                    inner.state.error = Some(error.to_string());
                    return false;
                }
            }
        };

        info!(phone_uid = %credential.phone_uid, "Phone number verified");
        // Only a verification tied to a session may survive a reload.
        let Some(owner) = self.identity.current_user() else {
            warn!("Phone verified without a session, not persisting it");
            return true;
        };
        if let Err(error) = self.tokens.save_phone_identity(&PhoneIdentity {
            phone_number,
            phone_uid: credential.phone_uid,
            owner_uid: owner.uid,
        }) {
            warn!(%error, "Could not persist phone identity");
        }
        if let Err(error) = self
            .tokens
            .save_tokens(TokenFamily::Phone, &StoredTokens::from(&credential.tokens))
        {
            warn!(%error, "Could not persist phone tokens");
        }
        true
    }

    /// Renew the phone session with the stored refresh token.
    pub async fn refresh_phone_tokens(&self) -> Option<TokenSet> {
        let refresh_token = self
            .inner
            .lock()
            .state
            .phone_tokens
            .as_ref()
            .and_then(|tokens| tokens.refresh_token.clone())
            .or_else(|| {
                self.tokens
                    .tokens(TokenFamily::Phone)
                    .ok()
                    .flatten()
                    .and_then(|tokens| tokens.refresh_token)
            });
        let Some(refresh_token) = refresh_token else {
            debug!("No phone refresh token available");
            return None;
        };

        match self.provider.refresh_phone_session(&refresh_token).await {
            Ok(tokens) => {
                if let Err(error) = self
                    .tokens
                    .save_tokens(TokenFamily::Phone, &StoredTokens::from(&tokens))
                {
                    warn!(%error, "Could not persist renewed phone tokens");
                }
                self.inner.lock().state.phone_tokens = Some(tokens.clone());
                info!(expires_at = %tokens.expires_at, "Phone session renewed");
                Some(tokens)
            }
            Err(error) => {
                let error = phone_error(error);
                warn!(%error, transient = error.is_transient(), "Phone session renewal failed");
                None
            }
        }
    }

    /// Rebuild the verified state from storage after a reload.
    pub(crate) fn restore_verified(&self, identity: PhoneIdentity, tokens: TokenSet) {
        let mut inner = self.inner.lock();
        inner.state = PhoneAuthState {
            is_verified: true,
            phone_number: Some(identity.phone_number),
            phone_uid: Some(identity.phone_uid),
            phone_tokens: Some(tokens),
            ..PhoneAuthState::default()
        };
    }

    pub fn clear_recaptcha(&self) {
        if let Some(widget) = self.inner.lock().widget.take() {
            self.provider.clear_recaptcha(widget);
        }
    }

    /// Drop the challenge, the widget and all phone state. In-flight calls
    /// started before the reset are discarded when they resolve.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(widget) = inner.widget.take() {
            self.provider.clear_recaptcha(widget);
        }
        inner.state = PhoneAuthState::default();
    }
}

/// Generic SDK failures from the phone provider are phone verification
/// failures as far as the UI is concerned.
fn phone_error(error: AuthError) -> AuthError {
    match error {
        AuthError::Sdk(message) => AuthError::PhoneVerification(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_failures_read_as_phone_verification_failures() {
        let error = phone_error(AuthError::Sdk("auth/quota-exceeded".to_string()));
        assert!(matches!(error, AuthError::PhoneVerification(ref m) if m == "auth/quota-exceeded"));
        assert_eq!(
            error.to_string(),
            "Phone verification failed: auth/quota-exceeded"
        );
        assert!(!error.is_transient());
    }

    #[test]
    fn other_failures_keep_their_kind() {
        let error = phone_error(AuthError::Backend("down".to_string()));
        assert!(matches!(error, AuthError::Backend(_)));
    }
}
