use crate::auth_fsm::AuthEvidence;
use crate::runtime::AuthServices;
use crate::sdk::{CreateUserInput, CurrentUser};
use crate::{AuthError, AuthResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Profile fields the user fills in at sign up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignUpProfile {
    pub name: String,
    pub slug: Option<String>,
    pub image: Option<String>,
}

/// The operations the UI can invoke.
///
/// Explicit actions surface failures so the caller can show an error;
/// the phone actions follow the service contract and report `bool`/`Option`.
#[derive(Clone)]
pub struct AuthActions {
    services: Arc<AuthServices>,
}

impl AuthActions {
    pub fn new(services: Arc<AuthServices>) -> Self {
        Self { services }
    }

    /// Log in with LINE.
    ///
    /// Inside the LINE app with a LIFF login already present, the LIFF token
    /// is exchanged straight away and `Ok(true)` means signed in. Otherwise
    /// the LINE login redirect is started and `Ok(true)` means the page is
    /// about to navigate away; `Ok(false)` means nothing had to be done.
    pub async fn login(&self, redirect_path: &str) -> AuthResult<bool> {
        let services = &self.services;
        services.store.set_authenticating(true);
        let result = self.login_inner(redirect_path).await;
        services.store.set_authenticating(false);
        services.sync_liff();
        result
    }

    async fn login_inner(&self, redirect_path: &str) -> AuthResult<bool> {
        let services = &self.services;
        if !services.liff.initialize().await {
            return Err(AuthError::Sdk("LIFF initialization failed".to_string()));
        }

        if services.liff.is_logged_in() {
            if !services
                .liff
                .sign_in_with_liff_token(services.tenant_id())
                .await
            {
                return Err(AuthError::TokenExchange(
                    "LIFF token could not be exchanged for a session".to_string(),
                ));
            }
            return Ok(services.establish_session("liff login").await);
        }

        Ok(services.liff.login(redirect_path).await)
    }

    /// Log out of everything. Never fails.
    pub async fn logout(&self) {
        self.services.sign_out_everywhere("user logout").await;
    }

    /// Register the backend user once the phone step is done.
    pub async fn create_user(&self, profile: SignUpProfile) -> AuthResult<CurrentUser> {
        let services = &self.services;
        let state = services.manager.state();
        if !state.has_phone_verification() {
            return Err(AuthError::NotReady(format!(
                "cannot create a user in state {}",
                state
            )));
        }
        let firebase_user = services
            .identity
            .current_user()
            .ok_or_else(|| AuthError::NotReady("no identity-provider session".to_string()))?;

        let phone = services.phone.state();
        let input = CreateUserInput {
            name: profile.name,
            community_id: services.tenant.community_id.clone(),
            slug: profile.slug,
            image: profile.image,
            phone_uid: phone.phone_uid,
            phone_number: phone.phone_number,
        };

        services.store.set_authenticating(true);
        let result = services
            .backend
            .create_user(firebase_user.id_token(), &input)
            .await;
        services.store.set_authenticating(false);

        let user = result?;
        info!(user_id = %user.id, community_id = %input.community_id, "Backend user created");
        services.accept_user_record(&user);
        Ok(user)
    }

    /// Send an SMS challenge. `None` on failure or supersession.
    pub async fn start_phone_verification(&self, phone_number: &str) -> Option<String> {
        let services = &self.services;
        let verification_id = services.phone.start_phone_verification(phone_number).await;
        services.sync_phone();
        verification_id
    }

    /// Confirm the SMS code. On success the phone step counts as done.
    pub async fn verify_phone_code(&self, code: &str) -> bool {
        let services = &self.services;
        let verified = services.phone.verify_phone_code(code).await;
        services.sync_phone();
        if verified {
            services
                .manager
                .apply(AuthEvidence::PhoneVerified, "phone code confirmed");
        }
        verified
    }

    /// Re-read the backend user record.
    pub async fn refresh_current_user(&self) -> AuthResult<Option<CurrentUser>> {
        self.services.load_current_user().await.inspect_err(|error| {
            warn!(%error, transient = error.is_transient(), "Current user refresh failed");
        })
    }

    /// Leave the verification screen without finishing.
    pub fn cancel_phone_verification(&self) {
        self.services.phone.clear_recaptcha();
        self.services.sync_phone();
    }
}
