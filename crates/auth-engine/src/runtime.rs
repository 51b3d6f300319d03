//! Application-scoped auth runtime.
//!
//! [`AuthContext`] builds every service for one community and hands the
//! hooks a shared [`AuthServices`]. Nothing here is global: a tenant switch
//! or a test builds a fresh context.

use crate::auth_fsm::{AuthEvidence, AuthenticationState};
use crate::backend_client::BackendClient;
use crate::hooks::{
    AuthActions, AuthStateChangeBridge, FirebaseAuthStateListener, LineAuthRedirectDetection,
    TokenExpirationHandler,
};
use crate::liff_service::LiffService;
use crate::phone_auth_service::PhoneAuthService;
use crate::sdk::{
    AuthBackend, BrowserLocation, CurrentUser, FirebaseUser, IdentityProvider, LiffSdk,
    PhoneVerificationProvider, TokenSet,
};
use crate::state_manager::AuthStateManager;
use crate::store::{AuthStore, AuthStoreSnapshot};
use crate::AuthResult;
use auth_config_and_utils::{Config, TenantConfig};
use auth_storage::{BrowserStorage, Clock, StoredTokens, TokenFamily, TokenManager};
use environment_detector::{AuthEnvironment, EnvironmentDetector, RuntimeSignals};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External collaborators the runtime is built on.
pub struct AuthDependencies {
    pub liff_sdk: Arc<dyn LiffSdk>,
    pub identity: Arc<dyn IdentityProvider>,
    pub phone_provider: Arc<dyn PhoneVerificationProvider>,
    /// `None` builds a [`BackendClient`] from the configuration.
    pub backend: Option<Arc<dyn AuthBackend>>,
    pub storage: Box<dyn BrowserStorage>,
    pub clock: Arc<dyn Clock>,
    pub location: Arc<dyn BrowserLocation>,
}

/// Services shared by the action and side-effect hooks.
pub struct AuthServices {
    pub(crate) tenant: TenantConfig,
    pub(crate) environment: AuthEnvironment,
    pub(crate) manager: Arc<AuthStateManager>,
    pub(crate) store: Arc<AuthStore>,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) liff: Arc<LiffService>,
    pub(crate) phone: Arc<PhoneAuthService>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) backend: Arc<dyn AuthBackend>,
    pub(crate) location: Arc<dyn BrowserLocation>,
    pub(crate) expiration_check_interval: Duration,
}

impl AuthServices {
    pub fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }

    pub fn environment(&self) -> AuthEnvironment {
        self.environment
    }

    pub fn manager(&self) -> &Arc<AuthStateManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<AuthStore> {
        &self.store
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn liff(&self) -> &Arc<LiffService> {
        &self.liff
    }

    pub fn phone(&self) -> &Arc<PhoneAuthService> {
        &self.phone
    }

    pub(crate) fn tenant_id(&self) -> Option<&str> {
        self.tenant.firebase_tenant_id.as_deref()
    }

    pub(crate) fn sync_liff(&self) {
        self.store.set_liff(self.liff.state());
    }

    pub(crate) fn sync_phone(&self) {
        self.store.set_phone(self.phone.state());
    }

    /// Persist and publish a fresh identity-provider session.
    pub(crate) fn record_session(&self, user: &FirebaseUser) {
        if let Err(error) = self
            .tokens
            .save_tokens(TokenFamily::Line, &StoredTokens::from(&user.tokens))
        {
            warn!(%error, "Could not persist session tokens");
        }
        self.store.set_line_tokens(Some(user.tokens.clone()));
        self.store.set_firebase_user(Some(user.clone()));
    }

    /// Pick up the identity provider's current session, if it has one, and
    /// report it as evidence. Also looks up the backend user record.
    pub(crate) async fn establish_session(&self, reason: &str) -> bool {
        let Some(user) = self.identity.current_user() else {
            debug!(reason, "No identity-provider session to establish");
            return false;
        };
        self.record_session(&user);
        self.manager.apply(AuthEvidence::SessionPresent, reason);

        if let Err(error) = self.load_current_user().await {
            warn!(%error, transient = error.is_transient(), "Backend user lookup failed");
        }
        true
    }

    /// Ask the backend for the signed-in user's record and, when there is
    /// one, report it.
    pub(crate) async fn load_current_user(&self) -> AuthResult<Option<CurrentUser>> {
        let Some(user) = self.identity.current_user() else {
            return Ok(None);
        };
        let record = self.backend.fetch_current_user(user.id_token()).await?;
        if let Some(record) = record.as_ref() {
            self.accept_user_record(record);
        }
        Ok(record)
    }

    /// Report a backend record. When the transition is deferred behind a
    /// listener pass the store holds the record until it lands.
    pub(crate) fn accept_user_record(&self, record: &CurrentUser) {
        let outcome = self
            .manager
            .apply(AuthEvidence::UserRecordArrived, "backend user record");
        if !self.store.offer_current_user(record.clone()) {
            debug!(user_id = %record.id, ?outcome, "Current user not yet published");
        }
    }

    /// Bring back a phone verification that survived a reload. Only the
    /// session that verified the number gets it back.
    pub(crate) fn restore_phone_verification(&self) {
        let flagged = self
            .tokens
            .has_auth_flag(TokenFamily::Phone)
            .unwrap_or(false);
        if !flagged {
            return;
        }
        let session_uid = self.identity.current_user().map(|user| user.uid);
        let identity = self.tokens.phone_identity().ok().flatten();
        let tokens = self.tokens.tokens(TokenFamily::Phone).ok().flatten();
        match (identity, tokens) {
            (Some(identity), Some(_))
                if !session_uid
                    .as_deref()
                    .is_some_and(|uid| identity.is_owned_by(uid)) =>
            {
                warn!(
                    phone_uid = %identity.phone_uid,
                    owner_uid = %identity.owner_uid,
                    "Stored phone verification belongs to another session, dropping it"
                );
                self.drop_phone_verification();
            }
            (Some(identity), Some(tokens)) => {
                debug!(phone_uid = %identity.phone_uid, "Restoring phone verification");
                self.phone.restore_verified(identity, TokenSet::from(tokens));
                self.manager
                    .apply(AuthEvidence::PhoneVerified, "restored phone verification");
                self.sync_phone();
            }
            _ => {
                warn!("Phone flag without a stored identity, dropping it");
                self.drop_phone_verification();
            }
        }
    }

    /// Forget the phone step in memory and in storage.
    pub(crate) fn drop_phone_verification(&self) {
        self.phone.reset();
        if let Err(error) = self.tokens.clear_family(TokenFamily::Phone) {
            warn!(%error, "Could not clear phone tokens");
        }
        self.sync_phone();
    }

    /// Tear down every session. Never fails; each step logs its own error.
    pub(crate) async fn sign_out_everywhere(&self, reason: &str) {
        info!(reason, "Logging out");
        self.phone.reset();
        self.liff.logout();
        if let Err(error) = self.identity.sign_out().await {
            warn!(%error, "Identity-provider sign-out failed");
        }
        if let Err(error) = self.tokens.clear_all_auth_flags() {
            warn!(%error, "Could not clear auth flags");
        }
        self.store.reset();
        self.manager.apply(AuthEvidence::LogoutRequested, reason);
        self.sync_liff();
        self.sync_phone();
    }
}

/// Background side effects. Aborted when dropped.
pub struct SideEffectHandles {
    session_listener: JoinHandle<()>,
    expiration_handler: JoinHandle<()>,
}

impl SideEffectHandles {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SideEffectHandles {
    fn drop(&mut self) {
        self.session_listener.abort();
        self.expiration_handler.abort();
    }
}

/// Everything the app needs for one community.
pub struct AuthContext {
    services: Arc<AuthServices>,
    redirect: LineAuthRedirectDetection,
    bridge: AuthStateChangeBridge,
    bootstrapped: OnceCell<AuthenticationState>,
}

impl AuthContext {
    pub fn new(
        config: &Config,
        tenant: TenantConfig,
        signals: Option<RuntimeSignals>,
        deps: AuthDependencies,
    ) -> AuthResult<Self> {
        let detector = match signals {
            Some(signals) => EnvironmentDetector::new(signals),
            None => EnvironmentDetector::server_side(),
        };
        let environment = detector.detect();

        let backend: Arc<dyn AuthBackend> = match deps.backend {
            Some(backend) => backend,
            None => Arc::new(BackendClient::from_config(config, &tenant)?),
        };
        let tokens = Arc::new(TokenManager::new(
            deps.storage,
            deps.clock,
            config.token_expiry_skew_secs,
        ));
        let liff = Arc::new(LiffService::new(
            tenant.clone(),
            deps.liff_sdk,
            deps.identity.clone(),
            backend.clone(),
            deps.location.clone(),
        ));
        let phone = Arc::new(PhoneAuthService::new(
            deps.phone_provider,
            deps.identity.clone(),
            tokens.clone(),
            config.recaptcha_container_id.clone(),
        ));
        let manager = Arc::new(AuthStateManager::new());
        let store = Arc::new(AuthStore::new(environment));
        let bridge = AuthStateChangeBridge::attach(manager.clone(), store.clone());

        let services = Arc::new(AuthServices {
            tenant,
            environment,
            manager,
            store,
            tokens,
            liff,
            phone,
            identity: deps.identity,
            backend,
            location: deps.location,
            expiration_check_interval: Duration::from_secs(
                config.expiration_check_interval_secs.max(1),
            ),
        });
        let redirect = LineAuthRedirectDetection::from_location(services.location.as_ref());

        info!(
            community_id = %services.tenant.community_id,
            environment = ?environment,
            redirect_callback = redirect.has_evidence(),
            "Auth context created"
        );

        Ok(Self {
            services,
            redirect,
            bridge,
            bootstrapped: OnceCell::new(),
        })
    }

    pub fn services(&self) -> &Arc<AuthServices> {
        &self.services
    }

    pub fn environment(&self) -> AuthEnvironment {
        self.services.environment
    }

    pub fn state(&self) -> AuthenticationState {
        self.services.manager.state()
    }

    pub fn snapshot(&self) -> AuthStoreSnapshot {
        self.services.store.snapshot()
    }

    pub fn redirect(&self) -> &LineAuthRedirectDetection {
        &self.redirect
    }

    pub fn bridge(&self) -> &AuthStateChangeBridge {
        &self.bridge
    }

    pub fn actions(&self) -> AuthActions {
        AuthActions::new(self.services.clone())
    }

    pub fn expiration_handler(&self) -> TokenExpirationHandler {
        TokenExpirationHandler::new(self.services.clone())
    }

    /// Run the initial auth check. Later calls return the first result.
    pub async fn bootstrap(&self) -> AuthenticationState {
        *self
            .bootstrapped
            .get_or_init(|| self.run_bootstrap())
            .await
    }

    async fn run_bootstrap(&self) -> AuthenticationState {
        let services = &self.services;
        services
            .manager
            .apply(AuthEvidence::BootstrapStarted, "bootstrap");

        if let Some(processing) = self.redirect.mount_processing(services.clone()) {
            processing.run().await;
        } else if services.environment.is_liff() {
            if services.liff.initialize().await && services.liff.is_logged_in() {
                services.liff.sign_in_with_liff_token(services.tenant_id()).await;
            }
            services.sync_liff();
        }

        if services.establish_session("initial check").await {
            services.restore_phone_verification();
        } else {
            services
                .manager
                .apply(AuthEvidence::InitialCheckEmpty, "no session on initial check");
        }

        let state = services.manager.state();
        info!(state = %state, "Auth bootstrap finished");
        state
    }

    /// Start the session listener and the expiry poller.
    pub fn spawn_side_effects(&self) -> SideEffectHandles {
        SideEffectHandles {
            session_listener: FirebaseAuthStateListener::new(self.services.clone()).spawn(),
            expiration_handler: self.expiration_handler().spawn(),
        }
    }
}
