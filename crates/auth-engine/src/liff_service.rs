//! LIFF SDK wrapper bound to one community.
//!
//! SDK failures never escape as errors here: every operation logs and reports
//! `false`, leaving the LIFF state at its last stable value.

use crate::sdk::{AuthBackend, BrowserLocation, IdentityProvider, LiffProfile, LiffSdk};
use crate::store::LiffState;
use crate::{AuthError, AuthResult};
use auth_config_and_utils::TenantConfig;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

type InitFuture = Shared<BoxFuture<'static, bool>>;

struct InitFlight {
    generation: u64,
    future: InitFuture,
}

#[derive(Default)]
struct InitSlot {
    flight: Option<InitFlight>,
    next_generation: u64,
}

/// Whether the SDK is ready, or getting there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiffInitState {
    pub is_initialized: bool,
    pub is_initializing: bool,
}

pub struct LiffService {
    tenant: TenantConfig,
    sdk: Arc<dyn LiffSdk>,
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn AuthBackend>,
    location: Arc<dyn BrowserLocation>,
    state: Arc<Mutex<LiffState>>,
    init: Mutex<InitSlot>,
}

impl LiffService {
    pub fn new(
        tenant: TenantConfig,
        sdk: Arc<dyn LiffSdk>,
        identity: Arc<dyn IdentityProvider>,
        backend: Arc<dyn AuthBackend>,
        location: Arc<dyn BrowserLocation>,
    ) -> Self {
        Self {
            tenant,
            sdk,
            identity,
            backend,
            location,
            state: Arc::new(Mutex::new(LiffState::default())),
            init: Mutex::new(InitSlot::default()),
        }
    }

    pub fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }

    pub fn state(&self) -> LiffState {
        self.state.lock().clone()
    }

    /// Whether the LIFF SDK holds a LINE login. False before initialisation.
    pub fn is_logged_in(&self) -> bool {
        self.state.lock().is_initialized && self.sdk.is_logged_in()
    }

    pub fn init_state(&self) -> LiffInitState {
        let is_initializing = self.init.lock().flight.is_some();
        LiffInitState {
            is_initialized: self.state.lock().is_initialized,
            is_initializing,
        }
    }

    /// Initialise the SDK once.
    ///
    /// Concurrent callers share one in-flight attempt and see the same
    /// result. A failed attempt leaves the service uninitialised so a later
    /// call can retry.
    pub async fn initialize(&self) -> bool {
        let (generation, flight) = {
            let mut slot = self.init.lock();
            if self.state.lock().is_initialized {
                return true;
            }
            match slot.flight.as_ref() {
                Some(flight) => (flight.generation, flight.future.clone()),
                None => {
                    slot.next_generation += 1;
                    let generation = slot.next_generation;
                    let future = run_init(
                        self.sdk.clone(),
                        self.tenant.liff_id.clone(),
                        self.state.clone(),
                    )
                    .boxed()
                    .shared();
                    slot.flight = Some(InitFlight {
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
        };

        let initialized = flight.await;

        let mut slot = self.init.lock();
        if slot
            .flight
            .as_ref()
            .is_some_and(|flight| flight.generation == generation)
        {
            slot.flight = None;
        }
        initialized
    }

    /// Start the LINE login redirect back to `redirect_path`.
    ///
    /// Returns true when the redirect was triggered; false when the user is
    /// already logged in or the SDK failed.
    pub async fn login(&self, redirect_path: &str) -> bool {
        if !self.initialize().await {
            return false;
        }
        if self.sdk.is_logged_in() {
            debug!(community_id = %self.tenant.community_id, "LIFF already logged in");
            return false;
        }

        let redirect_uri = self
            .location
            .current_url()
            .and_then(|url| url.join(redirect_path).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| redirect_path.to_string());

        match self.sdk.login(&redirect_uri) {
            Ok(()) => {
                info!(redirect_uri = %redirect_uri, "LIFF login redirect started");
                true
            }
            Err(error) => {
                warn!(%error, "LIFF login failed");
                self.state.lock().error = Some(error.to_string());
                false
            }
        }
    }

    /// Trade the LIFF access token for an identity-provider session.
    ///
    /// `tenant_id` must match the tenant this service was built for. Already
    /// being signed in to that tenant counts as success without any calls.
    pub async fn sign_in_with_liff_token(&self, tenant_id: Option<&str>) -> bool {
        if tenant_id != self.tenant.firebase_tenant_id.as_deref() {
            warn!(
                community_id = %self.tenant.community_id,
                requested = ?tenant_id,
                "Refusing LIFF sign-in for a different tenant"
            );
            return false;
        }

        if let Some(user) = self.identity.current_user() {
            if user.tenant_id.as_deref() == tenant_id {
                debug!(uid = %user.uid, "Already signed in, skipping LIFF token exchange");
                return true;
            }
        }

        if !self.initialize().await {
            return false;
        }

        self.state.lock().is_liff_processing = true;
        let result = self.exchange_and_sign_in(tenant_id).await;

        let mut state = self.state.lock();
        state.is_liff_processing = false;
        match result {
            Ok(profile) => {
                state.is_logged_in = true;
                if profile.is_some() {
                    state.profile = profile;
                }
                state.error = None;
                true
            }
            Err(error) => {
                warn!(%error, community_id = %self.tenant.community_id, "LIFF sign-in failed");
                state.error = Some(error.to_string());
                false
            }
        }
    }

    async fn exchange_and_sign_in(&self, tenant_id: Option<&str>) -> AuthResult<Option<LiffProfile>> {
        if !self.sdk.is_logged_in() {
            return Err(AuthError::NotReady("LIFF user is not logged in".to_string()));
        }
        let access_token = self
            .sdk
            .access_token()
            .ok_or_else(|| AuthError::Sdk("LIFF returned no access token".to_string()))?;

        let custom_token = self.backend.exchange_liff_token(&access_token, tenant_id).await?;
        let user = self
            .identity
            .sign_in_with_custom_token(tenant_id, &custom_token)
            .await?;
        info!(uid = %user.uid, community_id = %self.tenant.community_id, "Signed in with LIFF token");

        // The profile is cosmetic; a failure here does not undo the sign-in.
        match self.sdk.profile().await {
            Ok(profile) => Ok(Some(profile)),
            Err(error) => {
                debug!(%error, "Could not read LIFF profile");
                Ok(None)
            }
        }
    }

    /// Log out of LIFF. Never fails; initialisation is kept.
    pub fn logout(&self) {
        if self.state.lock().is_initialized {
            self.sdk.logout();
        }
        let mut state = self.state.lock();
        state.is_logged_in = false;
        state.is_liff_processing = false;
        state.profile = None;
        state.error = None;
    }
}

async fn run_init(sdk: Arc<dyn LiffSdk>, liff_id: String, state: Arc<Mutex<LiffState>>) -> bool {
    state.lock().is_liff_processing = true;
    let result = sdk.init(&liff_id).await;

    let mut state = state.lock();
    state.is_liff_processing = false;
    match result {
        Ok(()) => {
            state.is_initialized = true;
            state.is_logged_in = sdk.is_logged_in();
            state.error = None;
            info!(liff_id = %liff_id, logged_in = state.is_logged_in, "LIFF initialized");
            true
        }
        Err(error) => {
            warn!(%error, liff_id = %liff_id, "LIFF initialization failed");
            state.error = Some(error.to_string());
            false
        }
    }
}
