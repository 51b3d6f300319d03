//! Seams to the external SDKs and the data they hand back.
//!
//! Every SDK is reached through an `Arc<dyn Trait>` so services can be built
//! per tenant and swapped for fakes in tests.

use crate::AuthResult;
use async_trait::async_trait;
use auth_storage::StoredTokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

/// A session token with its renewal material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl From<&TokenSet> for StoredTokens {
    fn from(tokens: &TokenSet) -> Self {
        StoredTokens {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens.expires_at,
        }
    }
}

impl From<StoredTokens> for TokenSet {
    fn from(tokens: StoredTokens) -> Self {
        TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
        }
    }
}

/// A signed-in identity-provider session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirebaseUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub tenant_id: Option<String>,
    pub tokens: TokenSet,
}

impl FirebaseUser {
    pub fn id_token(&self) -> &str {
        &self.tokens.access_token
    }
}

/// LINE profile as reported by the LIFF SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiffProfile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
}

/// Result of confirming an SMS code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneCredential {
    pub phone_uid: String,
    pub tokens: TokenSet,
}

/// Handle to a rendered reCAPTCHA widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecaptchaWidget(pub u64);

/// Backend user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Payload for registering a new backend user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    pub name: String,
    pub community_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Multi-tenant identity provider (Firebase-compatible).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Session stream. The current value is the signed-in user, if any.
    fn subscribe(&self) -> watch::Receiver<Option<FirebaseUser>>;

    fn current_user(&self) -> Option<FirebaseUser>;

    async fn sign_in_with_custom_token(
        &self,
        tenant_id: Option<&str>,
        custom_token: &str,
    ) -> AuthResult<FirebaseUser>;

    /// Force-refresh the ID token of the current session.
    async fn refresh_session(&self) -> AuthResult<FirebaseUser>;

    async fn sign_out(&self) -> AuthResult<()>;
}

/// The LIFF in-app browser SDK.
#[async_trait]
pub trait LiffSdk: Send + Sync {
    async fn init(&self, liff_id: &str) -> AuthResult<()>;

    fn is_logged_in(&self) -> bool;

    /// Start the LINE login redirect.
    fn login(&self, redirect_uri: &str) -> AuthResult<()>;

    fn logout(&self);

    fn access_token(&self) -> Option<String>;

    async fn profile(&self) -> AuthResult<LiffProfile>;
}

/// SMS verification with a reCAPTCHA gate.
#[async_trait]
pub trait PhoneVerificationProvider: Send + Sync {
    fn render_recaptcha(&self, container_id: &str) -> AuthResult<RecaptchaWidget>;

    fn clear_recaptcha(&self, widget: RecaptchaWidget);

    /// Returns the verification id of the new challenge.
    async fn send_verification_code(
        &self,
        phone_number: &str,
        widget: RecaptchaWidget,
    ) -> AuthResult<String>;

    async fn confirm_code(&self, verification_id: &str, code: &str) -> AuthResult<PhoneCredential>;

    async fn refresh_phone_session(&self, refresh_token: &str) -> AuthResult<TokenSet>;
}

/// Backend endpoints the auth flow talks to.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Trade a LIFF access token for an identity-provider custom token.
    async fn exchange_liff_token(
        &self,
        access_token: &str,
        tenant_id: Option<&str>,
    ) -> AuthResult<String>;

    /// `None` when the signed-in identity has no user record yet.
    async fn fetch_current_user(&self, id_token: &str) -> AuthResult<Option<CurrentUser>>;

    async fn create_user(&self, id_token: &str, input: &CreateUserInput) -> AuthResult<CurrentUser>;
}

/// The page URL.
pub trait BrowserLocation: Send + Sync {
    /// `None` outside a browser.
    fn current_url(&self) -> Option<Url>;

    /// Replace the URL without navigating or adding a history entry.
    fn replace_url(&self, url: &Url);
}
