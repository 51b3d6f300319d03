use crate::auth_fsm::{AuthEvidence, AuthenticationState};
use crate::runtime::AuthServices;
use auth_storage::AuthFlagSnapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one expiry check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationCheck {
    /// Nothing was due.
    Fresh,
    LineRenewed,
    /// The primary session could not be renewed.
    LoggedOut,
    PhoneRenewed,
    /// Left in `PhoneTokenExpired`; retried on the next check.
    PhoneRenewalFailed,
}

/// Watches stored token expiry and renews, or logs out, before a request
/// fails on a stale token.
pub struct TokenExpirationHandler {
    services: Arc<AuthServices>,
}

impl TokenExpirationHandler {
    pub fn new(services: Arc<AuthServices>) -> Self {
        Self { services }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let period = self.services.expiration_check_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let outcome = self.check_once().await;
                if outcome != ExpirationCheck::Fresh {
                    debug!(?outcome, "Token expiration check acted");
                }
            }
        })
    }

    pub async fn check_once(&self) -> ExpirationCheck {
        let services = &self.services;
        let state = services.manager.state();
        // One read so a concurrent logout cannot be seen half done.
        let stored = services.tokens.snapshot().unwrap_or_else(|error| {
            warn!(%error, "Unreadable token records, treating as expired");
            AuthFlagSnapshot::default()
        });

        if state.has_line_session() && self.lapsed(stored.line_expires_at) {
            return self.handle_line_expiry(state).await;
        }

        match state {
            AuthenticationState::PhoneAuthenticated
                if stored.phone_authenticated && self.lapsed(stored.phone_expires_at) =>
            {
                services
                    .manager
                    .apply(AuthEvidence::PhoneTokenLapsed, "phone token expired");
                self.renew_phone().await
            }
            AuthenticationState::PhoneTokenExpired => self.renew_phone().await,
            _ => ExpirationCheck::Fresh,
        }
    }

    /// Missing expiry counts as lapsed.
    fn lapsed(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        expires_at.map_or(true, |at| self.services.tokens.is_past_deadline(at))
    }

    async fn handle_line_expiry(&self, state: AuthenticationState) -> ExpirationCheck {
        let services = &self.services;
        if state == AuthenticationState::LineAuthenticated {
            services
                .manager
                .apply(AuthEvidence::LineTokenLapsed, "session token expired");
        }

        match services.identity.refresh_session().await {
            Ok(user) => {
                services.record_session(&user);
                services
                    .manager
                    .apply(AuthEvidence::LineTokenRenewed, "session token renewed");
                info!(uid = %user.uid, expires_at = %user.tokens.expires_at, "Session token renewed");
                ExpirationCheck::LineRenewed
            }
            Err(error) => {
                warn!(%error, state = %state, "Session renewal failed, logging out");
                services.sign_out_everywhere("session expired").await;
                ExpirationCheck::LoggedOut
            }
        }
    }

    async fn renew_phone(&self) -> ExpirationCheck {
        let services = &self.services;
        let outcome = match services.phone.refresh_phone_tokens().await {
            Some(_) => {
                services
                    .manager
                    .apply(AuthEvidence::PhoneTokenRenewed, "phone token renewed");
                ExpirationCheck::PhoneRenewed
            }
            None => ExpirationCheck::PhoneRenewalFailed,
        };
        services.sync_phone();
        outcome
    }
}
