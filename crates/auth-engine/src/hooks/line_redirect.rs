use crate::redirect::RedirectEvidence;
use crate::runtime::AuthServices;
use crate::sdk::BrowserLocation;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Reads the page URL once and decides whether redirect processing may
/// mount at all.
pub struct LineAuthRedirectDetection {
    evidence: Option<RedirectEvidence>,
    processed: Arc<OnceCell<bool>>,
}

impl LineAuthRedirectDetection {
    pub fn new(evidence: Option<RedirectEvidence>) -> Self {
        Self {
            evidence,
            processed: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_location(location: &dyn BrowserLocation) -> Self {
        let evidence = location
            .current_url()
            .as_ref()
            .and_then(RedirectEvidence::from_url);
        if evidence.is_some() {
            debug!("Page loaded as a LINE login callback");
        }
        Self::new(evidence)
    }

    pub fn has_evidence(&self) -> bool {
        self.evidence.is_some()
    }

    pub fn evidence(&self) -> Option<&RedirectEvidence> {
        self.evidence.as_ref()
    }

    /// `None` unless the URL carried callback evidence. Every mount shares
    /// one once-only run.
    pub fn mount_processing(&self, services: Arc<AuthServices>) -> Option<LineAuthProcessing> {
        let evidence = self.evidence.clone()?;
        Some(LineAuthProcessing {
            evidence,
            services,
            processed: self.processed.clone(),
        })
    }

    /// Result of the processing run, once it has finished.
    pub fn processed(&self) -> Option<bool> {
        self.processed.get().copied()
    }
}

/// Consumes the callback: strips the URL, then exchanges the LIFF token.
pub struct LineAuthProcessing {
    evidence: RedirectEvidence,
    services: Arc<AuthServices>,
    processed: Arc<OnceCell<bool>>,
}

impl LineAuthProcessing {
    /// Runs the exchange on the first call; later calls, from this or any
    /// other mount, wait for and return that first result.
    pub async fn run(&self) -> bool {
        *self.processed.get_or_init(|| self.process()).await
    }

    async fn process(&self) -> bool {
        let services = &self.services;
        services.location.replace_url(&self.evidence.stripped_url());
        services.store.set_authenticating(true);

        let signed_in = services.liff.initialize().await
            && services
                .liff
                .sign_in_with_liff_token(services.tenant_id())
                .await;
        let established = signed_in && services.establish_session("line redirect").await;

        services.store.set_authenticating(false);
        services.sync_liff();

        if established {
            info!(community_id = %services.tenant.community_id, "LINE login callback processed");
        } else {
            warn!(community_id = %services.tenant.community_id, "LINE login callback could not be completed");
        }
        established
    }
}
