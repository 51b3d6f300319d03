//! Runtime environment detection.
//!
//! The auth subsystem behaves differently inside the LINE in-app browser
//! (LIFF), where login happens through the LIFF SDK without leaving the page,
//! than in an ordinary browser, where LINE login is an OAuth redirect.
//! Detection is pure: it only looks at the signals it is handed.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

/// Host serving LIFF apps opened through `https://liff.line.me/<liff-id>`.
pub const LIFF_HOST: &str = "liff.line.me";

/// Where the auth subsystem is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEnvironment {
    /// Ordinary browser, or no browser at all (server-side rendering).
    #[default]
    Web,
    /// LINE in-app browser.
    Liff,
}

impl AuthEnvironment {
    pub fn is_liff(self) -> bool {
        matches!(self, AuthEnvironment::Liff)
    }
}

/// Browser signals available at detection time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSignals {
    pub user_agent: Option<String>,
    pub url: Option<Url>,
}

impl RuntimeSignals {
    pub fn new(user_agent: Option<String>, url: Option<Url>) -> Self {
        Self { user_agent, url }
    }

    /// Convenience constructor that parses `url`; an unparsable URL is dropped.
    pub fn from_parts(user_agent: Option<&str>, url: Option<&str>) -> Self {
        Self {
            user_agent: user_agent.map(str::to_string),
            url: url.and_then(|raw| Url::parse(raw).ok()),
        }
    }
}

/// Classify the runtime. `None` means no browser context and yields `Web`.
pub fn detect(signals: Option<&RuntimeSignals>) -> AuthEnvironment {
    let Some(signals) = signals else {
        return AuthEnvironment::Web;
    };

    let in_line_client = signals
        .user_agent
        .as_deref()
        .map(has_line_product_token)
        .unwrap_or(false);
    let on_liff_host = signals
        .url
        .as_ref()
        .and_then(|url| url.host_str())
        .map(|host| host.eq_ignore_ascii_case(LIFF_HOST))
        .unwrap_or(false);

    if in_line_client || on_liff_host {
        AuthEnvironment::Liff
    } else {
        AuthEnvironment::Web
    }
}

/// The LINE in-app browser appends a `Line/<version>` product token to the
/// user agent. Matching whole tokens keeps `Online/1.0` from counting.
fn has_line_product_token(user_agent: &str) -> bool {
    user_agent.split_whitespace().any(|token| {
        token
            .split_once('/')
            .map(|(product, version)| {
                product.eq_ignore_ascii_case("line")
                    && version.chars().next().is_some_and(|c| c.is_ascii_digit())
            })
            .unwrap_or(false)
    })
}

/// Memoised detector.
///
/// Each instance caches its own answer; there is no process-wide cache, so a
/// tenant switch or a test builds a new detector and re-evaluates.
#[derive(Debug, Default)]
pub struct EnvironmentDetector {
    signals: Option<RuntimeSignals>,
    detected: OnceLock<AuthEnvironment>,
}

impl EnvironmentDetector {
    pub fn new(signals: RuntimeSignals) -> Self {
        Self {
            signals: Some(signals),
            detected: OnceLock::new(),
        }
    }

    /// Detector for a context without a browser (server-side rendering).
    pub fn server_side() -> Self {
        Self::default()
    }

    pub fn detect(&self) -> AuthEnvironment {
        *self.detected.get_or_init(|| {
            let environment = detect(self.signals.as_ref());
            tracing::debug!(?environment, "Detected auth environment");
            environment
        })
    }

    pub fn signals(&self) -> Option<&RuntimeSignals> {
        self.signals.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 Safari Line/13.16.0 LIFF";
    const SAFARI_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

    #[test]
    fn no_browser_context_is_web() {
        assert_eq!(detect(None), AuthEnvironment::Web);
        assert_eq!(EnvironmentDetector::server_side().detect(), AuthEnvironment::Web);
    }

    #[test]
    fn line_user_agent_is_liff() {
        let signals = RuntimeSignals::from_parts(Some(LINE_UA), Some("https://app.example.com/"));
        assert_eq!(detect(Some(&signals)), AuthEnvironment::Liff);
    }

    #[test]
    fn ordinary_browser_is_web() {
        let signals = RuntimeSignals::from_parts(Some(SAFARI_UA), Some("https://app.example.com/"));
        assert_eq!(detect(Some(&signals)), AuthEnvironment::Web);
    }

    #[test]
    fn lookalike_tokens_are_not_liff() {
        let signals = RuntimeSignals::from_parts(Some("Mozilla/5.0 Online/1.0 Lines/2.0"), None);
        assert_eq!(detect(Some(&signals)), AuthEnvironment::Web);
    }

    #[test]
    fn liff_host_is_liff() {
        let signals =
            RuntimeSignals::from_parts(Some(SAFARI_UA), Some("https://liff.line.me/1234-abcd"));
        assert_eq!(detect(Some(&signals)), AuthEnvironment::Liff);
    }

    #[test]
    fn detector_memoises_per_instance() {
        let liff = EnvironmentDetector::new(RuntimeSignals::from_parts(Some(LINE_UA), None));
        let web = EnvironmentDetector::new(RuntimeSignals::from_parts(Some(SAFARI_UA), None));

        assert_eq!(liff.detect(), AuthEnvironment::Liff);
        assert_eq!(liff.detect(), AuthEnvironment::Liff);
        assert_eq!(web.detect(), AuthEnvironment::Web);
    }

    #[test]
    fn environment_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&AuthEnvironment::Liff).unwrap(), "\"LIFF\"");
        assert_eq!(serde_json::to_string(&AuthEnvironment::Web).unwrap(), "\"WEB\"");
    }
}
