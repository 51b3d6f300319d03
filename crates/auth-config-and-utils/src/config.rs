//! Configuration for the auth runtime and the per-community tenant table.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Tokens are treated as expired this many seconds before their literal expiry.
pub const DEFAULT_TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Largest accepted expiry skew. Identity tokens live for an hour.
pub const MAX_TOKEN_EXPIRY_SKEW_SECS: i64 = 3600;

/// How often the expiration handler polls stored token expiry.
pub const DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS: u64 = 30;

/// DOM container the phone provider renders its reCAPTCHA widget into.
pub const DEFAULT_RECAPTCHA_CONTAINER_ID: &str = "recaptcha-container";

const DEFAULT_API_URL: &str = "http://localhost:3000/graphql";
const DEFAULT_LIFF_LOGIN_ENDPOINT: &str = "http://localhost:3000/line/liff-login";

/// Identity binding for one community.
///
/// Each community maps to exactly one identity-provider tenant and one LIFF
/// client id. A `LiffService` is bound to one of these at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Community identifier used by the rest of the app.
    pub community_id: String,
    /// Identity-provider tenant id. `None` for the provider's default tenant.
    #[serde(default)]
    pub firebase_tenant_id: Option<String>,
    /// LIFF app id (in-app browser client id).
    pub liff_id: String,
}

/// Tenant configuration table keyed by community id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantTable {
    tenants: Vec<TenantConfig>,
}

impl TenantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the tenant for a community.
    pub fn get(&self, community_id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.community_id == community_id)
    }

    /// Insert or replace the entry for `tenant.community_id`.
    pub fn insert(&mut self, tenant: TenantConfig) {
        match self
            .tenants
            .iter_mut()
            .find(|t| t.community_id == tenant.community_id)
        {
            Some(existing) => *existing = tenant,
            None => self.tenants.push(tenant),
        }
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TenantConfig> {
        self.tenants.iter()
    }

    fn validate(&self) -> CoreResult<()> {
        for (index, tenant) in self.tenants.iter().enumerate() {
            if tenant.community_id.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "tenant #{} has an empty community_id",
                    index
                )));
            }
            if tenant.liff_id.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "tenant {} has an empty liff_id",
                    tenant.community_id
                )));
            }
            if self.tenants[..index]
                .iter()
                .any(|t| t.community_id == tenant.community_id)
            {
                return Err(CoreError::Config(format!(
                    "duplicate tenant entry for community {}",
                    tenant.community_id
                )));
            }
        }
        Ok(())
    }
}

/// Auth runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend GraphQL endpoint used for user lookups and sign up.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Endpoint that exchanges a LIFF access token for a custom token.
    #[serde(default = "default_liff_login_endpoint")]
    pub liff_login_endpoint: String,
    /// Negative skew applied when checking token expiry.
    #[serde(default = "default_token_expiry_skew_secs")]
    pub token_expiry_skew_secs: i64,
    /// Poll interval for the token expiration handler.
    #[serde(default = "default_expiration_check_interval_secs")]
    pub expiration_check_interval_secs: u64,
    /// reCAPTCHA container element id.
    #[serde(default = "default_recaptcha_container_id")]
    pub recaptcha_container_id: String,
    /// Community → tenant bindings.
    #[serde(default)]
    pub tenants: TenantTable,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_liff_login_endpoint() -> String {
    DEFAULT_LIFF_LOGIN_ENDPOINT.to_string()
}

fn default_token_expiry_skew_secs() -> i64 {
    DEFAULT_TOKEN_EXPIRY_SKEW_SECS
}

fn default_expiration_check_interval_secs() -> u64 {
    DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS
}

fn default_recaptcha_container_id() -> String {
    DEFAULT_RECAPTCHA_CONTAINER_ID.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            liff_login_endpoint: default_liff_login_endpoint(),
            token_expiry_skew_secs: DEFAULT_TOKEN_EXPIRY_SKEW_SECS,
            expiration_check_interval_secs: DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS,
            recaptcha_container_id: default_recaptcha_container_id(),
            tenants: TenantTable::default(),
        }
    }
}

impl Config {
    /// Create a Config with default values, then override from the process environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from an optional file, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Self::default(),
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific JSON file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Single-tenant deployments describe their only community with
    /// `COMMUNITY_ID`, `LIFF_ID`, and `FIREBASE_AUTH_TENANT_ID`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).and_then(non_empty);

        if let Some(level) = read("AUTH_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(api_url) = read("AUTH_API_URL") {
            self.api_url = api_url;
        }
        if let Some(endpoint) = read("LIFF_LOGIN_ENDPOINT") {
            self.liff_login_endpoint = endpoint;
        }
        if let Some(skew) = read("AUTH_TOKEN_EXPIRY_SKEW_SECS").and_then(|v| v.parse().ok()) {
            self.token_expiry_skew_secs = skew;
        }

        if let (Some(community_id), Some(liff_id)) = (read("COMMUNITY_ID"), read("LIFF_ID")) {
            self.tenants.insert(TenantConfig {
                community_id,
                firebase_tenant_id: read("FIREBASE_AUTH_TENANT_ID"),
                liff_id,
            });
        }
    }

    /// Check the values that would otherwise fail late at runtime.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_url()?;
        Url::parse(&self.liff_login_endpoint)?;
        if self.token_expiry_skew_secs < 0 {
            return Err(CoreError::Config(
                "token_expiry_skew_secs must not be negative".to_string(),
            ));
        }
        if self.token_expiry_skew_secs > MAX_TOKEN_EXPIRY_SKEW_SECS {
            return Err(CoreError::Config(format!(
                "token_expiry_skew_secs must be at most {}",
                MAX_TOKEN_EXPIRY_SKEW_SECS
            )));
        }
        if self.expiration_check_interval_secs == 0 {
            return Err(CoreError::Config(
                "expiration_check_interval_secs must be positive".to_string(),
            ));
        }
        if crate::parse_level(&self.log_level).is_none() {
            return Err(CoreError::Config(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        self.tenants.validate()
    }

    /// Get the backend API URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Resolve the tenant binding for a community.
    pub fn tenant(&self, community_id: &str) -> CoreResult<TenantConfig> {
        self.tenants
            .get(community_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownCommunity(community_id.to_string()))
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn tenant(community_id: &str, liff_id: &str) -> TenantConfig {
        TenantConfig {
            community_id: community_id.to_string(),
            firebase_tenant_id: Some(format!("{}-tenant", community_id)),
            liff_id: liff_id.to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.token_expiry_skew_secs, DEFAULT_TOKEN_EXPIRY_SKEW_SECS);
        assert_eq!(
            config.expiration_check_interval_secs,
            DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS
        );
        assert!(config.tenants.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_tenant_from_env() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("COMMUNITY_ID", "neo88"),
            ("LIFF_ID", "2000000000-abcdefgh"),
            ("FIREBASE_AUTH_TENANT_ID", "neo88-x1y2z"),
            ("AUTH_LOG_LEVEL", "debug"),
        ]));

        assert_eq!(config.log_level, "debug");
        let tenant = config.tenant("neo88").unwrap();
        assert_eq!(tenant.liff_id, "2000000000-abcdefgh");
        assert_eq!(tenant.firebase_tenant_id.as_deref(), Some("neo88-x1y2z"));
    }

    #[test]
    fn test_env_without_liff_id_adds_no_tenant() {
        let mut config = Config::default();
        config.apply_env(lookup(&[("COMMUNITY_ID", "neo88"), ("LIFF_ID", "  ")]));
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_unknown_community_is_error() {
        let config = Config::default();
        let err = config.tenant("missing").unwrap_err();
        assert!(matches!(err, CoreError::UnknownCommunity(ref id) if id == "missing"));
    }

    #[test]
    fn test_tenant_insert_replaces_existing() {
        let mut table = TenantTable::new();
        table.insert(tenant("a", "liff-a"));
        table.insert(tenant("b", "liff-b"));
        table.insert(tenant("a", "liff-a2"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a").unwrap().liff_id, "liff-a2");
    }

    #[test]
    fn test_multi_tenant_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let mut config = Config::default();
        config.tenants.insert(tenant("kibotcha", "liff-k"));
        config.tenants.insert(tenant("dais", "liff-d"));
        config.save(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.tenants.len(), 2);
        assert_eq!(loaded.tenant("dais").unwrap().liff_id, "liff-d");
    }

    #[test]
    fn test_load_from_file_uses_defaults_for_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{ "log_level": "warn", "tenants": [ { "community_id": "c", "liff_id": "l" } ] }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.recaptcha_container_id, DEFAULT_RECAPTCHA_CONTAINER_ID);
        assert_eq!(config.tenant("c").unwrap().firebase_tenant_id, None);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_validate_rejects_duplicate_tenants() {
        let mut config = Config::default();
        config.tenants = serde_json::from_str(
            r#"[ { "community_id": "c", "liff_id": "l1" }, { "community_id": "c", "liff_id": "l2" } ]"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url_and_skew() {
        let mut config = Config::default();
        config.api_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(CoreError::InvalidUrl(_))));

        let mut config = Config::default();
        config.token_expiry_skew_secs = -5;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_bounds_skew_from_env() {
        let mut config = Config::default();
        config.apply_env(lookup(&[("AUTH_TOKEN_EXPIRY_SKEW_SECS", "10000000000000")]));
        assert_eq!(config.token_expiry_skew_secs, 10_000_000_000_000);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        config.token_expiry_skew_secs = MAX_TOKEN_EXPIRY_SKEW_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = Config::default();
        config.log_level = "chatty".to_string();
        assert!(config.validate().is_err());
    }
}
