//! Configuration, tenant table, and logging setup shared by the auth crates.

mod config;
mod error;
mod logging;

pub use config::{
    Config, TenantConfig, TenantTable, DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS, DEFAULT_LOG_LEVEL,
    DEFAULT_RECAPTCHA_CONTAINER_ID, DEFAULT_TOKEN_EXPIRY_SKEW_SECS, MAX_TOKEN_EXPIRY_SKEW_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogFormat};
