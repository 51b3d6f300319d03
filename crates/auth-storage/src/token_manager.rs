//! Token expiry tracking and the authoritative "clear everything" primitive.

use crate::{BrowserStorage, Clock, StorageError, StorageKeys, StorageResult, SystemClock};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on the expiry skew.
pub const MAX_SKEW_SECS: i64 = 3600;

/// The two independently expiring token families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFamily {
    /// Primary identity-provider session obtained through LINE.
    Line,
    /// Phone verification session.
    Phone,
}

impl TokenFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenFamily::Line => "line",
            TokenFamily::Phone => "phone",
        }
    }

    fn flag_key(self) -> &'static str {
        match self {
            TokenFamily::Line => StorageKeys::LINE_AUTHENTICATED,
            TokenFamily::Phone => StorageKeys::PHONE_AUTHENTICATED,
        }
    }

    fn tokens_key(self) -> &'static str {
        match self {
            TokenFamily::Line => StorageKeys::LINE_TOKENS,
            TokenFamily::Phone => StorageKeys::PHONE_TOKENS,
        }
    }
}

/// A persisted token record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Verified phone identity, kept so a reload can restore the phone step.
///
/// `owner_uid` is the identity-provider uid the number was verified under.
/// Records written before it existed deserialize with an empty owner and
/// never match a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneIdentity {
    pub phone_number: String,
    pub phone_uid: String,
    #[serde(default)]
    pub owner_uid: String,
}

impl PhoneIdentity {
    pub fn is_owned_by(&self, uid: &str) -> bool {
        !self.owner_uid.is_empty() && self.owner_uid == uid
    }
}

/// Flags and expiry instants read together under one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthFlagSnapshot {
    pub line_authenticated: bool,
    pub phone_authenticated: bool,
    pub line_expires_at: Option<DateTime<Utc>>,
    pub phone_expires_at: Option<DateTime<Utc>>,
}

/// Tracks token expiry for both families on top of browser storage.
///
/// All writes go through a write lock and multi-key reads through a read
/// lock, so `clear_all_auth_flags` is atomic with respect to observers.
pub struct TokenManager {
    storage: Box<dyn BrowserStorage>,
    gate: RwLock<()>,
    clock: Arc<dyn Clock>,
    skew: Duration,
}

impl TokenManager {
    /// Create a token manager. `skew_secs` is how long before the literal
    /// expiry a token already counts as expired, clamped to
    /// `0..=MAX_SKEW_SECS`.
    pub fn new(storage: Box<dyn BrowserStorage>, clock: Arc<dyn Clock>, skew_secs: i64) -> Self {
        let clamped = skew_secs.clamp(0, MAX_SKEW_SECS);
        if clamped != skew_secs {
            warn!(requested = skew_secs, applied = clamped, "Token expiry skew out of range");
        }
        Self {
            storage,
            gate: RwLock::new(()),
            clock,
            skew: Duration::seconds(clamped),
        }
    }

    pub fn with_system_clock(storage: Box<dyn BrowserStorage>, skew_secs: i64) -> Self {
        Self::new(storage, Arc::new(SystemClock), skew_secs)
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Persist a token record and raise the family's auth flag.
    pub fn save_tokens(&self, family: TokenFamily, tokens: &StoredTokens) -> StorageResult<()> {
        let encoded = serde_json::to_string(tokens)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let _guard = self.gate.write();
        self.storage.set(family.tokens_key(), &encoded)?;
        self.storage.set(family.flag_key(), "true")?;
        debug!(
            family = family.as_str(),
            expires_at = %tokens.expires_at,
            "Stored auth tokens"
        );
        Ok(())
    }

    /// Read the stored token record for a family.
    pub fn tokens(&self, family: TokenFamily) -> StorageResult<Option<StoredTokens>> {
        let _guard = self.gate.read();
        self.read_tokens(family)
    }

    fn read_tokens(&self, family: TokenFamily) -> StorageResult<Option<StoredTokens>> {
        match self.storage.get(family.tokens_key())? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn has_auth_flag(&self, family: TokenFamily) -> StorageResult<bool> {
        let _guard = self.gate.read();
        self.storage.has(family.flag_key())
    }

    /// Whether the family's token is expired (or missing, or unreadable).
    ///
    /// The check fires `skew` before the literal expiry so a request is never
    /// sent with a token that lapses mid-flight.
    pub fn is_expired(&self, family: TokenFamily) -> bool {
        match self.tokens(family) {
            Ok(Some(tokens)) => self.is_past_deadline(tokens.expires_at),
            Ok(None) => true,
            Err(e) => {
                warn!(family = family.as_str(), error = %e, "Unreadable token record, treating as expired");
                true
            }
        }
    }

    /// Expiry check for an instant that was not read from storage.
    pub fn is_past_deadline(&self, expires_at: DateTime<Utc>) -> bool {
        expires_at
            .checked_sub_signed(self.skew)
            .map_or(true, |deadline| self.clock.now() >= deadline)
    }

    pub fn save_phone_identity(&self, identity: &PhoneIdentity) -> StorageResult<()> {
        let encoded = serde_json::to_string(identity)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let _guard = self.gate.write();
        self.storage.set(StorageKeys::PHONE_IDENTITY, &encoded)
    }

    pub fn phone_identity(&self) -> StorageResult<Option<PhoneIdentity>> {
        let _guard = self.gate.read();
        match self.storage.get(StorageKeys::PHONE_IDENTITY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }

    /// Read both flags and both expiry instants consistently.
    pub fn snapshot(&self) -> StorageResult<AuthFlagSnapshot> {
        let _guard = self.gate.read();
        Ok(AuthFlagSnapshot {
            line_authenticated: self.storage.has(TokenFamily::Line.flag_key())?,
            phone_authenticated: self.storage.has(TokenFamily::Phone.flag_key())?,
            line_expires_at: self.read_tokens(TokenFamily::Line)?.map(|t| t.expires_at),
            phone_expires_at: self.read_tokens(TokenFamily::Phone)?.map(|t| t.expires_at),
        })
    }

    /// Drop one family's flag and tokens.
    pub fn clear_family(&self, family: TokenFamily) -> StorageResult<()> {
        let _guard = self.gate.write();
        let mut keys = vec![family.flag_key(), family.tokens_key()];
        if family == TokenFamily::Phone {
            keys.push(StorageKeys::PHONE_IDENTITY);
        }
        self.storage.delete_many(&keys)
    }

    /// Clear every auth flag and token record in one step.
    pub fn clear_all_auth_flags(&self) -> StorageResult<()> {
        let _guard = self.gate.write();
        self.storage.delete_many(&StorageKeys::ALL)?;
        debug!("Cleared all auth flags");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, MemoryStorage};
    use std::thread;

    fn manager_at(now: DateTime<Utc>) -> (TokenManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let manager = TokenManager::new(Box::new(MemoryStorage::new()), clock.clone(), 60);
        (manager, clock)
    }

    fn tokens_expiring(at: DateTime<Utc>) -> StoredTokens {
        StoredTokens {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: at,
        }
    }

    #[test]
    fn test_missing_tokens_are_expired() {
        let (manager, _) = manager_at(Utc::now());
        assert!(manager.is_expired(TokenFamily::Line));
        assert!(manager.is_expired(TokenFamily::Phone));
        assert!(!manager.has_auth_flag(TokenFamily::Line).unwrap());
    }

    #[test]
    fn test_expiry_honours_skew() {
        let now = Utc::now();
        let (manager, clock) = manager_at(now);
        manager
            .save_tokens(TokenFamily::Line, &tokens_expiring(now + Duration::minutes(10)))
            .unwrap();
        assert!(!manager.is_expired(TokenFamily::Line));

        // 30s before the literal expiry is inside the 60s buffer.
        clock.set(now + Duration::minutes(10) - Duration::seconds(30));
        assert!(manager.is_expired(TokenFamily::Line));

        clock.set(now + Duration::minutes(10) - Duration::seconds(61));
        assert!(!manager.is_expired(TokenFamily::Line));
    }

    #[test]
    fn test_oversized_skew_is_clamped() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let manager = TokenManager::new(
            Box::new(MemoryStorage::new()),
            clock.clone(),
            10_000_000_000_000,
        );
        assert_eq!(manager.skew(), Duration::seconds(MAX_SKEW_SECS));

        manager
            .save_tokens(TokenFamily::Line, &tokens_expiring(now + Duration::hours(2)))
            .unwrap();
        assert!(!manager.is_expired(TokenFamily::Line));
        clock.set(now + Duration::minutes(61));
        assert!(manager.is_expired(TokenFamily::Line));
    }

    #[test]
    fn test_deadline_before_representable_range_is_expired() {
        let (manager, _) = manager_at(Utc::now());
        assert!(manager.is_past_deadline(DateTime::<Utc>::MIN_UTC));
    }

    #[test]
    fn test_families_are_independent() {
        let now = Utc::now();
        let (manager, _) = manager_at(now);
        manager
            .save_tokens(TokenFamily::Line, &tokens_expiring(now + Duration::hours(1)))
            .unwrap();
        manager
            .save_tokens(TokenFamily::Phone, &tokens_expiring(now - Duration::hours(1)))
            .unwrap();

        assert!(!manager.is_expired(TokenFamily::Line));
        assert!(manager.is_expired(TokenFamily::Phone));

        manager.clear_family(TokenFamily::Phone).unwrap();
        assert!(!manager.has_auth_flag(TokenFamily::Phone).unwrap());
        assert!(manager.has_auth_flag(TokenFamily::Line).unwrap());
    }

    #[test]
    fn test_corrupt_record_counts_as_expired() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::LINE_TOKENS, "{not json").unwrap();
        let manager = TokenManager::with_system_clock(Box::new(storage), 60);

        assert!(manager.tokens(TokenFamily::Line).is_err());
        assert!(manager.is_expired(TokenFamily::Line));
    }

    #[test]
    fn test_phone_identity_without_owner_matches_nobody() {
        let storage = MemoryStorage::new();
        storage
            .set(
                StorageKeys::PHONE_IDENTITY,
                r#"{"phone_number":"+819012345678","phone_uid":"phone-uid"}"#,
            )
            .unwrap();
        let manager = TokenManager::with_system_clock(Box::new(storage), 60);

        let identity = manager.phone_identity().unwrap().unwrap();
        assert_eq!(identity.owner_uid, "");
        assert!(!identity.is_owned_by(""));
        assert!(!identity.is_owned_by("line-user"));
    }

    #[test]
    fn test_clear_all_auth_flags() {
        let now = Utc::now();
        let (manager, _) = manager_at(now);
        manager
            .save_tokens(TokenFamily::Line, &tokens_expiring(now + Duration::hours(1)))
            .unwrap();
        manager
            .save_tokens(TokenFamily::Phone, &tokens_expiring(now + Duration::hours(1)))
            .unwrap();
        manager
            .save_phone_identity(&PhoneIdentity {
                phone_number: "+819012345678".to_string(),
                phone_uid: "phone-uid".to_string(),
                owner_uid: "line-user".to_string(),
            })
            .unwrap();

        manager.clear_all_auth_flags().unwrap();

        assert_eq!(manager.snapshot().unwrap(), AuthFlagSnapshot::default());
        assert!(manager.phone_identity().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_never_observes_partial_clear() {
        let now = Utc::now();
        let (manager, _) = manager_at(now);
        let manager = Arc::new(manager);
        manager
            .save_tokens(TokenFamily::Line, &tokens_expiring(now + Duration::hours(1)))
            .unwrap();
        manager
            .save_tokens(TokenFamily::Phone, &tokens_expiring(now + Duration::hours(1)))
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = manager.snapshot().unwrap();
                        assert_eq!(snap.line_authenticated, snap.phone_authenticated);
                        assert_eq!(snap.line_expires_at.is_some(), snap.line_authenticated);
                    }
                })
            })
            .collect();

        manager.clear_all_auth_flags().unwrap();

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
