//! Storage key constants.

/// Keys written to browser storage by the auth subsystem.
pub struct StorageKeys;

impl StorageKeys {
    /// Flag set while the LINE-backed primary session is valid
    pub const LINE_AUTHENTICATED: &'static str = "line_authenticated";

    /// Flag set once the phone number has been verified
    pub const PHONE_AUTHENTICATED: &'static str = "phone_authenticated";

    /// Primary session token record (JSON)
    pub const LINE_TOKENS: &'static str = "line_tokens";

    /// Phone verification token record (JSON)
    pub const PHONE_TOKENS: &'static str = "phone_tokens";

    /// Verified phone number and provider uid (JSON)
    pub const PHONE_IDENTITY: &'static str = "phone_identity";

    /// Every key the subsystem owns, cleared together on logout.
    pub const ALL: [&'static str; 5] = [
        Self::LINE_AUTHENTICATED,
        Self::PHONE_AUTHENTICATED,
        Self::LINE_TOKENS,
        Self::PHONE_TOKENS,
        Self::PHONE_IDENTITY,
    ];
}
