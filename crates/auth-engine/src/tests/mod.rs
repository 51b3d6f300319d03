//! Integration tests for the auth engine.
//!
//! - `harness.rs`    - Fake SDKs, fake backend, fake location and a context builder
//! - `scenarios.rs`  - End-to-end flows from a fresh tab to a registered user
//! - `concurrency.rs` - Coalesced LIFF init, challenge supersession, listener isolation
//! - `redirect.rs`   - Callback gating and once-only processing
//! - `expiration.rs` - Expiry detection, silent renewal and forced logout

mod expiration;
