use super::harness::*;
use crate::{AuthenticationState, ExpirationCheck, SignUpProfile};
use auth_storage::{BrowserStorage, StorageKeys, StoredTokens, TokenFamily};
use chrono::Duration;
use std::sync::atomic::Ordering;

fn almost_an_hour() -> Duration {
    Duration::minutes(59) + Duration::seconds(30)
}

#[tokio::test]
async fn fresh_tokens_need_nothing() {
    let harness = TestHarness::new();
    let context = signed_in_context(&harness).await;
    harness.advance(Duration::minutes(30));

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::Fresh
    );
    assert_eq!(harness.identity.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lapsed_session_token_is_renewed_silently() {
    let harness = TestHarness::new();
    let context = signed_in_context(&harness).await;
    let states = record_states(&context);
    harness.advance(almost_an_hour());

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::LineRenewed
    );

    assert_eq!(
        *states.lock(),
        vec![
            AuthenticationState::LineAuthenticated,
            AuthenticationState::LineTokenExpired,
            AuthenticationState::LineAuthenticated,
        ]
    );
    let tokens = context.services().tokens();
    assert!(!tokens.is_expired(TokenFamily::Line));
    assert_eq!(
        tokens.tokens(TokenFamily::Line).unwrap().unwrap().access_token,
        "renewed-access"
    );
    assert_eq!(
        context
            .snapshot()
            .auth
            .line_tokens
            .map(|tokens| tokens.access_token),
        Some("renewed-access".to_string())
    );

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::Fresh
    );
    assert_eq!(harness.identity.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreadable_session_record_is_renewed() {
    let harness = TestHarness::new();
    let context = signed_in_context(&harness).await;
    harness
        .storage
        .set(StorageKeys::LINE_TOKENS, "{not json")
        .unwrap();

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::LineRenewed
    );
    assert_eq!(context.state(), AuthenticationState::LineAuthenticated);
    assert!(!context.services().tokens().is_expired(TokenFamily::Line));
}

#[tokio::test]
async fn failed_session_renewal_logs_out() {
    let harness = TestHarness::new();
    let context = phone_verified_context(&harness).await;
    harness.identity.fail_refresh.store(true, Ordering::SeqCst);
    harness.advance(almost_an_hour());

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::LoggedOut
    );

    assert_eq!(context.state(), AuthenticationState::Unauthenticated);
    let tokens = context.services().tokens();
    assert!(!tokens.has_auth_flag(TokenFamily::Line).unwrap());
    assert!(!tokens.has_auth_flag(TokenFamily::Phone).unwrap());
    assert!(tokens.phone_identity().unwrap().is_none());
    assert_eq!(harness.identity.sign_out_calls.load(Ordering::SeqCst), 1);
    let snapshot = context.snapshot();
    assert!(snapshot.auth.firebase_user.is_none());
    assert!(!snapshot.phone.is_verified);
}

#[tokio::test]
async fn lapsed_phone_token_is_renewed() {
    let harness = TestHarness::new();
    let context = phone_verified_context(&harness).await;
    harness.advance(almost_an_hour());
    let fresh_line = token_set(&harness.clock, Duration::hours(1), "line");
    context
        .services()
        .tokens()
        .save_tokens(TokenFamily::Line, &StoredTokens::from(&fresh_line))
        .unwrap();
    let states = record_states(&context);

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::PhoneRenewed
    );

    assert_eq!(
        *states.lock(),
        vec![
            AuthenticationState::PhoneAuthenticated,
            AuthenticationState::PhoneTokenExpired,
            AuthenticationState::PhoneAuthenticated,
        ]
    );
    assert_eq!(harness.phone.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.identity.refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        context
            .snapshot()
            .phone
            .phone_tokens
            .map(|tokens| tokens.access_token),
        Some("phone-renewed-access".to_string())
    );
}

#[tokio::test]
async fn failed_phone_renewal_is_retried() {
    let harness = TestHarness::new();
    let context = phone_verified_context(&harness).await;
    harness.advance(almost_an_hour());
    let fresh_line = token_set(&harness.clock, Duration::hours(1), "line");
    context
        .services()
        .tokens()
        .save_tokens(TokenFamily::Line, &StoredTokens::from(&fresh_line))
        .unwrap();
    harness.phone.fail_refresh.store(true, Ordering::SeqCst);
    let handler = context.expiration_handler();

    assert_eq!(handler.check_once().await, ExpirationCheck::PhoneRenewalFailed);
    assert_eq!(context.state(), AuthenticationState::PhoneTokenExpired);
    assert_eq!(
        context.snapshot().auth.authentication_state,
        AuthenticationState::PhoneTokenExpired
    );

    harness.phone.fail_refresh.store(false, Ordering::SeqCst);
    assert_eq!(handler.check_once().await, ExpirationCheck::PhoneRenewed);
    assert_eq!(context.state(), AuthenticationState::PhoneAuthenticated);
    assert_eq!(harness.phone.refresh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn registered_user_keeps_state_across_renewal() {
    let harness = TestHarness::new();
    let context = phone_verified_context(&harness).await;
    let user = context
        .actions()
        .create_user(SignUpProfile {
            name: "Hanako".to_string(),
            ..SignUpProfile::default()
        })
        .await
        .unwrap();
    assert_eq!(context.state(), AuthenticationState::UserRegistered);
    harness.advance(almost_an_hour());

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::LineRenewed
    );

    assert_eq!(context.state(), AuthenticationState::UserRegistered);
    assert_eq!(context.snapshot().auth.current_user, Some(user));
}

#[tokio::test]
async fn unauthenticated_state_is_never_checked() {
    let harness = TestHarness::new();
    let context = harness.web_context();
    assert_eq!(context.bootstrap().await, AuthenticationState::Unauthenticated);
    harness.advance(Duration::days(1));

    assert_eq!(
        context.expiration_handler().check_once().await,
        ExpirationCheck::Fresh
    );
    assert_eq!(harness.identity.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn spawned_handler_renews_on_its_first_tick() {
    let harness = TestHarness::new();
    let context = signed_in_context(&harness).await;
    harness.advance(almost_an_hour());

    let handles = context.spawn_side_effects();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    assert_eq!(harness.identity.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(context.state(), AuthenticationState::LineAuthenticated);
    assert!(!context.services().tokens().is_expired(TokenFamily::Line));
    handles.shutdown();
}
