use ewerelay_session::{SessionError, SessionStore};

#[tokio::test]
async fn session_smoke_login_flow() {
    let store = SessionStore::new();
    let session = store.get_or_create(None).await;
    assert!(!session.is_authenticated());

    let state = store.begin_authorization(&session.id).await.unwrap();
    store.verify_state(&session.id, &state).await.unwrap();
    store
        .attach_token(&session.id, "tok123".to_string(), "as".to_string())
        .await
        .unwrap();

    let session = store.get(&session.id).await.unwrap();
    assert_eq!(session.access_token.as_deref(), Some("tok123"));
    assert_eq!(session.region.as_deref(), Some("as"));
    assert!(session.oauth_state.is_none());
}

#[tokio::test]
async fn session_smoke_relogin_keeps_session_id() {
    let store = SessionStore::new();
    let session = store.get_or_create(None).await;
    let first = store.begin_authorization(&session.id).await.unwrap();

    let again = store.get_or_create(Some(&session.id)).await;
    let second = store.begin_authorization(&again.id).await.unwrap();

    assert_eq!(again.id, session.id);
    assert_eq!(
        store.verify_state(&session.id, &first).await,
        Err(SessionError::StateMismatch)
    );
    assert_eq!(store.count().await, 1);
    assert_ne!(first, second);
}

#[tokio::test]
async fn session_smoke_removed_session_is_gone() {
    let store = SessionStore::new();
    let session = store.create().await;
    assert!(store.remove(&session.id).await.is_some());
    assert!(store.get(&session.id).await.is_none());
    assert_eq!(
        store.ensure_user_id(&session.id).await,
        Err(SessionError::UnknownSession)
    );
}
