//! The session manager: access gate, renewal binder, and the operations
//! exposed to the surrounding application.
//!
//! One manager owns one [`SessionState`] for its whole lifetime. Every
//! mutation goes through the state's mutation operations under a single
//! mutex with short critical sections; the lock is never held across an
//! await. The renewal binder's check-then-set of the `events_bound` latch
//! and both handler registrations happen inside one critical section, so
//! handlers are registered exactly once no matter how often a session is
//! re-established.

use crate::client::{EventHandler, Identity, IdentityClient};
use crate::error::{AccessError, SettingsError};
use crate::events::{ClientEvent, EventSink};
use crate::route::NavigationRequest;
use crate::settings::OidcSettings;
use crate::state::SessionState;
use crate::store::{ACTIVE_ROUTE_KEY, KeyValueStore, MemoryStore};
use chrono::{DateTime, Utc};
use portcullis_core::{Result, SubscriptionId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument, warn};

/// Manages the authentication state of the current user session and gates
/// navigation against it.
///
/// Cheap to clone behind its internal `Arc`; all clones share one state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    settings: OidcSettings,
    client: Arc<dyn IdentityClient>,
    store: Arc<dyn KeyValueStore>,
    sink: Option<Arc<dyn EventSink>>,
    listeners: HashMap<ClientEvent, EventHandler>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Creates a builder for a manager using the given settings and client.
    #[must_use]
    pub fn builder(settings: OidcSettings, client: Arc<dyn IdentityClient>) -> SessionManagerBuilder {
        SessionManagerBuilder::new(settings, client)
    }

    /// Decides whether the pending navigation is allowed.
    ///
    /// Callback routes bypass the gate entirely. Otherwise the decision
    /// reconciles the stored session, a freshly fetched identity, and the
    /// route's visibility: a valid identity grants access and re-runs the
    /// renewal binder; an absent or expired identity grants access on
    /// public routes (kicking off a best-effort silent renewal when one is
    /// configured) and denies it elsewhere, persisting the target and
    /// starting redirect login.
    #[instrument(skip_all, fields(path = %route.path()))]
    pub async fn check_access(&self, route: &NavigationRequest) -> bool {
        if route.is_oidc_callback() {
            debug!("callback route bypasses the access gate");
            return true;
        }

        // Snapshot before the fetch: the transition notification below
        // must be judged against the pre-fetch state.
        let was_authenticated = self.inner.state().is_authenticated();
        let user = self.inner.client.current_user().await;

        match user {
            Some(user) if !user.is_expired() => {
                ManagerInner::user_established(&self.inner, &user);
                if !was_authenticated {
                    debug!("session transitioned to authenticated");
                    self.inner.notify_user_loaded(&user);
                }
                true
            }
            _ => {
                if was_authenticated {
                    self.inner.state().clear_authenticated();
                }
                if route.is_public() {
                    if self.inner.settings.silent_redirect_uri().is_some() {
                        debug!("public route with expired session, renewing silently");
                        ManagerInner::spawn_silent_login(&self.inner);
                    }
                    true
                } else {
                    self.inner.begin_login(&route.full_target()).await;
                    false
                }
            }
        }
    }

    /// Persists the post-login destination and starts redirect login.
    ///
    /// A failure to start the redirect is absorbed into session state.
    pub async fn begin_login(&self, redirect_path: &str) {
        self.inner.begin_login(redirect_path).await;
    }

    /// Completes the login callback and returns the persisted post-login
    /// destination (`/` when none was stored).
    ///
    /// # Errors
    ///
    /// A malformed or failed callback is recorded in session state, the
    /// state is still marked checked, and the failure propagates so the
    /// application can show a failure view.
    #[instrument(skip(self))]
    pub async fn complete_login_callback(&self) -> Result<String, AccessError> {
        match self.inner.client.complete_redirect_login().await {
            Ok(user) => {
                ManagerInner::user_established(&self.inner, &user);
                Ok(self
                    .inner
                    .store
                    .get(ACTIVE_ROUTE_KEY)
                    .unwrap_or_else(|| "/".to_string()))
            }
            Err(error) => {
                warn!(%error, "login callback failed");
                let reason = error.to_string();
                {
                    let mut state = self.inner.state();
                    state.set_error(&error);
                    state.mark_checked();
                }
                Err(AccessError::Callback { reason }.into())
            }
        }
    }

    /// Renews the session without visible navigation.
    ///
    /// Failures never interrupt the current page: they are recorded in
    /// session state and the state is marked checked.
    pub async fn begin_silent_login(&self) {
        ManagerInner::authenticate_silent(Arc::clone(&self.inner)).await;
    }

    /// Signs the user out and clears the session on success.
    ///
    /// A logout failure is absorbed into session state.
    pub async fn sign_out(&self) {
        match self.inner.client.begin_logout().await {
            Ok(()) => self.inner.state().clear_authenticated(),
            Err(error) => {
                warn!(%error, "sign-out failed");
                self.inner.state().set_error(&error);
            }
        }
    }

    /// Forces a profile refresh from the identity client.
    ///
    /// Returns the fetched profile; the stored profile is replaced either
    /// way. Authentication state is untouched.
    pub async fn refresh_user(&self) -> Option<Value> {
        let profile = self
            .inner
            .client
            .current_user()
            .await
            .and_then(|user| user.profile);
        self.inner.state().set_profile(profile.clone());
        profile
    }

    /// Registers a handler for an identity-client event.
    pub fn add_event_listener(&self, event: ClientEvent, handler: EventHandler) -> SubscriptionId {
        self.inner.client.subscribe(event, handler)
    }

    /// Removes a previously registered handler. Unknown ids are ignored.
    pub fn remove_event_listener(&self, event: ClientEvent, id: SubscriptionId) {
        self.inner.client.unsubscribe(event, id);
    }

    /// Returns true when the session holds an ID token.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state().is_authenticated()
    }

    /// Returns the current access token, or `None` if it has expired.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.inner.state().access_token().map(str::to_string)
    }

    /// Returns the access token's expiry instant, if known.
    #[must_use]
    pub fn access_token_expiry(&self) -> Option<DateTime<Utc>> {
        self.inner.state().access_token_expiry()
    }

    /// Returns the current ID token, or `None` if it has expired.
    #[must_use]
    pub fn id_token(&self) -> Option<String> {
        self.inner.state().id_token().map(str::to_string)
    }

    /// Returns the ID token's expiry instant, if known.
    #[must_use]
    pub fn id_token_expiry(&self) -> Option<DateTime<Utc>> {
        self.inner.state().id_token_expiry()
    }

    /// Returns the user profile claims, if present.
    #[must_use]
    pub fn profile(&self) -> Option<Value> {
        self.inner.state().profile().cloned()
    }

    /// Returns true once an access decision has completed.
    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.inner.state().is_checked()
    }

    /// Returns the last absorbed failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.state().last_error().map(str::to_string)
    }
}

impl ManagerInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state lock poisoned")
    }

    /// The renewal binder: adopts a confirmed-valid identity and, exactly
    /// once per manager lifetime, registers the renewal handlers.
    ///
    /// The `events_bound` check, both subscriptions, and the latch set all
    /// happen under one lock acquisition with no suspension point, so two
    /// interleaved establishments cannot double-subscribe.
    fn user_established(inner: &Arc<Self>, user: &Identity) {
        let mut state = inner.state();
        state.set_authenticated(user);
        if !state.events_bound() {
            let weak = Arc::downgrade(inner);
            let on_expired: EventHandler = Arc::new(move |_detail| {
                if let Some(inner) = weak.upgrade() {
                    debug!("access token expired, clearing session");
                    inner.state().clear_authenticated();
                }
            });
            inner
                .client
                .subscribe(ClientEvent::AccessTokenExpired, on_expired);

            if inner.settings.automatic_silent_renew() {
                let weak = Arc::downgrade(inner);
                let on_expiring: EventHandler = Arc::new(move |_detail| {
                    if let Some(inner) = weak.upgrade() {
                        debug!("access token expiring, renewing silently");
                        Self::spawn_silent_login(&inner);
                    }
                });
                inner
                    .client
                    .subscribe(ClientEvent::AccessTokenExpiring, on_expiring);
            }
            state.mark_events_bound();
        }
        state.mark_checked();
    }

    /// Invokes the registered user-loaded listener and forwards through
    /// the event bridge. Only called on the transition into the
    /// authenticated state.
    fn notify_user_loaded(&self, user: &Identity) {
        let detail =
            serde_json::to_value(user).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        if let Some(handler) = self.listeners.get(&ClientEvent::UserLoaded) {
            handler(&detail);
        }
        if let Some(sink) = &self.sink {
            sink.dispatch(&ClientEvent::UserLoaded.channel_name(), &detail);
        }
    }

    async fn begin_login(&self, target: &str) {
        self.store.put(ACTIVE_ROUTE_KEY, target);
        if let Err(error) = self.client.begin_redirect_login().await {
            warn!(%error, "redirect login failed to start");
            self.state().set_error(&error);
        }
    }

    async fn authenticate_silent(inner: Arc<Self>) {
        match inner.client.begin_silent_login().await {
            Ok(user) => Self::user_established(&inner, &user),
            Err(error) => {
                warn!(%error, "silent login failed");
                let mut state = inner.state();
                state.set_error(&error);
                state.mark_checked();
            }
        }
    }

    /// Fire-and-forget silent renewal; its outcome lands in state whenever
    /// it completes. Navigation never waits on it.
    fn spawn_silent_login(inner: &Arc<Self>) {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Self::authenticate_silent(inner).await;
        });
    }
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    settings: OidcSettings,
    client: Arc<dyn IdentityClient>,
    store: Option<Arc<dyn KeyValueStore>>,
    sink: Option<Arc<dyn EventSink>>,
    listeners: HashMap<ClientEvent, EventHandler>,
}

impl SessionManagerBuilder {
    /// Creates a builder with the required settings and identity client.
    #[must_use]
    pub fn new(settings: OidcSettings, client: Arc<dyn IdentityClient>) -> Self {
        Self {
            settings,
            client,
            store: None,
            sink: None,
            listeners: HashMap::new(),
        }
    }

    /// Injects the durable key-value store. Defaults to [`MemoryStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enables the event bridge, forwarding every client event through
    /// the sink under its prefixed channel name.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Registers an initial listener for a client event. One listener per
    /// event; a later call for the same event replaces the earlier one.
    #[must_use]
    pub fn listener(mut self, event: ClientEvent, handler: EventHandler) -> Self {
        self.listeners.insert(event, handler);
        self
    }

    /// Validates the settings and builds the manager.
    ///
    /// # Errors
    ///
    /// Manager creation aborts with a [`SettingsError`] naming the first
    /// missing required setting.
    pub fn build(self) -> Result<SessionManager, SettingsError> {
        self.settings.validate()?;

        let inner = Arc::new(ManagerInner {
            settings: self.settings,
            client: self.client,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>),
            sink: self.sink,
            listeners: self.listeners,
            state: Mutex::new(SessionState::new()),
        });

        for (event, handler) in &inner.listeners {
            inner.client.subscribe(*event, handler.clone());
        }

        if let Some(sink) = &inner.sink {
            for event in ClientEvent::ALL {
                let sink = Arc::clone(sink);
                let forwarder: EventHandler = Arc::new(move |detail| {
                    sink.dispatch(&event.channel_name(), detail);
                });
                inner.client.subscribe(event, forwarder);
            }
        }

        Ok(SessionManager { inner })
    }
}

/// Router adapter: runs the access gate and invokes `proceed` only when
/// the navigation is allowed. Halting is simply not proceeding; the
/// route library owns what happens next.
pub async fn guard<F>(manager: &SessionManager, route: &NavigationRequest, proceed: F)
where
    F: FnOnce(),
{
    if manager.check_access(route).await {
        proceed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentityError;
    use crate::events::{BroadcastEventSink, EventRegistry};
    use crate::route::{META_OIDC_CALLBACK, META_PUBLIC};
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    /// Identity client stub with scriptable responses and call counters.
    #[derive(Default)]
    struct StubClient {
        user: Mutex<Option<Identity>>,
        callback_user: Mutex<Option<Identity>>,
        silent_user: Mutex<Option<Identity>>,
        fail_logout: bool,
        current_user_calls: AtomicUsize,
        redirect_calls: AtomicUsize,
        silent_calls: AtomicUsize,
        registry: EventRegistry,
    }

    impl StubClient {
        fn anonymous() -> Self {
            Self::default()
        }

        fn with_user(user: Identity) -> Self {
            Self {
                user: Mutex::new(Some(user)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl IdentityClient for StubClient {
        async fn current_user(&self) -> Option<Identity> {
            self.current_user_calls.fetch_add(1, Ordering::SeqCst);
            self.user.lock().expect("stub lock").clone()
        }

        async fn begin_redirect_login(&self) -> Result<(), IdentityError> {
            self.redirect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn complete_redirect_login(&self) -> Result<Identity, IdentityError> {
            match self.callback_user.lock().expect("stub lock").clone() {
                Some(user) => Ok(user),
                None => Err(IdentityError::Callback {
                    reason: "malformed callback".to_string(),
                }
                .into()),
            }
        }

        async fn begin_silent_login(&self) -> Result<Identity, IdentityError> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            match self.silent_user.lock().expect("stub lock").clone() {
                Some(user) => Ok(user),
                None => Err(IdentityError::SilentRenew {
                    reason: "renewal rejected".to_string(),
                }
                .into()),
            }
        }

        async fn begin_logout(&self) -> Result<(), IdentityError> {
            if self.fail_logout {
                return Err(IdentityError::Logout {
                    reason: "provider unreachable".to_string(),
                }
                .into());
            }
            Ok(())
        }

        fn subscribe(&self, event: ClientEvent, handler: EventHandler) -> SubscriptionId {
            self.registry.subscribe(event, handler)
        }

        fn unsubscribe(&self, event: ClientEvent, id: SubscriptionId) {
            self.registry.unsubscribe(event, id);
        }
    }

    fn settings() -> OidcSettings {
        OidcSettings::builder(
            "https://id.example.com",
            "spa",
            "https://app.example.com/callback",
        )
        .build()
    }

    fn settings_with_silent() -> OidcSettings {
        OidcSettings::builder(
            "https://id.example.com",
            "spa",
            "https://app.example.com/callback",
        )
        .silent_redirect_uri("https://app.example.com/silent")
        .build()
    }

    fn settings_with_auto_renew() -> OidcSettings {
        OidcSettings::builder(
            "https://id.example.com",
            "spa",
            "https://app.example.com/callback",
        )
        .silent_redirect_uri("https://app.example.com/silent")
        .automatic_silent_renew(true)
        .build()
    }

    fn valid_identity() -> Identity {
        Identity::new("id-token", "access-token")
            .with_profile(json!({ "sub": "user-1" }))
            .with_expires_at(Utc::now() + Duration::hours(1))
    }

    fn build_manager(
        settings: OidcSettings,
        client: StubClient,
    ) -> (SessionManager, Arc<StubClient>, Arc<MemoryStore>) {
        let client = Arc::new(client);
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::builder(settings, Arc::clone(&client) as Arc<dyn IdentityClient>)
            .store(Arc::clone(&store) as Arc<dyn KeyValueStore>)
            .build()
            .expect("valid settings");
        (manager, client, store)
    }

    fn public_route(path: &str) -> NavigationRequest {
        NavigationRequest::new(path)
            .with_meta([(META_PUBLIC.to_string(), json!(true))].into_iter().collect())
    }

    fn callback_route() -> NavigationRequest {
        NavigationRequest::new("/oidc/callback").with_meta(
            [(META_OIDC_CALLBACK.to_string(), json!(true))]
                .into_iter()
                .collect(),
        )
    }

    #[test]
    fn build_fails_on_missing_required_setting() {
        let incomplete =
            OidcSettings::builder("https://id.example.com", "", "https://app.example.com/cb")
                .build();
        let err = SessionManager::builder(incomplete, Arc::new(StubClient::anonymous()))
            .build()
            .map(|_| ())
            .expect_err("missing client_id");
        assert!(err.to_string().contains("client_id"));
    }

    #[tokio::test]
    async fn callback_route_bypasses_the_gate() {
        let (manager, client, _) = build_manager(settings(), StubClient::anonymous());

        assert!(manager.check_access(&callback_route()).await);

        assert_eq!(client.current_user_calls.load(Ordering::SeqCst), 0);
        assert!(!manager.is_checked());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn valid_user_grants_access_and_binds_once() {
        let (manager, client, _) =
            build_manager(settings(), StubClient::with_user(valid_identity()));

        assert!(manager.check_access(&NavigationRequest::new("/home")).await);
        assert!(manager.is_authenticated());
        assert!(manager.is_checked());
        assert_eq!(
            client.registry.handler_count(ClientEvent::AccessTokenExpired),
            1
        );

        // Re-establishing the session must not re-register handlers.
        assert!(manager.check_access(&NavigationRequest::new("/home")).await);
        assert_eq!(
            client.registry.handler_count(ClientEvent::AccessTokenExpired),
            1
        );
    }

    #[tokio::test]
    async fn expiring_handler_is_bound_only_with_auto_renew() {
        let (manager, client, _) =
            build_manager(settings(), StubClient::with_user(valid_identity()));
        manager.check_access(&NavigationRequest::new("/home")).await;
        assert_eq!(
            client
                .registry
                .handler_count(ClientEvent::AccessTokenExpiring),
            0
        );

        let (manager, client, _) = build_manager(
            settings_with_auto_renew(),
            StubClient::with_user(valid_identity()),
        );
        manager.check_access(&NavigationRequest::new("/home")).await;
        assert_eq!(
            client
                .registry
                .handler_count(ClientEvent::AccessTokenExpiring),
            1
        );
    }

    #[tokio::test]
    async fn transition_fires_user_loaded_listener_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(StubClient::with_user(valid_identity()));
        let listener_calls = Arc::clone(&calls);
        let manager = SessionManager::builder(settings(), Arc::clone(&client) as Arc<dyn IdentityClient>)
            .listener(
                ClientEvent::UserLoaded,
                Arc::new(move |_| {
                    listener_calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .build()
            .expect("valid settings");

        manager.check_access(&NavigationRequest::new("/home")).await;
        manager.check_access(&NavigationRequest::new("/home")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn public_route_with_silent_uri_grants_and_renews() {
        let stub = StubClient::anonymous();
        *stub.silent_user.lock().expect("stub lock") = Some(valid_identity());
        let (manager, client, _) = build_manager(settings_with_silent(), stub);

        assert!(manager.check_access(&public_route("/landing")).await);
        assert!(!manager.is_authenticated());

        // The renewal is fire-and-forget; give it a moment to land.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(client.silent_calls.load(Ordering::SeqCst), 1);
        assert!(manager.is_authenticated());
        assert!(manager.is_checked());
    }

    #[tokio::test]
    async fn public_route_without_silent_uri_grants_without_renewing() {
        let (manager, client, _) = build_manager(settings(), StubClient::anonymous());

        assert!(manager.check_access(&public_route("/landing")).await);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(client.silent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn private_route_without_user_denies_and_redirects() {
        let (manager, client, store) = build_manager(settings(), StubClient::anonymous());
        let route = NavigationRequest::new("/dashboard")
            .with_query("x=1")
            .with_fragment("y");

        assert!(!manager.check_access(&route).await);

        assert_eq!(client.redirect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(ACTIVE_ROUTE_KEY),
            Some("/dashboard?x=1#y".to_string())
        );
    }

    #[tokio::test]
    async fn expired_user_is_treated_as_absent() {
        let expired =
            Identity::new("id-token", "access-token").with_expires_at(Utc::now() - Duration::minutes(1));
        let (manager, client, _) = build_manager(settings(), StubClient::with_user(expired));

        assert!(!manager.check_access(&NavigationRequest::new("/home")).await);
        assert_eq!(client.redirect_calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn stale_session_is_cleared_when_user_disappears() {
        let (manager, client, _) =
            build_manager(settings(), StubClient::with_user(valid_identity()));
        manager.check_access(&NavigationRequest::new("/home")).await;
        assert!(manager.is_authenticated());

        *client.user.lock().expect("stub lock") = None;
        assert!(manager.check_access(&public_route("/landing")).await);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn callback_completion_returns_stored_target() {
        let stub = StubClient::anonymous();
        *stub.callback_user.lock().expect("stub lock") = Some(valid_identity());
        let (manager, _, store) = build_manager(settings(), stub);
        store.put(ACTIVE_ROUTE_KEY, "/dashboard?x=1#y");

        let target = manager
            .complete_login_callback()
            .await
            .expect("callback succeeds");
        assert_eq!(target, "/dashboard?x=1#y");
        assert!(manager.is_authenticated());
        assert!(manager.is_checked());
    }

    #[tokio::test]
    async fn callback_completion_defaults_to_root() {
        let stub = StubClient::anonymous();
        *stub.callback_user.lock().expect("stub lock") = Some(valid_identity());
        let (manager, _, _) = build_manager(settings(), stub);

        let target = manager
            .complete_login_callback()
            .await
            .expect("callback succeeds");
        assert_eq!(target, "/");
    }

    #[tokio::test]
    async fn failed_callback_records_marks_checked_and_propagates() {
        let (manager, _, _) = build_manager(settings(), StubClient::anonymous());

        let err = manager
            .complete_login_callback()
            .await
            .expect_err("callback fails");

        assert!(err.to_string().contains("malformed callback"));
        assert!(manager.is_checked());
        assert!(!manager.is_authenticated());
        assert!(
            manager
                .last_error()
                .is_some_and(|e| e.contains("malformed callback"))
        );
    }

    #[tokio::test]
    async fn silent_login_failure_is_absorbed() {
        let (manager, _, _) = build_manager(settings_with_silent(), StubClient::anonymous());

        manager.begin_silent_login().await;

        assert!(!manager.is_authenticated());
        assert!(manager.is_checked());
        assert!(
            manager
                .last_error()
                .is_some_and(|e| e.contains("renewal rejected"))
        );
    }

    #[tokio::test]
    async fn expired_event_clears_authentication() {
        let (manager, client, _) =
            build_manager(settings(), StubClient::with_user(valid_identity()));
        manager.check_access(&NavigationRequest::new("/home")).await;
        assert!(manager.is_authenticated());

        client
            .registry
            .notify(ClientEvent::AccessTokenExpired, &json!({}));

        assert!(!manager.is_authenticated());
        assert!(manager.is_checked());
    }

    #[tokio::test]
    async fn expiring_event_triggers_silent_renewal() {
        let stub = StubClient::with_user(valid_identity());
        *stub.silent_user.lock().expect("stub lock") = Some(valid_identity());
        let (manager, client, _) = build_manager(settings_with_auto_renew(), stub);
        manager.check_access(&NavigationRequest::new("/home")).await;

        client
            .registry
            .notify(ClientEvent::AccessTokenExpiring, &json!({}));
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(client.silent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_out_clears_the_session() {
        let (manager, _, _) = build_manager(settings(), StubClient::with_user(valid_identity()));
        manager.check_access(&NavigationRequest::new("/home")).await;

        manager.sign_out().await;

        assert!(!manager.is_authenticated());
        assert!(manager.profile().is_none());
    }

    #[tokio::test]
    async fn failed_sign_out_keeps_session_and_records_error() {
        let stub = StubClient {
            fail_logout: true,
            ..StubClient::with_user(valid_identity())
        };
        let (manager, _, _) = build_manager(settings(), stub);
        manager.check_access(&NavigationRequest::new("/home")).await;

        manager.sign_out().await;

        assert!(manager.is_authenticated());
        assert!(
            manager
                .last_error()
                .is_some_and(|e| e.contains("provider unreachable"))
        );
    }

    #[tokio::test]
    async fn refresh_user_replaces_the_profile() {
        let (manager, client, _) =
            build_manager(settings(), StubClient::with_user(valid_identity()));
        manager.check_access(&NavigationRequest::new("/home")).await;

        *client.user.lock().expect("stub lock") = Some(
            Identity::new("id-token", "access-token").with_profile(json!({ "sub": "user-2" })),
        );
        let profile = manager.refresh_user().await;
        assert_eq!(profile, Some(json!({ "sub": "user-2" })));
        assert_eq!(manager.profile(), Some(json!({ "sub": "user-2" })));

        *client.user.lock().expect("stub lock") = None;
        assert_eq!(manager.refresh_user().await, None);
        assert!(manager.profile().is_none());
        // A profile refresh never changes authentication.
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn event_bridge_forwards_client_events() {
        let sink = Arc::new(BroadcastEventSink::new(8));
        let mut receiver = sink.subscribe();
        let client = Arc::new(StubClient::anonymous());
        let _manager = SessionManager::builder(settings(), Arc::clone(&client) as Arc<dyn IdentityClient>)
            .event_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
            .build()
            .expect("valid settings");

        client
            .registry
            .notify(ClientEvent::SilentRenewError, &json!({ "error": "boom" }));

        let event = receiver.recv().await.expect("event forwarded");
        assert_eq!(event.channel, "portcullis:silentRenewError");
        assert_eq!(event.detail, json!({ "error": "boom" }));
    }

    #[tokio::test]
    async fn transition_is_forwarded_through_the_bridge() {
        let sink = Arc::new(BroadcastEventSink::new(8));
        let mut receiver = sink.subscribe();
        let client = Arc::new(StubClient::with_user(valid_identity()));
        let manager = SessionManager::builder(settings(), Arc::clone(&client) as Arc<dyn IdentityClient>)
            .event_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
            .build()
            .expect("valid settings");

        manager.check_access(&NavigationRequest::new("/home")).await;

        let event = receiver.recv().await.expect("event forwarded");
        assert_eq!(event.channel, "portcullis:userLoaded");
        assert_eq!(
            event.detail.get("profile"),
            Some(&json!({ "sub": "user-1" }))
        );
    }

    #[tokio::test]
    async fn event_listeners_can_be_added_and_removed() {
        let (manager, client, _) = build_manager(settings(), StubClient::anonymous());
        let calls = Arc::new(AtomicUsize::new(0));
        let listener_calls = Arc::clone(&calls);
        let id = manager.add_event_listener(
            ClientEvent::UserSignedOut,
            Arc::new(move |_| {
                listener_calls.fetch_add(1, Ordering::SeqCst);
            }),
        );

        client
            .registry
            .notify(ClientEvent::UserSignedOut, &json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        manager.remove_event_listener(ClientEvent::UserSignedOut, id);
        client
            .registry
            .notify(ClientEvent::UserSignedOut, &json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn guard_proceeds_only_when_access_is_granted() {
        let (manager, _, _) = build_manager(settings(), StubClient::with_user(valid_identity()));
        let proceeded = Arc::new(AtomicUsize::new(0));

        let in_guard = Arc::clone(&proceeded);
        guard(&manager, &NavigationRequest::new("/home"), move || {
            in_guard.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(proceeded.load(Ordering::SeqCst), 1);

        let (manager, _, _) = build_manager(settings(), StubClient::anonymous());
        let in_guard = Arc::clone(&proceeded);
        guard(&manager, &NavigationRequest::new("/private"), move || {
            in_guard.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(proceeded.load(Ordering::SeqCst), 1);
    }
}
