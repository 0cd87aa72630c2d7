//! OIDC identity client built on the openidconnect crate.
//!
//! `OpenIdClient` implements the session manager's
//! [`IdentityClient`] facade: provider discovery, authorization-code
//! login with PKCE, refresh-token silent renewal, and RP-initiated
//! logout. The established identity and the in-flight authorization
//! state are persisted through the injected [`KeyValueStore`] so the
//! redirect flow survives a full page reload; navigation goes through
//! the injected [`Navigator`].
//!
//! The client never renews tokens on its own. It raises
//! `accessTokenExpiring`/`accessTokenExpired` from a timer and leaves
//! the renewal decision to the session manager's binder.

use async_trait::async_trait;
use chrono::Utc;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse,
};
use portcullis_access::{
    ClientEvent, EventHandler, EventRegistry, Identity, IdentityClient, IdentityError,
    KeyValueStore, OidcSettings,
};
use portcullis_core::{Result, SubscriptionId, token};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::navigator::Navigator;

/// Authorization state that must survive the redirect round trip.
#[derive(Debug, Serialize, Deserialize)]
struct PendingAuthorization {
    csrf: String,
    pkce_verifier: String,
    nonce: String,
}

/// An [`IdentityClient`] backed by a discovered OIDC provider.
pub struct OpenIdClient {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    redirect_url: RedirectUrl,
    settings: OidcSettings,
    store: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    events: Arc<EventRegistry>,
    http: reqwest::Client,
    user_key: String,
    state_key: String,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl OpenIdClient {
    /// Creates a client by validating the settings and discovering the
    /// provider's metadata.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error naming the missing setting, or a
    /// discovery error when the provider metadata cannot be fetched.
    #[instrument(skip_all, fields(authority = %settings.authority()))]
    pub async fn discover(
        settings: OidcSettings,
        store: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, IdentityError> {
        settings.validate().map_err(|e| IdentityError::Configuration {
            reason: e.to_string(),
        })?;

        let issuer_url =
            IssuerUrl::new(settings.authority().to_string()).map_err(|e| {
                IdentityError::Configuration {
                    reason: format!("invalid issuer URL: {e}"),
                }
            })?;
        let redirect_url =
            RedirectUrl::new(settings.redirect_uri().to_string()).map_err(|e| {
                IdentityError::Configuration {
                    reason: format!("invalid redirect URI: {e}"),
                }
            })?;

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| IdentityError::Configuration {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http)
            .await
            .map_err(|e| IdentityError::Discovery {
                reason: format!("failed to discover provider metadata: {e}"),
            })?;

        let client_id = ClientId::new(settings.client_id().to_string());
        let client_secret = settings
            .client_secret()
            .map(|secret| ClientSecret::new(secret.to_string()));
        let user_key = format!(
            "portcullis.user:{}:{}",
            settings.authority(),
            settings.client_id()
        );
        let state_key = format!("portcullis.state:{}", settings.client_id());

        Ok(Self {
            provider_metadata,
            client_id,
            client_secret,
            redirect_url,
            settings,
            store,
            navigator,
            events: Arc::new(EventRegistry::new()),
            http,
            user_key,
            state_key,
            expiry_task: Mutex::new(None),
        })
    }

    fn load_identity(&self) -> Option<Identity> {
        let raw = self.store.get(&self.user_key)?;
        match serde_json::from_str(&raw) {
            Ok(identity) => Some(identity),
            Err(error) => {
                warn!(%error, "persisted identity is corrupt, treating as absent");
                None
            }
        }
    }

    /// Persists the identity, raises `userLoaded`, and restarts the
    /// expiry timer.
    fn establish(&self, identity: &Identity) {
        match serde_json::to_string(identity) {
            Ok(json) => self.store.put(&self.user_key, &json),
            Err(error) => warn!(%error, "failed to persist identity"),
        }
        let detail = serde_json::to_value(identity).unwrap_or_else(|_| empty_detail());
        self.events.notify(ClientEvent::UserLoaded, &detail);
        self.schedule_expiry_events(identity);
    }

    fn take_pending_authorization(&self) -> Result<PendingAuthorization, IdentityError> {
        let raw = self
            .store
            .get(&self.state_key)
            .ok_or_else(|| IdentityError::Callback {
                reason: "no pending authorization state".to_string(),
            })?;
        let pending =
            serde_json::from_str(&raw).map_err(|e| IdentityError::Callback {
                reason: format!("stored authorization state is corrupt: {e}"),
            })?;
        Ok(pending)
    }

    async fn renew_with_refresh_token(&self) -> Result<Identity, IdentityError> {
        let current = self
            .load_identity()
            .ok_or_else(|| IdentityError::SilentRenew {
                reason: "no persisted session to renew".to_string(),
            })?;
        let refresh_token =
            current
                .refresh_token
                .clone()
                .ok_or_else(|| IdentityError::SilentRenew {
                    reason: "persisted session has no refresh token".to_string(),
                })?;

        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .map_err(|e| IdentityError::SilentRenew {
                reason: format!("token endpoint error: {e}"),
            })?
            .request_async(&self.http)
            .await
            .map_err(|e| IdentityError::SilentRenew {
                reason: format!("token refresh failed: {e}"),
            })?;

        let mut identity = identity_from_token_response(&token_response)
            .map_err(|reason| IdentityError::SilentRenew { reason })?;
        // Providers may omit unrotated fields from a refresh response.
        if identity.id_token.is_none() {
            identity.id_token = current.id_token.clone();
        }
        if identity.profile.is_none() {
            identity.profile = current.profile.clone();
        }
        if identity.refresh_token.is_none() {
            identity.refresh_token = Some(refresh_token);
        }

        debug!("session renewed through refresh grant");
        self.establish(&identity);
        Ok(identity)
    }

    /// Looks up the provider's RP-initiated-logout endpoint.
    ///
    /// The core metadata type does not carry `end_session_endpoint`, so
    /// this reads the raw discovery document. Any failure means "no
    /// endpoint" and logout stays local.
    async fn end_session_endpoint(&self) -> Option<String> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.settings.authority().trim_end_matches('/')
        );
        let document: Value = self.http.get(&url).send().await.ok()?.json().await.ok()?;
        document
            .get("end_session_endpoint")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// One timer task per established identity; re-establishing replaces
    /// the previous task. Fires `accessTokenExpiring` ahead of expiry and
    /// `accessTokenExpired` at expiry.
    fn schedule_expiry_events(&self, identity: &Identity) {
        let mut slot = self.expiry_task.lock().expect("expiry task lock poisoned");
        if let Some(task) = slot.take() {
            task.abort();
        }
        let Some(expires_at) = identity.expires_at else {
            return;
        };
        let events = Arc::clone(&self.events);
        let lead = chrono::Duration::seconds(self.settings.expiring_notification_secs() as i64);
        let handle = tokio::spawn(async move {
            if let Ok(delay) = ((expires_at - lead) - Utc::now()).to_std() {
                tokio::time::sleep(delay).await;
            }
            events.notify(ClientEvent::AccessTokenExpiring, &empty_detail());
            if let Ok(delay) = (expires_at - Utc::now()).to_std() {
                tokio::time::sleep(delay).await;
            }
            events.notify(ClientEvent::AccessTokenExpired, &empty_detail());
        });
        *slot = Some(handle);
    }

    fn cancel_expiry_events(&self) {
        if let Some(task) = self
            .expiry_task
            .lock()
            .expect("expiry task lock poisoned")
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for OpenIdClient {
    fn drop(&mut self) {
        self.cancel_expiry_events();
    }
}

#[async_trait]
impl IdentityClient for OpenIdClient {
    async fn current_user(&self) -> Option<Identity> {
        self.load_identity()
    }

    async fn begin_redirect_login(&self) -> Result<(), IdentityError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);
        // The openid scope is always requested; only the extras need adding.
        for scope in self
            .settings
            .scope()
            .split_whitespace()
            .filter(|scope| *scope != "openid")
        {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        if let Some(max_age) = self.settings.max_age() {
            request = request.add_extra_param("max_age", max_age.to_string());
        }
        if let Some(ui_locales) = self.settings.ui_locales() {
            request = request.add_extra_param("ui_locales", ui_locales.to_string());
        }
        if let Some(login_hint) = self.settings.login_hint() {
            request = request.add_extra_param("login_hint", login_hint.to_string());
        }
        if let Some(acr_values) = self.settings.acr_values() {
            request = request.add_extra_param("acr_values", acr_values.to_string());
        }

        let (auth_url, csrf_token, nonce) = request.url();

        let pending = PendingAuthorization {
            csrf: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
            nonce: nonce.secret().clone(),
        };
        let json = serde_json::to_string(&pending).map_err(|e| IdentityError::Redirect {
            reason: format!("failed to serialize authorization state: {e}"),
        })?;
        self.store.put(&self.state_key, &json);

        debug!("redirecting to the identity provider");
        self.navigator.navigate(auth_url.as_str());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn complete_redirect_login(&self) -> Result<Identity, IdentityError> {
        let href = self.navigator.current_url();
        let url = reqwest::Url::parse(&href).map_err(|e| IdentityError::Callback {
            reason: format!("invalid callback URL: {e}"),
        })?;

        let mut code = None;
        let mut returned_state = None;
        let mut provider_error = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => returned_state = Some(value.into_owned()),
                "error" => provider_error = Some(value.into_owned()),
                _ => {}
            }
        }
        if let Some(error) = provider_error {
            return Err(IdentityError::Callback {
                reason: format!("provider returned error: {error}"),
            }
            .into());
        }
        let code = code.ok_or_else(|| IdentityError::Callback {
            reason: "callback is missing the code parameter".to_string(),
        })?;

        let pending = self.take_pending_authorization()?;
        if returned_state.as_deref() != Some(pending.csrf.as_str()) {
            return Err(IdentityError::Callback {
                reason: "state parameter does not match the pending authorization".to_string(),
            }
            .into());
        }

        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code))
            .map_err(|e| IdentityError::Callback {
                reason: format!("token endpoint error: {e}"),
            })?
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
            .request_async(&self.http)
            .await
            .map_err(|e| IdentityError::Callback {
                reason: format!("token exchange failed: {e}"),
            })?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| IdentityError::Callback {
                reason: "no ID token in response".to_string(),
            })?;
        let nonce = Nonce::new(pending.nonce);
        id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| IdentityError::Callback {
                reason: format!("ID token validation failed: {e}"),
            })?;

        let identity = identity_from_token_response(&token_response)
            .map_err(|reason| IdentityError::Callback { reason })?;
        self.store.remove(&self.state_key);
        self.establish(&identity);
        Ok(identity)
    }

    async fn begin_silent_login(&self) -> Result<Identity, IdentityError> {
        match self.renew_with_refresh_token().await {
            Ok(identity) => Ok(identity),
            Err(error) => {
                self.events.notify(
                    ClientEvent::SilentRenewError,
                    &serde_json::json!({ "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn begin_logout(&self) -> Result<(), IdentityError> {
        let identity = self.load_identity();
        self.store.remove(&self.user_key);
        self.cancel_expiry_events();
        self.events
            .notify(ClientEvent::UserUnloaded, &empty_detail());

        if let Some(endpoint) = self.end_session_endpoint().await {
            let mut url =
                reqwest::Url::parse(&endpoint).map_err(|e| IdentityError::Logout {
                    reason: format!("invalid end-session endpoint: {e}"),
                })?;
            {
                let mut pairs = url.query_pairs_mut();
                if let Some(id_token) = identity.as_ref().and_then(|i| i.id_token.as_deref()) {
                    pairs.append_pair("id_token_hint", id_token);
                }
                if let Some(post_logout) = self.settings.post_logout_redirect_uri() {
                    pairs.append_pair("post_logout_redirect_uri", post_logout);
                }
            }
            self.navigator.navigate(url.as_str());
        } else if let Some(post_logout) = self.settings.post_logout_redirect_uri() {
            self.navigator.navigate(post_logout);
        }
        Ok(())
    }

    fn subscribe(&self, event: ClientEvent, handler: EventHandler) -> SubscriptionId {
        self.events.subscribe(event, handler)
    }

    fn unsubscribe(&self, event: ClientEvent, id: SubscriptionId) {
        self.events.unsubscribe(event, id);
    }
}

fn empty_detail() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Builds an [`Identity`] from a token response.
///
/// Works on the response's serialized form so it applies to both the
/// code-exchange and refresh responses: tokens are lifted verbatim, the
/// profile comes from the ID token's payload, and `expires_at` is derived
/// from `expires_in`.
fn identity_from_token_response<TR>(response: &TR) -> std::result::Result<Identity, String>
where
    TR: Serialize,
{
    let json = serde_json::to_value(response)
        .map_err(|e| format!("failed to serialize token response: {e}"))?;
    let id_token = json
        .get("id_token")
        .and_then(Value::as_str)
        .map(str::to_string);
    let access_token = json
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string);
    let refresh_token = json
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::to_string);
    let expires_at = json
        .get("expires_in")
        .and_then(Value::as_i64)
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    let profile = id_token
        .as_deref()
        .map(token::claims)
        .filter(|claims| !claims.is_empty())
        .map(Value::Object);

    Ok(Identity {
        id_token,
        access_token,
        refresh_token,
        profile,
        expires_at,
    })
}
