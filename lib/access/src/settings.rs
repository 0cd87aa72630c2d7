//! OIDC settings: normalization, validation, and defaults.
//!
//! Settings usually arrive from the host application as a JSON mapping.
//! A fixed set of keys is accepted in two spellings, a mixed-case form
//! and the underscore form the identity client expects, and normalized
//! to the underscore form before validation. When both spellings are
//! present, the underscore form wins.
//!
//! The identity client's own renewal machinery is never engaged:
//! `automatic_silent_renew` drives the session manager's renewal binder,
//! not a client-side timer.

use crate::error::SettingsError;
use portcullis_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings that must be present to construct a manager or client.
pub const REQUIRED_SETTINGS: [&str; 5] = [
    "authority",
    "client_id",
    "redirect_uri",
    "response_type",
    "scope",
];

/// Settings accepted in mixed-case form and normalized to underscore form.
const ALIASED_SETTINGS: [&str; 10] = [
    "clientId",
    "redirectUri",
    "responseType",
    "maxAge",
    "uiLocales",
    "loginHint",
    "acrValues",
    "postLogoutRedirectUri",
    "popupRedirectUri",
    "silentRedirectUri",
];

fn default_expiring_notification_secs() -> u64 {
    60
}

/// Which durable store backend the host should inject.
///
/// The library itself is storage-agnostic; this is an advisory hint the
/// host reads when choosing a [`KeyValueStore`](crate::store::KeyValueStore)
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Session-scoped storage, cleared when the session ends.
    #[default]
    Session,
    /// Durable local storage.
    Local,
    /// In-memory storage, lost on reload.
    Memory,
}

/// Configuration for connecting to an OIDC identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcSettings {
    /// The provider's issuer URL, used for discovery.
    authority: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The redirect URI the provider sends the user back to after login.
    redirect_uri: String,
    /// The OAuth2 response type (e.g., "code").
    response_type: String,
    /// Space-separated scopes to request.
    scope: String,
    /// Client secret, absent for public clients.
    #[serde(default)]
    client_secret: Option<String>,
    /// Redirect URI for silent renewal. Its presence enables the
    /// background-renewal attempt on public routes.
    #[serde(default)]
    silent_redirect_uri: Option<String>,
    /// Whether the session manager renews tokens when they near expiry.
    #[serde(default)]
    automatic_silent_renew: bool,
    /// Where the provider may send the user after logout.
    #[serde(default)]
    post_logout_redirect_uri: Option<String>,
    /// Redirect URI for popup-based login flows.
    #[serde(default)]
    popup_redirect_uri: Option<String>,
    /// Maximum acceptable authentication age, in seconds.
    #[serde(default)]
    max_age: Option<u64>,
    /// Preferred locales for the provider's UI.
    #[serde(default)]
    ui_locales: Option<String>,
    /// Login hint forwarded to the provider.
    #[serde(default)]
    login_hint: Option<String>,
    /// Requested authentication context class reference values.
    #[serde(default)]
    acr_values: Option<String>,
    /// Advisory store backend hint for the host.
    #[serde(default)]
    user_store: StoreBackend,
    /// How long before expiry the expiring-token event fires, in seconds.
    #[serde(default = "default_expiring_notification_secs")]
    expiring_notification_secs: u64,
}

impl OidcSettings {
    /// Creates a settings builder with the required fields.
    #[must_use]
    pub fn builder(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> OidcSettingsBuilder {
        OidcSettingsBuilder::new(authority, client_id, redirect_uri)
    }

    /// Builds settings from a JSON mapping supplied by the host.
    ///
    /// Mixed-case aliases are normalized to the underscore form first
    /// (underscore spelling wins on conflict), then the required settings
    /// are checked. Unrecognized keys are ignored.
    pub fn from_value(value: Value) -> Result<Self, SettingsError> {
        let Value::Object(map) = value else {
            return Err(SettingsError::Invalid {
                reason: "settings must be a JSON object".to_string(),
            }
            .into());
        };
        let map = normalize_aliases(map);
        for setting in REQUIRED_SETTINGS {
            let present = map
                .get(setting)
                .and_then(Value::as_str)
                .is_some_and(|v| !v.is_empty());
            if !present {
                return Err(SettingsError::MissingSetting {
                    setting: setting.to_string(),
                }
                .into());
            }
        }
        serde_json::from_value(Value::Object(map)).map_err(|e| {
            SettingsError::Invalid {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Checks that every required setting is non-empty.
    ///
    /// Construction of a session manager or identity client aborts on the
    /// first missing setting.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let fields = [
            ("authority", &self.authority),
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
            ("response_type", &self.response_type),
            ("scope", &self.scope),
        ];
        for (setting, value) in fields {
            if value.is_empty() {
                return Err(SettingsError::MissingSetting {
                    setting: setting.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Returns the provider's issuer URL.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the login redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 response type.
    #[must_use]
    pub fn response_type(&self) -> &str {
        &self.response_type
    }

    /// Returns the space-separated scope string.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the client secret, if this is a confidential client.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    /// Returns the silent-renewal redirect URI, if configured.
    #[must_use]
    pub fn silent_redirect_uri(&self) -> Option<&str> {
        self.silent_redirect_uri.as_deref()
    }

    /// Returns whether the manager renews tokens as they near expiry.
    #[must_use]
    pub fn automatic_silent_renew(&self) -> bool {
        self.automatic_silent_renew
    }

    /// Returns the post-logout redirect URI, if configured.
    #[must_use]
    pub fn post_logout_redirect_uri(&self) -> Option<&str> {
        self.post_logout_redirect_uri.as_deref()
    }

    /// Returns the popup redirect URI, if configured.
    #[must_use]
    pub fn popup_redirect_uri(&self) -> Option<&str> {
        self.popup_redirect_uri.as_deref()
    }

    /// Returns the maximum acceptable authentication age, in seconds.
    #[must_use]
    pub fn max_age(&self) -> Option<u64> {
        self.max_age
    }

    /// Returns the preferred provider-UI locales.
    #[must_use]
    pub fn ui_locales(&self) -> Option<&str> {
        self.ui_locales.as_deref()
    }

    /// Returns the login hint, if configured.
    #[must_use]
    pub fn login_hint(&self) -> Option<&str> {
        self.login_hint.as_deref()
    }

    /// Returns the requested ACR values, if configured.
    #[must_use]
    pub fn acr_values(&self) -> Option<&str> {
        self.acr_values.as_deref()
    }

    /// Returns the advisory store backend hint.
    #[must_use]
    pub fn user_store(&self) -> StoreBackend {
        self.user_store
    }

    /// Returns the expiring-token notification lead time, in seconds.
    #[must_use]
    pub fn expiring_notification_secs(&self) -> u64 {
        self.expiring_notification_secs
    }
}

/// Copies mixed-case alias keys onto their underscore form.
///
/// An existing underscore key is never overwritten; the alias key is
/// dropped either way.
fn normalize_aliases(mut map: Map<String, Value>) -> Map<String, Value> {
    for alias in ALIASED_SETTINGS {
        if let Some(value) = map.remove(alias) {
            let snake = camel_to_snake(alias);
            map.entry(snake).or_insert(value);
        }
    }
    map
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Builder for `OidcSettings`.
#[derive(Debug)]
pub struct OidcSettingsBuilder {
    settings: OidcSettings,
}

impl OidcSettingsBuilder {
    /// Creates a builder with the required fields and common defaults
    /// (`response_type = "code"`, `scope = "openid profile"`).
    #[must_use]
    pub fn new(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            settings: OidcSettings {
                authority: authority.into(),
                client_id: client_id.into(),
                redirect_uri: redirect_uri.into(),
                response_type: "code".to_string(),
                scope: "openid profile".to_string(),
                client_secret: None,
                silent_redirect_uri: None,
                automatic_silent_renew: false,
                post_logout_redirect_uri: None,
                popup_redirect_uri: None,
                max_age: None,
                ui_locales: None,
                login_hint: None,
                acr_values: None,
                user_store: StoreBackend::default(),
                expiring_notification_secs: default_expiring_notification_secs(),
            },
        }
    }

    /// Sets the OAuth2 response type.
    #[must_use]
    pub fn response_type(mut self, response_type: impl Into<String>) -> Self {
        self.settings.response_type = response_type.into();
        self
    }

    /// Sets the space-separated scope string.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.settings.scope = scope.into();
        self
    }

    /// Sets the client secret for a confidential client.
    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.settings.client_secret = Some(secret.into());
        self
    }

    /// Sets the silent-renewal redirect URI.
    #[must_use]
    pub fn silent_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.settings.silent_redirect_uri = Some(uri.into());
        self
    }

    /// Enables or disables manager-driven silent renewal.
    #[must_use]
    pub fn automatic_silent_renew(mut self, enabled: bool) -> Self {
        self.settings.automatic_silent_renew = enabled;
        self
    }

    /// Sets the post-logout redirect URI.
    #[must_use]
    pub fn post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.settings.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Sets the maximum acceptable authentication age, in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.settings.max_age = Some(seconds);
        self
    }

    /// Sets the login hint.
    #[must_use]
    pub fn login_hint(mut self, hint: impl Into<String>) -> Self {
        self.settings.login_hint = Some(hint.into());
        self
    }

    /// Sets the requested ACR values.
    #[must_use]
    pub fn acr_values(mut self, values: impl Into<String>) -> Self {
        self.settings.acr_values = Some(values.into());
        self
    }

    /// Sets the advisory store backend hint.
    #[must_use]
    pub fn user_store(mut self, backend: StoreBackend) -> Self {
        self.settings.user_store = backend;
        self
    }

    /// Sets the expiring-token notification lead time, in seconds.
    #[must_use]
    pub fn expiring_notification_secs(mut self, seconds: u64) -> Self {
        self.settings.expiring_notification_secs = seconds;
        self
    }

    /// Builds the settings.
    #[must_use]
    pub fn build(self) -> OidcSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "authority": "https://id.example.com",
            "client_id": "spa",
            "redirect_uri": "https://app.example.com/callback",
            "response_type": "code",
            "scope": "openid profile"
        })
    }

    #[test]
    fn from_value_accepts_underscore_keys() {
        let settings = OidcSettings::from_value(minimal()).expect("valid settings");
        assert_eq!(settings.authority(), "https://id.example.com");
        assert_eq!(settings.client_id(), "spa");
        assert_eq!(settings.scope(), "openid profile");
        assert!(!settings.automatic_silent_renew());
        assert_eq!(settings.user_store(), StoreBackend::Session);
        assert_eq!(settings.expiring_notification_secs(), 60);
    }

    #[test]
    fn mixed_case_aliases_are_normalized() {
        let settings = OidcSettings::from_value(json!({
            "authority": "https://id.example.com",
            "clientId": "spa",
            "redirectUri": "https://app.example.com/callback",
            "responseType": "code",
            "scope": "openid",
            "silentRedirectUri": "https://app.example.com/silent",
            "postLogoutRedirectUri": "https://app.example.com/",
            "loginHint": "alice@example.com"
        }))
        .expect("valid settings");
        assert_eq!(settings.client_id(), "spa");
        assert_eq!(
            settings.silent_redirect_uri(),
            Some("https://app.example.com/silent")
        );
        assert_eq!(
            settings.post_logout_redirect_uri(),
            Some("https://app.example.com/")
        );
        assert_eq!(settings.login_hint(), Some("alice@example.com"));
    }

    #[test]
    fn underscore_form_wins_over_alias() {
        let settings = OidcSettings::from_value(json!({
            "authority": "https://id.example.com",
            "client_id": "underscore",
            "clientId": "camel",
            "redirect_uri": "https://app.example.com/callback",
            "response_type": "code",
            "scope": "openid"
        }))
        .expect("valid settings");
        assert_eq!(settings.client_id(), "underscore");
    }

    #[test]
    fn missing_required_setting_names_the_field() {
        let mut value = minimal();
        value.as_object_mut().expect("object").remove("authority");
        let err = OidcSettings::from_value(value).expect_err("missing authority");
        assert!(err.to_string().contains("authority"));
    }

    #[test]
    fn alias_satisfies_a_required_setting() {
        let settings = OidcSettings::from_value(json!({
            "authority": "https://id.example.com",
            "clientId": "spa",
            "redirect_uri": "https://app.example.com/callback",
            "response_type": "code",
            "scope": "openid"
        }))
        .expect("alias covers client_id");
        assert_eq!(settings.client_id(), "spa");
    }

    #[test]
    fn absent_client_id_is_reported() {
        let err = OidcSettings::from_value(json!({
            "authority": "https://id.example.com",
            "redirect_uri": "https://app.example.com/callback",
            "response_type": "code",
            "scope": "openid"
        }))
        .expect_err("missing client_id");
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn empty_required_setting_is_missing() {
        let mut value = minimal();
        value
            .as_object_mut()
            .expect("object")
            .insert("scope".to_string(), json!(""));
        let err = OidcSettings::from_value(value).expect_err("empty scope");
        assert!(err.to_string().contains("scope"));
    }

    #[test]
    fn non_object_settings_are_invalid() {
        let err = OidcSettings::from_value(json!("nope")).expect_err("not an object");
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut value = minimal();
        value
            .as_object_mut()
            .expect("object")
            .insert("loadUserInfo".to_string(), json!(true));
        assert!(OidcSettings::from_value(value).is_ok());
    }

    #[test]
    fn builder_applies_defaults_and_overrides() {
        let settings = OidcSettings::builder(
            "https://id.example.com",
            "spa",
            "https://app.example.com/callback",
        )
        .scope("openid email")
        .silent_redirect_uri("https://app.example.com/silent")
        .automatic_silent_renew(true)
        .expiring_notification_secs(30)
        .build();

        assert_eq!(settings.response_type(), "code");
        assert_eq!(settings.scope(), "openid email");
        assert!(settings.automatic_silent_renew());
        assert_eq!(settings.expiring_notification_secs(), 30);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_required_field() {
        let settings = OidcSettings::builder("", "spa", "https://app.example.com/callback").build();
        let err = settings.validate().expect_err("empty authority");
        assert!(err.to_string().contains("authority"));
    }

    #[test]
    fn settings_serialization_roundtrip() {
        let settings = OidcSettings::from_value(minimal()).expect("valid settings");
        let json = serde_json::to_string(&settings).expect("serialize");
        let parsed: OidcSettings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.authority(), settings.authority());
        assert_eq!(parsed.scope(), settings.scope());
    }
}
