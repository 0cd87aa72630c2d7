//! The identity-client facade.
//!
//! The OIDC protocol exchange itself lives behind the [`IdentityClient`]
//! trait; the session manager only consumes this surface. The
//! `portcullis-openid` crate provides a production implementation.

use crate::error::IdentityError;
use crate::events::ClientEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{Result, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A handler invoked with an event's JSON payload.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// A user session as handed back by the identity client.
///
/// Tokens are opaque strings; the profile carries the identity claims.
/// `expires_at` is the provider-reported token lifetime; an identity
/// with no known expiry is treated as not expired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// The signed token carrying identity claims.
    pub id_token: Option<String>,
    /// The bearer credential for resource access.
    pub access_token: Option<String>,
    /// The credential used for silent renewal, if the provider issued one.
    pub refresh_token: Option<String>,
    /// Identity claims as a JSON object.
    pub profile: Option<Value>,
    /// When the access token expires, as reported by the provider.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Creates an identity holding only tokens.
    #[must_use]
    pub fn new(id_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            id_token: Some(id_token.into()),
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    /// Sets the profile claims.
    #[must_use]
    pub fn with_profile(mut self, profile: Value) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Sets the provider-reported expiry instant.
    #[must_use]
    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Returns true if the provider-reported expiry has passed.
    ///
    /// An identity without a known expiry is not expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// The surface the session manager needs from an OIDC client.
///
/// Event subscription is tolerant by contract: an implementation that does
/// not support a given event accepts the subscription and never fires it,
/// and an unknown subscription id unsubscribes nothing. This keeps the
/// event list forward-compatible across implementations.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Returns the current user session, if one exists.
    ///
    /// Failure collapses to `None` by contract: this method never errors.
    /// The session manager treats a fetch failure the same as "no user".
    async fn current_user(&self) -> Option<Identity>;

    /// Starts a full-page redirect to the identity provider.
    ///
    /// Not cancellable once the navigation is under way.
    async fn begin_redirect_login(&self) -> Result<(), IdentityError>;

    /// Completes the redirect flow after the provider sends the user back.
    async fn complete_redirect_login(&self) -> Result<Identity, IdentityError>;

    /// Renews the session without visible navigation.
    async fn begin_silent_login(&self) -> Result<Identity, IdentityError>;

    /// Signs the user out of the identity provider.
    async fn begin_logout(&self) -> Result<(), IdentityError>;

    /// Registers a handler for the given event.
    fn subscribe(&self, event: ClientEvent, handler: EventHandler) -> SubscriptionId;

    /// Removes a previously registered handler. Unknown ids are ignored.
    fn unsubscribe(&self, event: ClientEvent, id: SubscriptionId);
}
