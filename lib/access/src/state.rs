//! The authoritative in-memory session record.
//!
//! `SessionState` is owned by the session manager and mutated only through
//! the operations here; readers go through the accessors. The mutation
//! operations are total; they cannot fail.
//!
//! Token expiry is derived at read time, never stored: the token accessors
//! return `None` once the raw token's `exp` claim has passed, even though
//! the raw value stays in state until it is explicitly unset.

use crate::client::Identity;
use chrono::{DateTime, Utc};
use portcullis_core::token;
use serde_json::Value;
use std::fmt;

/// The session manager's authoritative state.
#[derive(Debug, Default)]
pub struct SessionState {
    access_token: Option<String>,
    id_token: Option<String>,
    profile: Option<Value>,
    is_checked: bool,
    events_bound: bool,
    error: Option<String>,
}

impl SessionState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts the identity's tokens and profile; clears any recorded error.
    pub fn set_authenticated(&mut self, user: &Identity) {
        self.id_token = user.id_token.clone();
        self.access_token = user.access_token.clone();
        self.profile = user.profile.clone();
        self.error = None;
    }

    /// Replaces only the user profile.
    ///
    /// Used for out-of-band profile refresh; authentication is untouched.
    pub fn set_profile(&mut self, profile: Option<Value>) {
        self.profile = profile;
    }

    /// Drops tokens and profile. `is_checked` and `events_bound` survive.
    pub fn clear_authenticated(&mut self) {
        self.id_token = None;
        self.access_token = None;
        self.profile = None;
    }

    /// Marks that an access decision has completed at least once.
    pub fn mark_checked(&mut self) {
        self.is_checked = true;
    }

    /// Latches the renewal-handler registration flag.
    ///
    /// The flag never transitions back to false for the lifetime of the
    /// manager.
    pub fn mark_events_bound(&mut self) {
        self.events_bound = true;
    }

    /// Records a failure for the application to observe.
    pub fn set_error(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
    }

    /// Returns true when an ID token is present.
    ///
    /// An access token alone does not imply authentication.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.id_token.is_some()
    }

    /// Returns the current access token, or `None` if it has expired.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        live(self.access_token.as_deref())
    }

    /// Returns the access token's expiry instant, if known.
    #[must_use]
    pub fn access_token_expiry(&self) -> Option<DateTime<Utc>> {
        self.access_token.as_deref().and_then(token::expiry)
    }

    /// Returns the current ID token, or `None` if it has expired.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        live(self.id_token.as_deref())
    }

    /// Returns the ID token's expiry instant, if known.
    #[must_use]
    pub fn id_token_expiry(&self) -> Option<DateTime<Utc>> {
        self.id_token.as_deref().and_then(token::expiry)
    }

    /// Returns the user profile claims, if present.
    #[must_use]
    pub fn profile(&self) -> Option<&Value> {
        self.profile.as_ref()
    }

    /// Returns true once an access decision has completed.
    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.is_checked
    }

    /// Returns true once the renewal handlers are registered.
    #[must_use]
    pub fn events_bound(&self) -> bool {
        self.events_bound
    }

    /// Returns the last recorded failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Read-time expiry filter: an expired raw token reads as absent.
fn live(token: Option<&str>) -> Option<&str> {
    token.filter(|t| !token::is_expired(t))
}
