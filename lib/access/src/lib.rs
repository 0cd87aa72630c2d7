//! Session state machine and navigation access gate for OIDC-backed
//! applications.
//!
//! This crate keeps the authentication state of the current user session,
//! decides whether a pending navigation is allowed, and drives token
//! renewal, without the surrounding application having to understand the
//! OIDC protocol. The protocol exchange itself sits behind the
//! [`IdentityClient`] trait (see the `portcullis-openid` crate for a
//! production implementation), durable storage behind [`KeyValueStore`],
//! and outward event dispatch behind [`EventSink`], so the core runs and
//! tests without a browser or any global environment.
//!
//! # Example
//!
//! ```
//! use portcullis_access::OidcSettings;
//! use serde_json::json;
//!
//! // Settings arrive from the host as a mapping; mixed-case aliases are
//! // normalized before validation.
//! let settings = OidcSettings::from_value(json!({
//!     "authority": "https://id.example.com",
//!     "clientId": "spa",
//!     "redirectUri": "https://app.example.com/callback",
//!     "response_type": "code",
//!     "scope": "openid profile"
//! }))
//! .expect("valid settings");
//!
//! assert_eq!(settings.client_id(), "spa");
//! assert!(settings.silent_redirect_uri().is_none());
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod manager;
pub mod route;
pub mod settings;
pub mod state;
pub mod store;

// Re-export main types at crate root
pub use client::{EventHandler, Identity, IdentityClient};
pub use error::{AccessError, IdentityError, SettingsError};
pub use events::{
    BridgedEvent, BroadcastEventSink, ClientEvent, EVENT_PREFIX, EventRegistry, EventSink,
};
pub use manager::{SessionManager, SessionManagerBuilder, guard};
pub use route::{META_OIDC_CALLBACK, META_PUBLIC, NavigationRequest, RouteMeta};
pub use settings::{OidcSettings, OidcSettingsBuilder, REQUIRED_SETTINGS, StoreBackend};
pub use state::SessionState;
pub use store::{ACTIVE_ROUTE_KEY, KeyValueStore, MemoryStore};
