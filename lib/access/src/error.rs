//! Error types for the portcullis-access crate.
//!
//! Three kinds of failure exist in this layer:
//! - `SettingsError`: a required OIDC setting is missing or the settings
//!   mapping is malformed. Fatal at construction.
//! - `IdentityError`: an identity-client operation failed. Produced by
//!   [`IdentityClient`](crate::client::IdentityClient) implementations.
//! - `AccessError`: failures the session manager surfaces to its caller.
//!   Only the callback variant ever propagates; everything else is
//!   absorbed into session state.

use std::fmt;

/// Errors from settings normalization and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// A required OIDC setting is absent or empty.
    MissingSetting { setting: String },
    /// The settings input could not be interpreted.
    Invalid { reason: String },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSetting { setting } => {
                write!(f, "required oidc setting `{setting}` is missing")
            }
            Self::Invalid { reason } => {
                write!(f, "invalid oidc settings: {reason}")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

/// Errors from identity-client operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The client could not be constructed from its configuration.
    Configuration { reason: String },
    /// Provider metadata discovery failed.
    Discovery { reason: String },
    /// Redirect login could not be initiated.
    Redirect { reason: String },
    /// The redirect callback could not be parsed or validated.
    Callback { reason: String },
    /// Silent renewal failed.
    SilentRenew { reason: String },
    /// Logout could not be initiated.
    Logout { reason: String },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => {
                write!(f, "identity client configuration error: {reason}")
            }
            Self::Discovery { reason } => {
                write!(f, "provider discovery failed: {reason}")
            }
            Self::Redirect { reason } => {
                write!(f, "redirect login failed: {reason}")
            }
            Self::Callback { reason } => {
                write!(f, "login callback failed: {reason}")
            }
            Self::SilentRenew { reason } => {
                write!(f, "silent renewal failed: {reason}")
            }
            Self::Logout { reason } => {
                write!(f, "logout failed: {reason}")
            }
        }
    }
}

impl std::error::Error for IdentityError {}

/// Errors the session manager surfaces to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Completing the login callback failed. The error is also recorded in
    /// session state before it propagates, and the state is marked checked
    /// so the application can render a failure view.
    Callback { reason: String },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback { reason } => {
                write!(f, "login callback failed: {reason}")
            }
        }
    }
}

impl std::error::Error for AccessError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setting_display_names_the_field() {
        let err = SettingsError::MissingSetting {
            setting: "authority".to_string(),
        };
        assert!(err.to_string().contains("authority"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn identity_error_display_carries_reason() {
        let err = IdentityError::Callback {
            reason: "state mismatch".to_string(),
        };
        assert!(err.to_string().contains("callback"));
        assert!(err.to_string().contains("state mismatch"));
    }

    #[test]
    fn silent_renew_display() {
        let err = IdentityError::SilentRenew {
            reason: "no refresh token".to_string(),
        };
        assert!(err.to_string().contains("silent renewal"));
    }

    #[test]
    fn access_error_display_carries_reason() {
        let err = AccessError::Callback {
            reason: "provider returned error: access_denied".to_string(),
        };
        assert!(err.to_string().contains("access_denied"));
    }
}
