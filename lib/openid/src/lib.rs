//! openidconnect-backed identity client for the portcullis session
//! manager.
//!
//! This crate provides [`OpenIdClient`], a production implementation of
//! the `portcullis-access` crate's `IdentityClient` facade. Construction
//! runs OIDC discovery against the configured authority; login uses the
//! authorization-code flow with PKCE; silent renewal uses the
//! refresh-token grant. Everything environment-shaped is injected: the
//! durable store through `KeyValueStore`, navigation through
//! [`Navigator`].

pub mod client;
pub mod navigator;

pub use client::OpenIdClient;
pub use navigator::Navigator;
