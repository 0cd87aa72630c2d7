//! Foundation types for the portcullis session manager.
//!
//! This crate provides the pieces the rest of the workspace builds on:
//! - The [`Result`] alias used for error handling across the workspace
//! - Strongly-typed identifiers (`SubscriptionId`)
//! - Token payload inspection (`token` module)

pub mod error;
pub mod id;
pub mod token;

pub use error::Result;
pub use id::SubscriptionId;
