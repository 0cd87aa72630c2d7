//! The navigation seam.
//!
//! Redirect login and logout leave the page, and callback completion
//! needs the URL the provider sent the user back to. Both are environment
//! concerns, so they go through an injected trait: a browser host backs
//! it with its location facilities, native hosts with whatever carries
//! their navigation.

/// Performs and observes top-level navigation.
pub trait Navigator: Send + Sync {
    /// Navigates to the given URL. Redirect login is not cancellable once
    /// this has been called.
    fn navigate(&self, url: &str);

    /// Returns the URL currently being displayed.
    fn current_url(&self) -> String;
}
