//! Identity-client events and the outward event bridge.
//!
//! `ClientEvent` enumerates the events an identity client can raise; the
//! wire names match what browser-side consumers conventionally listen
//! for. `EventRegistry` is the subscription bookkeeping shared by client
//! implementations, and `EventSink` is the seam through which events leave
//! the library (a browser host would dispatch DOM events; native hosts can
//! use [`BroadcastEventSink`]).

use crate::client::EventHandler;
use portcullis_core::SubscriptionId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Prefix for event names dispatched through an [`EventSink`].
pub const EVENT_PREFIX: &str = "portcullis";

/// Events raised by an identity client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    /// A user session was established or renewed.
    UserLoaded,
    /// The user session was removed.
    UserUnloaded,
    /// The access token is about to expire.
    AccessTokenExpiring,
    /// The access token has expired.
    AccessTokenExpired,
    /// A silent renewal attempt failed.
    SilentRenewError,
    /// The user signed out at the identity provider.
    UserSignedOut,
}

impl ClientEvent {
    /// Every event, in dispatch order.
    pub const ALL: [ClientEvent; 6] = [
        ClientEvent::UserLoaded,
        ClientEvent::UserUnloaded,
        ClientEvent::AccessTokenExpiring,
        ClientEvent::AccessTokenExpired,
        ClientEvent::SilentRenewError,
        ClientEvent::UserSignedOut,
    ];

    /// The event's wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserLoaded => "userLoaded",
            Self::UserUnloaded => "userUnloaded",
            Self::AccessTokenExpiring => "accessTokenExpiring",
            Self::AccessTokenExpired => "accessTokenExpired",
            Self::SilentRenewError => "silentRenewError",
            Self::UserSignedOut => "userSignedOut",
        }
    }

    /// The prefixed name used for outward dispatch.
    #[must_use]
    pub fn channel_name(self) -> String {
        format!("{EVENT_PREFIX}:{}", self.as_str())
    }
}

impl std::fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription bookkeeping for identity-client implementations.
///
/// `notify` snapshots the handler list before invoking anything, so a
/// handler may subscribe or unsubscribe without deadlocking the registry.
#[derive(Default)]
pub struct EventRegistry {
    handlers: Mutex<HashMap<ClientEvent, Vec<(SubscriptionId, EventHandler)>>>,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler and returns its subscription id.
    pub fn subscribe(&self, event: ClientEvent, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers
            .lock()
            .expect("event registry lock poisoned")
            .entry(event)
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, event: ClientEvent, id: SubscriptionId) {
        let mut handlers = self.handlers.lock().expect("event registry lock poisoned");
        if let Some(entries) = handlers.get_mut(&event) {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Invokes every handler registered for the event.
    pub fn notify(&self, event: ClientEvent, detail: &Value) {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock().expect("event registry lock poisoned");
            handlers
                .get(&event)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            handler(detail);
        }
    }

    /// Returns how many handlers are registered for the event.
    #[must_use]
    pub fn handler_count(&self, event: ClientEvent) -> usize {
        self.handlers
            .lock()
            .expect("event registry lock poisoned")
            .get(&event)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry").finish_non_exhaustive()
    }
}

/// Where bridged events go once they leave the library.
pub trait EventSink: Send + Sync {
    /// Dispatches an event on the named channel.
    fn dispatch(&self, channel: &str, detail: &Value);
}

/// An event as seen by bridge consumers.
#[derive(Debug, Clone)]
pub struct BridgedEvent {
    /// The prefixed channel name, e.g. `portcullis:userLoaded`.
    pub channel: String,
    /// The event payload; an empty object when the event carries none.
    pub detail: Value,
}

/// An [`EventSink`] backed by a tokio broadcast channel.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<BridgedEvent>,
}

impl BroadcastEventSink {
    /// Creates a sink buffering up to `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Opens a new receiver for bridged events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgedEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn dispatch(&self, channel: &str, detail: &Value) {
        // A send with no live receivers is not a failure.
        let _ = self.sender.send(BridgedEvent {
            channel: channel.to_string(),
            detail: detail.clone(),
        });
    }
}
