use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::HandlerError;
use crate::stanza::Stanza;

/// The top-level element a registration listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
}

impl StanzaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StanzaKind::Message => "message",
            StanzaKind::Presence => "presence",
            StanzaKind::Iq => "iq",
        }
    }
}

/// Registration criteria: a stanza kind, optionally narrowed to a payload
/// namespace (IQ traffic is routed per query namespace; messages and
/// presences usually register unscoped).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub kind: StanzaKind,
    pub ns: Option<String>,
}

impl RouteKey {
    pub fn unscoped(kind: StanzaKind) -> Self {
        Self { kind, ns: None }
    }

    pub fn scoped(kind: StanzaKind, ns: impl Into<String>) -> Self {
        Self {
            kind,
            ns: Some(ns.into()),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "<{}/> ({ns})", self.kind.as_str()),
            None => write!(f, "<{}/>", self.kind.as_str()),
        }
    }
}

/// An inbound-stanza handler, invoked from the dispatch task.
pub trait StanzaHandler: Send + Sync {
    fn handle(&self, stanza: &Stanza) -> Result<(), HandlerError>;
}

impl<F> StanzaHandler for F
where
    F: Fn(&Stanza) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, stanza: &Stanza) -> Result<(), HandlerError> {
        self(stanza)
    }
}

/// The client stack's inbound dispatch table.
///
/// One handler per [`RouteKey`]; registration replaces and returns the
/// previous handler so callers can restore it later. The table lock is
/// held only while the handler slot is read or written, never across a
/// handler invocation, so a stanza in flight observes either the old or
/// the new registration, not a mixture.
#[derive(Default)]
pub struct DispatchRegistry {
    handlers: Mutex<HashMap<RouteKey, Arc<dyn StanzaHandler>>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `key`, returning whatever was registered
    /// before (possibly nothing).
    pub fn register(
        &self,
        key: RouteKey,
        handler: Arc<dyn StanzaHandler>,
    ) -> Option<Arc<dyn StanzaHandler>> {
        debug!(key = %key, "handler registered");
        self.lock_handlers().insert(key, handler)
    }

    /// Remove the registration for `key`, returning the handler that was
    /// installed, if any.
    pub fn unregister(&self, key: &RouteKey) -> Option<Arc<dyn StanzaHandler>> {
        debug!(key = %key, "handler unregistered");
        self.lock_handlers().remove(key)
    }

    /// Put a previously-captured registration back: re-register the
    /// handler, or clear the slot when there was none.
    pub fn restore(&self, key: RouteKey, previous: Option<Arc<dyn StanzaHandler>>) {
        match previous {
            Some(handler) => {
                self.register(key, handler);
            }
            None => {
                self.unregister(&key);
            }
        }
    }

    /// The handler currently registered for `key`.
    pub fn handler_for(&self, key: &RouteKey) -> Option<Arc<dyn StanzaHandler>> {
        self.lock_handlers().get(key).cloned()
    }

    /// Route one inbound stanza: the scoped registration wins, then the
    /// unscoped registration of its kind. Returns whether a handler ran;
    /// handler failures propagate to the caller.
    pub fn dispatch(&self, stanza: &Stanza) -> Result<bool, HandlerError> {
        let handler = {
            let handlers = self.lock_handlers();
            let scoped = stanza.route_key();
            handlers
                .get(&scoped)
                .or_else(|| handlers.get(&RouteKey::unscoped(scoped.kind)))
                .cloned()
        };

        let Some(handler) = handler else {
            debug!(stanza = stanza.name(), "no handler registered, stanza dropped");
            return Ok(false);
        };

        handler.handle(stanza)?;
        Ok(true)
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HashMap<RouteKey, Arc<dyn StanzaHandler>>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
