use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use skua_core::{DispatchRegistry, HandlerError, RouteKey, Stanza, StanzaHandler};

use crate::error::HarnessError;

/// Inspection hook invoked for every stanza the chain forwards. The
/// second argument carries the delegate's failure for that stanza, when
/// the previously-registered handler rejected it.
pub type ChainObserver = dyn Fn(&Stanza, Option<&HandlerError>) + Send + Sync;

/// A reversible interception link for one registration slot.
///
/// While installed, every stanza routed to its key is forwarded to the
/// previously-registered handler first and then handed to the observer,
/// so library-internal state (a roster cache, stream counters) is
/// already updated by the time the observer inspects the stanza. The
/// observer runs even when the delegate fails; the delegate's error is
/// re-raised to the dispatcher afterwards, never swallowed.
pub struct HandlerChain {
    link: Arc<ChainLink>,
}

impl HandlerChain {
    pub fn new(observer: impl Fn(&Stanza, Option<&HandlerError>) + Send + Sync + 'static) -> Self {
        Self {
            link: Arc::new(ChainLink {
                delegate: Mutex::new(None),
                observer: Box::new(observer),
                active: AtomicBool::new(false),
                installed: AtomicBool::new(false),
            }),
        }
    }

    /// Atomically capture the current registration for `key` and replace
    /// it with this chain. Installing an already-installed chain is an
    /// error; uninstall first.
    pub fn install(
        &self,
        registry: &Arc<DispatchRegistry>,
        key: RouteKey,
    ) -> Result<ChainGuard, HarnessError> {
        if self
            .link
            .installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HarnessError::AlreadyInstalled { key });
        }

        let captured = registry.handler_for(&key);
        self.link.set_delegate(captured.clone());
        self.link.active.store(true, Ordering::Release);

        let link_handler: Arc<dyn StanzaHandler> = self.link.clone();
        let replaced = registry.register(key.clone(), link_handler);

        // The slot may have changed hands between capture and install;
        // whatever register() displaced is the true delegate.
        let delegate = match (&captured, &replaced) {
            (None, None) => None,
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => replaced,
            _ => {
                self.link.set_delegate(replaced.clone());
                replaced
            }
        };

        debug!(key = %key, had_delegate = delegate.is_some(), "interception chain installed");
        Ok(ChainGuard {
            registry: Arc::clone(registry),
            key,
            link: Arc::clone(&self.link),
            delegate,
            restored: false,
        })
    }
}

struct ChainLink {
    delegate: Mutex<Option<Arc<dyn StanzaHandler>>>,
    observer: Box<ChainObserver>,
    active: AtomicBool,
    installed: AtomicBool,
}

impl ChainLink {
    fn set_delegate(&self, delegate: Option<Arc<dyn StanzaHandler>>) {
        *self.lock_delegate() = delegate;
    }

    fn current_delegate(&self) -> Option<Arc<dyn StanzaHandler>> {
        self.lock_delegate().clone()
    }

    fn lock_delegate(&self) -> MutexGuard<'_, Option<Arc<dyn StanzaHandler>>> {
        self.delegate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StanzaHandler for ChainLink {
    fn handle(&self, stanza: &Stanza) -> Result<(), HandlerError> {
        let delegate_result = match self.current_delegate() {
            Some(delegate) => delegate.handle(stanza),
            None => Ok(()),
        };

        if self.active.load(Ordering::Acquire) {
            (self.observer)(stanza, delegate_result.as_ref().err());
        }

        delegate_result
    }
}

/// Handle to an installed chain, restoring the captured registration on
/// [`ChainGuard::uninstall`] or on drop. Restoration is idempotent.
pub struct ChainGuard {
    registry: Arc<DispatchRegistry>,
    key: RouteKey,
    link: Arc<ChainLink>,
    delegate: Option<Arc<dyn StanzaHandler>>,
    restored: bool,
}

impl fmt::Debug for ChainGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainGuard")
            .field("key", &self.key)
            .field("has_delegate", &self.delegate.is_some())
            .field("restored", &self.restored)
            .finish()
    }
}

impl ChainGuard {
    /// Put the registry back the way install found it: re-register the
    /// captured handler, or clear the slot when there was none. A stanza
    /// already in flight through the link still reaches the delegate but
    /// is no longer observed.
    pub fn uninstall(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        self.link.active.store(false, Ordering::Release);

        let link_handler: Arc<dyn StanzaHandler> = self.link.clone();
        let ours = self
            .registry
            .handler_for(&self.key)
            .is_some_and(|current| Arc::ptr_eq(&current, &link_handler));

        if ours {
            self.registry.restore(self.key.clone(), self.delegate.take());
            self.link.installed.store(false, Ordering::Release);
            debug!(key = %self.key, "interception chain uninstalled");
        } else {
            // An outer chain (or someone else) replaced us; deactivating
            // the observer is all that is safe to do from here.
            warn!(key = %self.key, "chain is no longer the registered handler, leaving registry untouched");
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        self.uninstall();
    }
}
