use std::sync::{Arc, Mutex};
use std::time::Duration;

use skua_core::{DispatchRegistry, HandlerError, RouteKey, Stanza};

use crate::chain::{ChainGuard, HandlerChain};
use crate::error::HarnessError;
use crate::handoff::{Resolver, Waiter, handoff};

/// Await the first stanza satisfying a predicate.
///
/// Construction installs the interception chain, so the watch is
/// observably active before it returns: perform the triggering action
/// *after* creating the watch and no delivery can race it. Stanzas
/// delivered before construction are invisible and never match. The
/// watch is single-use; `wait` consumes it and restores the registry.
pub struct StanzaWatch {
    guard: ChainGuard,
    waiter: Waiter<Stanza>,
}

impl StanzaWatch {
    pub fn matching(
        registry: &Arc<DispatchRegistry>,
        key: RouteKey,
        what: impl Into<String>,
        predicate: impl Fn(&Stanza) -> bool + Send + Sync + 'static,
    ) -> Result<Self, HarnessError> {
        let what = what.into();
        let (resolver, waiter) = handoff::<Stanza>(what.clone());
        let done = Mutex::new(false);

        let chain = HandlerChain::new(move |stanza, delegate_err| {
            let mut done = lock_flag(&done);
            if *done || !predicate(stanza) {
                return;
            }
            *done = true;
            resolve_match(&resolver, &what, stanza, delegate_err);
        });
        let guard = chain.install(registry, key)?;
        Ok(Self { guard, waiter })
    }

    /// Block until the first match or the timeout.
    pub async fn wait(self, timeout: Duration) -> Result<Stanza, HarnessError> {
        let Self { mut guard, waiter } = self;
        let outcome = waiter.recv(timeout).await;
        guard.uninstall();
        outcome
    }
}

/// Await the first `n` stanzas satisfying a predicate, resolving only
/// once the `n`th arrives and returning them in delivery order. Matches
/// after resolution are not recorded.
pub struct CountedWatch {
    guard: ChainGuard,
    waiter: Waiter<Vec<Stanza>>,
}

impl CountedWatch {
    pub fn counting(
        registry: &Arc<DispatchRegistry>,
        key: RouteKey,
        what: impl Into<String>,
        predicate: impl Fn(&Stanza) -> bool + Send + Sync + 'static,
        count: usize,
    ) -> Result<Self, HarnessError> {
        let what = what.into();
        let count = count.max(1);
        let (resolver, waiter) = handoff::<Vec<Stanza>>(what.clone());
        let state = Mutex::new(TallyState {
            done: false,
            collected: Vec::new(),
        });

        let chain = HandlerChain::new(move |stanza, delegate_err| {
            let mut state = lock_tally(&state);
            if state.done || !predicate(stanza) {
                return;
            }

            if let Some(error) = delegate_err {
                state.done = true;
                let _ = resolver.resolve_err(HarnessError::Delegate {
                    what: what.clone(),
                    source: error.clone(),
                });
                return;
            }

            state.collected.push(stanza.clone());
            if state.collected.len() == count {
                state.done = true;
                let _ = resolver.resolve(std::mem::take(&mut state.collected));
            }
        });
        let guard = chain.install(registry, key)?;
        Ok(Self { guard, waiter })
    }

    /// Block until `n` matches arrived or the timeout.
    pub async fn wait(self, timeout: Duration) -> Result<Vec<Stanza>, HarnessError> {
        let Self { mut guard, waiter } = self;
        let outcome = waiter.recv(timeout).await;
        guard.uninstall();
        outcome
    }
}

struct TallyState {
    done: bool,
    collected: Vec<Stanza>,
}

fn resolve_match(
    resolver: &Resolver<Stanza>,
    what: &str,
    stanza: &Stanza,
    delegate_err: Option<&HandlerError>,
) {
    let _ = match delegate_err {
        Some(error) => resolver.resolve_err(HarnessError::Delegate {
            what: what.to_string(),
            source: error.clone(),
        }),
        None => resolver.resolve(stanza.clone()),
    };
}

fn lock_flag(flag: &Mutex<bool>) -> std::sync::MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_tally(state: &Mutex<TallyState>) -> std::sync::MutexGuard<'_, TallyState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
