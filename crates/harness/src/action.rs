use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;
use xmpp_parsers::iq::Iq;

use skua_client::ClientSession;
use skua_core::{HandlerError, RouteKey, Stanza, serialize_stanza};

use crate::chain::{ChainGuard, HandlerChain};
use crate::error::HarnessError;
use crate::handoff::{Resolver, Waiter, handoff};

/// Both legs of a correlated protocol action: the direct reply to the
/// request, and the asynchronous push the request fanned out.
#[derive(Debug)]
pub struct Exchange {
    pub reply: Iq,
    pub push: Stanza,
}

/// The causal window between issuing a request and observing the push it
/// triggered.
///
/// `open` installs the interception chain *before* sending, so a push
/// the server emits while the direct reply is still in flight is not
/// lost: deliveries from the moment the request goes out are recorded,
/// and evaluated against the push predicate only once the reply has
/// arrived and turned out well. Stanzas delivered before the request was
/// sent can only stem from unrelated earlier activity and never match.
/// A protocol-error reply closes the window without evaluating anything.
pub struct CorrelationWindow {
    guard: ChainGuard,
    waiter: Waiter<Stanza>,
    request_id: String,
    reply: Iq,
}

impl CorrelationWindow {
    pub async fn open<S: ClientSession>(
        session: &S,
        key: RouteKey,
        what: impl Into<String>,
        request: Iq,
        predicate: impl Fn(&Stanza) -> bool + Send + Sync + 'static,
    ) -> Result<Self, HarnessError> {
        let what = what.into();
        let request_id = request.id().to_string();
        let (resolver, waiter) = handoff::<Stanza>(what.clone());

        let shared = Arc::new(WindowShared {
            what,
            predicate: Box::new(predicate),
            resolver,
            sent: AtomicBool::new(false),
            inner: Mutex::new(WindowInner {
                armed: false,
                done: false,
                recorded: Vec::new(),
            }),
        });

        let observer_shared = Arc::clone(&shared);
        let chain = HandlerChain::new(move |stanza, delegate_err| {
            observer_shared.observe(stanza, delegate_err);
        });
        let mut guard = chain.install(session.registry(), key)?;

        shared.sent.store(true, Ordering::Release);
        let reply = match session.send_iq(request).await {
            Ok(reply) => reply,
            Err(error) => {
                guard.uninstall();
                return Err(HarnessError::Request(error));
            }
        };

        if matches!(reply, Iq::Error { .. }) {
            guard.uninstall();
            let stanza = serialize_stanza(&Stanza::Iq(Box::new(reply)))
                .unwrap_or_else(|_| "<unserializable error reply>".to_string());
            return Err(HarnessError::RequestFailed {
                id: request_id,
                stanza,
            });
        }

        debug!(id = %request_id, "direct reply received, arming push predicate");
        shared.arm();
        Ok(Self {
            guard,
            waiter,
            request_id,
            reply,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn reply(&self) -> &Iq {
        &self.reply
    }

    /// Block until the correlated push arrives or `timeout` elapses,
    /// then restore the registry. A timeout here names the push leg,
    /// keeping it apart from request-leg failures.
    pub async fn await_push(self, timeout: Duration) -> Result<Exchange, HarnessError> {
        let Self {
            mut guard,
            waiter,
            request_id,
            reply,
        } = self;

        let outcome = waiter.recv(timeout).await;
        guard.uninstall();

        match outcome {
            Ok(push) => Ok(Exchange { reply, push }),
            Err(HarnessError::Timeout { what, after }) => Err(HarnessError::PushTimeout {
                id: request_id,
                what,
                after,
            }),
            Err(other) => Err(other),
        }
    }
}

/// Send a request and await the push it is expected to trigger, as one
/// test step.
pub async fn send_and_await_push<S: ClientSession>(
    session: &S,
    key: RouteKey,
    what: impl Into<String>,
    request: Iq,
    predicate: impl Fn(&Stanza) -> bool + Send + Sync + 'static,
    push_timeout: Duration,
) -> Result<Exchange, HarnessError> {
    let window = CorrelationWindow::open(session, key, what, request, predicate).await?;
    window.await_push(push_timeout).await
}

struct WindowShared {
    what: String,
    predicate: Box<dyn Fn(&Stanza) -> bool + Send + Sync>,
    resolver: Resolver<Stanza>,
    sent: AtomicBool,
    inner: Mutex<WindowInner>,
}

struct WindowInner {
    armed: bool,
    done: bool,
    recorded: Vec<(Stanza, Option<HandlerError>)>,
}

impl WindowShared {
    fn observe(&self, stanza: &Stanza, delegate_err: Option<&HandlerError>) {
        if !self.sent.load(Ordering::Acquire) {
            return;
        }

        let mut inner = self.lock_inner();
        if inner.done {
            return;
        }
        if !inner.armed {
            inner.recorded.push((stanza.clone(), delegate_err.cloned()));
            return;
        }
        self.try_resolve(&mut inner, stanza, delegate_err);
    }

    fn arm(&self) {
        let mut inner = self.lock_inner();
        inner.armed = true;
        let recorded = std::mem::take(&mut inner.recorded);
        for (stanza, delegate_err) in &recorded {
            if inner.done {
                break;
            }
            self.try_resolve(&mut inner, stanza, delegate_err.as_ref());
        }
    }

    fn try_resolve(
        &self,
        inner: &mut WindowInner,
        stanza: &Stanza,
        delegate_err: Option<&HandlerError>,
    ) {
        if !(self.predicate)(stanza) {
            return;
        }
        inner.done = true;
        let _ = match delegate_err {
            Some(error) => self.resolver.resolve_err(HarnessError::Delegate {
                what: self.what.clone(),
                source: error.clone(),
            }),
            None => self.resolver.resolve(stanza.clone()),
        };
    }

    fn lock_inner(&self) -> MutexGuard<'_, WindowInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
