use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use xmpp_parsers::iq::Iq;

use skua_client::{ClientSession, RequestError};
use skua_core::{DispatchRegistry, HandlerError, HarnessConfig, Stanza};

use crate::fixtures;

/// One scripted outcome for the next `send_iq` call.
pub enum ScriptedReply {
    /// Answer with an empty result and fan out the given pushes.
    Result { pushes: Vec<Stanza> },
    /// Answer with a protocol error carrying the given defined condition.
    Error { condition: String },
    /// Never answer; the request leg runs into its timeout.
    NoReply,
}

impl ScriptedReply {
    pub fn empty_result() -> Self {
        Self::Result { pushes: Vec::new() }
    }

    pub fn result_with_pushes(pushes: Vec<Stanza>) -> Self {
        Self::Result { pushes }
    }

    pub fn error(condition: impl Into<String>) -> Self {
        Self::Error {
            condition: condition.into(),
        }
    }

    pub fn no_reply() -> Self {
        Self::NoReply
    }
}

/// An in-process stand-in for a connected client session.
///
/// Owns a dispatch registry and a dispatch task that delivers queued
/// stanzas in order, exactly one at a time, the way a connection's read
/// loop would. `send_iq` consumes the scripted outcomes in FIFO order
/// and correlates the reply to the request id; scripted pushes are
/// queued before the reply returns, mirroring a server that fans out
/// the push while the acknowledgement is still in flight.
pub struct ScriptedSession {
    registry: Arc<DispatchRegistry>,
    script: Mutex<VecDeque<ScriptedReply>>,
    pushes: mpsc::UnboundedSender<Stanza>,
    request_timeout: Duration,
    sent: Mutex<Vec<Iq>>,
}

impl ScriptedSession {
    /// Spawn the dispatch task on the current runtime, with the default
    /// request timeout from [`HarnessConfig`].
    pub fn new() -> Self {
        Self::with_request_timeout(HarnessConfig::default().request_timeout())
    }

    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        let registry = Arc::new(DispatchRegistry::new());
        let (pushes, mut queue) = mpsc::unbounded_channel::<Stanza>();

        let dispatch_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some(push) = queue.recv().await {
                match dispatch_registry.dispatch(&push) {
                    Ok(true) => {}
                    Ok(false) => debug!(stanza = push.name(), "push had no handler"),
                    Err(error) => warn!(%error, "handler failed while processing a push"),
                }
            }
        });

        Self {
            registry,
            script: Mutex::new(VecDeque::new()),
            pushes,
            request_timeout,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome for the next request.
    pub fn script(&self, reply: ScriptedReply) {
        lock(&self.script).push_back(reply);
    }

    /// Queue a push for in-order delivery by the dispatch task.
    pub fn deliver(&self, push: Stanza) {
        let _ = self.pushes.send(push);
    }

    /// Dispatch a stanza inline on the caller, bypassing the queue. Used
    /// to model traffic that has certainly completed delivery before the
    /// test takes its next step.
    pub fn deliver_now(&self, stanza: &Stanza) -> Result<bool, HandlerError> {
        self.registry.dispatch(stanza)
    }

    /// Every request handed to `send_iq`, oldest first.
    pub fn sent_requests(&self) -> Vec<Iq> {
        lock(&self.sent).clone()
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession for ScriptedSession {
    fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    async fn send_iq(&self, request: Iq) -> Result<Iq, RequestError> {
        let id = request.id().to_string();
        lock(&self.sent).push(request);

        let next = lock(&self.script).pop_front();
        match next {
            Some(ScriptedReply::Result { pushes }) => {
                for push in pushes {
                    let _ = self.pushes.send(push);
                }
                Ok(fixtures::result_reply(&id))
            }
            Some(ScriptedReply::Error { condition }) => Ok(fixtures::error_reply(&id, &condition)),
            Some(ScriptedReply::NoReply) => {
                tokio::time::sleep(self.request_timeout).await;
                Err(RequestError::Timeout {
                    id,
                    after: self.request_timeout,
                })
            }
            None => Err(RequestError::Session {
                id,
                details: "no scripted reply queued".to_string(),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
