//! The surface the conformance harness requires from the client stack it
//! drives. Connection lifecycle, authentication, and the wire codec all
//! live behind this boundary; the harness only needs a dispatch registry
//! for inbound stanzas and a correlated request/reply primitive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use xmpp_parsers::iq::Iq;

use skua_core::DispatchRegistry;

/// Failure of the direct request/reply leg, before any push is awaited.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request {id} received no reply within {after:?}")]
    Timeout { id: String, after: Duration },

    #[error("session failed while sending request {id}: {details}")]
    Session { id: String, details: String },
}

/// A connected client session, as seen by the harness.
///
/// `send_iq` is the synchronous request/reply primitive: it resolves with
/// the correlated answer (an `Iq::Result` or an `Iq::Error`, both of
/// which are valid replies) and only fails when no reply arrives at all
/// or the session itself breaks. Inbound stanzas outside that correlation
/// (pushes) are delivered, in order, to whatever handler is currently
/// registered for their route key.
pub trait ClientSession: Send + Sync {
    /// The session's shared inbound dispatch table.
    fn registry(&self) -> &Arc<DispatchRegistry>;

    /// Send a request and await its correlated reply.
    fn send_iq(
        &self,
        request: Iq,
    ) -> impl std::future::Future<Output = Result<Iq, RequestError>> + Send;
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique id for an outbound request stanza.
pub fn next_request_id() -> String {
    let sequence = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    format!("skua-iq-{sequence}")
}

/// The id of an already-built request, for correlation and diagnostics.
pub fn request_id(request: &Iq) -> &str {
    request.id()
}
