use std::time::Duration;

use thiserror::Error;

use skua_client::RequestError;
use skua_core::{HandlerError, RouteKey};

/// Failures surfaced to an awaiting test step.
///
/// `Timeout` is an expected outcome, not only a defect: proving a push is
/// *not* sent is done by letting an await time out. The other variants
/// are genuine failures of the step or of the surrounding setup.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("timed out after {after:?} while awaiting {what}")]
    Timeout { what: String, after: Duration },

    #[error("result for {what} was resolved more than once")]
    DoubleResolution { what: String },

    #[error("delegate handler failed while {what} was being observed: {source}")]
    Delegate {
        what: String,
        #[source]
        source: HandlerError,
    },

    #[error("an interception chain is already installed for {key}")]
    AlreadyInstalled { key: RouteKey },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("request {id} was answered with a protocol error: {stanza}")]
    RequestFailed { id: String, stanza: String },

    #[error("no {what} observed within {after:?} after request {id} succeeded")]
    PushTimeout {
        id: String,
        what: String,
        after: Duration,
    },
}
