//! Deterministic observation of asynchronous server pushes.
//!
//! A conformance test needs to see a push (a roster update, a relayed
//! announcement) the moment the client stack delivers it, without taking
//! that delivery away from the stack's own handlers. The harness splits
//! this into four pieces:
//!
//! - [`handoff`]: a single-use rendezvous between the dispatch task and
//!   the awaiting test task, bounded by a timeout.
//! - [`chain`]: a reversible interception link that forwards every
//!   stanza to the previously-registered handler while also observing it.
//! - [`watch`]: chain and handoff composed behind a predicate, resolving
//!   on the first matching stanza, or on the first `n` of them.
//! - [`action`]: the correlated two-leg step, which sends a request,
//!   takes its direct reply, then awaits the push the request fanned out.

pub mod action;
pub mod chain;
pub mod error;
pub mod handoff;
pub mod watch;

pub use action::{CorrelationWindow, Exchange, send_and_await_push};
pub use chain::{ChainGuard, HandlerChain};
pub use error::HarnessError;
pub use handoff::{Resolver, Waiter, handoff};
pub use watch::{CountedWatch, StanzaWatch};
