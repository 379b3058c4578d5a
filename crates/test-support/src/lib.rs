//! Shared test machinery: canned accounts, stanza fixtures, and a
//! scripted in-process stand-in for the client session the harness
//! normally drives against a live server.

pub mod accounts;
pub mod fixtures;
pub mod scripted;

pub use accounts::{ALICE, BOB, CAROL, TestAccount};
pub use scripted::{ScriptedReply, ScriptedSession};
