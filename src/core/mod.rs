//! Core modules of the AIPM state engine.
//!
//! Configuration derivation, the persisted state document, locking and
//! transactions, and git synchronization all live here.

pub mod compute;
pub mod decide;
pub mod document;
pub mod error;
pub mod gitfacts;
pub mod lock;
pub mod opinions;
pub mod session;
pub mod store;
pub mod sync;
pub mod time;
pub mod txn;
