//! Annuaire application shell library.
//!
//! Backend lifecycle and readiness coordination for the contact
//! directory app: supervising the local data server, probing
//! endpoints, remembering the user's backend choice, and handing the
//! resolved endpoint to the presentation layer through a narrow
//! bridge.

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod probe;
pub mod selection;
pub mod store;
pub mod supervisor;
