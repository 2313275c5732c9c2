//! Rendezvous relay: pairs senders and receivers by code and ferries
//! opaque negotiation frames between them. File bytes never touch this
//! process.

pub mod registry;
pub mod server;

pub use registry::{REGISTRATION_TTL, Registry};
pub use server::{router, run, run_with_listener};
