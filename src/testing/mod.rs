//! Testing utilities and mock implementations
//!
//! Lets the scheduler be exercised end to end without sockets: agents talk
//! over in-memory channels and state lives in a [`crate::store::MemoryStore`].

pub mod mocks;

pub use mocks::*;
