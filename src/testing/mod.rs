//! Testing utilities and mock implementations
//!
//! Lets pipelines run end to end without external interpreters.

pub mod mocks;

pub use mocks::*;
