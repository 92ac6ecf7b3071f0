//! Shared test infrastructure for the engine integration tests.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

pub mod fixtures;
pub mod remote;

pub use fixtures::*;
pub use remote::*;
