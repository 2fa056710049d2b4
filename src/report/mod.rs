//! Report rendering.
//!
//! Turns a finished analysis report into the documents the CLI writes.

pub mod generator;

pub use generator::*;
