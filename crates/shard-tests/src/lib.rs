//! # shard-tests
//!
//! Integration tests for the antiflood subsystem.
//!
//! This crate provides:
//! - A harness wiring the full component stack with recording collaborators
//! - End-to-end tests of the admission properties
//! - Property-based tests of the quota and topic invariants

pub mod harness;



pub use harness::*;
