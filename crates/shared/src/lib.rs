//! Renova Shared Types and Utilities
//!
//! This crate contains the domain entities, clocks, and database utilities
//! shared across the Renova billing platform.

pub mod clock;
pub mod db;
pub mod types;

pub use clock::*;
pub use db::*;
pub use types::*;
