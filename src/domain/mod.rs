//! Domain layer - Core literals and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles, and the single set of
//! literals both reconcile workflows share.

pub mod literals;
pub mod ports;

pub use ports::*;
