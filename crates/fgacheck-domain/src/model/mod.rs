//! Authorization model types and the type system built over them.
//!
//! This module contains:
//! - Core type definitions (TupleKey, rewrite rules, conditions)
//! - Tuple string helpers
//! - `TypeSystem`, the lookup surface used during check resolution

pub mod tuple;
mod type_system;
mod types;

pub use type_system::{reference_for_user, TypeSystem};
pub use types::*;
