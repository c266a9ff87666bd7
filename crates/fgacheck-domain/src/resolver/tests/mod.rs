//! Resolver scenario tests.
//!
//! Organized by functionality:
//! - Direct, userset and wildcard assignment
//! - Computed relations and tuple-to-userset
//! - Set operations
//! - Conditions and contextual tuples
//! - Safety (depth limit, cycles, cancellation)
//! - Cache layer and chain wiring
